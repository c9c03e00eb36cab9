#![forbid(unsafe_code)]

//! `lane-pty`: attach the invoking terminal to a pooled PTY session.
//!
//! Loads configuration, builds the session pool with the native PTY
//! spawner, acquires one session for the requested lane (and tab), and
//! relays stdin and stdout until the process exits or a shutdown signal
//! arrives. While attached, an interactive host terminal is switched to raw
//! mode so keystrokes (Ctrl-C included) reach the child untouched, and host
//! window size changes are forwarded to the session. The pool is cleaned up
//! on the way out.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::tty::IsTty;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use lane_pty::config::{GlobalConfig, LaneConfig};
use lane_pty::models::agent::{AgentConfig, AgentType};
use lane_pty::{AppError, Result, Session, SessionConfig, SessionEvent, SessionKey, SessionPool};

/// Stdin read buffer size.
const STDIN_CHUNK_SIZE: usize = 4096;

/// Size used when the host terminal cannot report one.
const FALLBACK_SIZE: (u16, u16) = (80, 24);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum AgentChoice {
    Claude,
    Cursor,
    Aider,
    Shell,
}

impl From<AgentChoice> for AgentType {
    fn from(choice: AgentChoice) -> Self {
        match choice {
            AgentChoice::Claude => Self::Claude,
            AgentChoice::Cursor => Self::Cursor,
            AgentChoice::Aider => Self::Aider,
            AgentChoice::Shell => Self::Shell,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "lane-pty", about = "Pooled PTY sessions for lanes", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Lane identifier.
    #[arg(long, default_value = "main")]
    lane: String,

    /// Secondary tab within the lane.
    #[arg(long)]
    tab: Option<String>,

    /// Run an agent preset instead of the lane's configured agent.
    #[arg(long, value_enum)]
    agent: Option<AgentChoice>,

    /// Start the lane's configured agent rather than a plain shell.
    #[arg(long)]
    use_agent: bool,

    /// Working directory for the session.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Initial column count; defaults to the host terminal width.
    #[arg(long)]
    cols: Option<u16>,

    /// Initial row count; defaults to the host terminal height.
    #[arg(long)]
    rows: Option<u16>,
}

/// Keeps the host terminal in raw mode and restores it on drop.
struct RawModeGuard;

impl RawModeGuard {
    /// Enter raw mode when stdin is an interactive terminal.
    fn enable() -> Result<Option<Self>> {
        if !std::io::stdin().is_tty() {
            return Ok(None);
        }
        enable_raw_mode()
            .map_err(|err| AppError::Io(format!("failed to enable raw mode: {err}")))?;
        Ok(Some(Self))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            error!(%err, "failed to restore terminal mode");
        }
    }
}

fn host_size() -> (u16, u16) {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => (cols, rows),
        _ => FALLBACK_SIZE,
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("lane-pty bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    if let Some(choice) = args.agent {
        config.lanes.insert(
            args.lane.clone(),
            LaneConfig {
                agent_override: Some(AgentConfig::for_type(choice.into())),
            },
        );
    }

    let config = Arc::new(config);
    info!(
        max_concurrent_sessions = config.max_concurrent_sessions,
        frame_interval_ms = config.frame_interval_ms,
        "configuration loaded"
    );

    // ── Build the pool ──────────────────────────────────
    let pool = SessionPool::from_config(&config);
    let mut unavailable = pool.subscribe_agent_unavailable();

    let key = match &args.tab {
        Some(tab) => SessionKey::tab(args.lane.as_str(), tab.as_str()),
        None => SessionKey::lane(args.lane.as_str()),
    };

    let cwd = match args.cwd {
        Some(cwd) => Some(cwd),
        None => std::env::current_dir().ok(),
    };
    let (host_cols, host_rows) = host_size();
    let session_config = SessionConfig {
        cwd,
        use_agent: args.use_agent || args.agent.is_some(),
        desired_cols: args.cols.unwrap_or(host_cols),
        desired_rows: args.rows.unwrap_or(host_rows),
        ..SessionConfig::default()
    };

    let session = pool.acquire(&key, session_config).await?;
    let events = session.subscribe().await;
    match serde_json::to_string(&session.info().await) {
        Ok(snapshot) => info!(%key, snapshot, "session attached"),
        Err(err) => warn!(%key, %err, "failed to serialize session snapshot"),
    }

    // ── Relay I/O ───────────────────────────────────────
    let raw_mode = RawModeGuard::enable()?;
    let ct = CancellationToken::new();
    let stdin_handle = tokio::spawn(forward_stdin(session.clone(), ct.clone()));
    let resize_handle = tokio::spawn(forward_resizes(pool.clone(), key.clone(), ct.clone()));
    let notice_ct = ct.clone();
    let notice_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = notice_ct.cancelled() => break,
                notice = unavailable.recv() => match notice {
                    Ok(notice) => warn!(
                        lane_id = notice.lane_id,
                        agent_type = %notice.agent_type,
                        command = notice.command,
                        "agent unavailable, running login shell"
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "agent notices dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    tokio::select! {
        code = relay_output(events) => info!(?code, "session ended"),
        () = shutdown_signal() => info!("shutdown signal received"),
    }
    ct.cancel();
    drop(raw_mode);

    // ── Shutdown ────────────────────────────────────────
    pool.cleanup().await;
    stdin_handle.abort();
    let _ = resize_handle.await;
    let _ = notice_handle.await;
    info!("lane-pty shut down");

    Ok(())
}

/// Copy session output to stdout until the process exits.
async fn relay_output(mut events: mpsc::UnboundedReceiver<SessionEvent>) -> Option<i32> {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Output(bytes) => {
                if let Err(err) = write_stdout(&mut stdout, &bytes).await {
                    error!(%err, "failed to write session output");
                    return None;
                }
            }
            SessionEvent::Exited { code } => return code,
        }
    }
    None
}

async fn write_stdout(stdout: &mut tokio::io::Stdout, bytes: &[u8]) -> Result<()> {
    stdout.write_all(bytes).await?;
    stdout.flush().await?;
    Ok(())
}

/// Forward stdin to the session until EOF or cancellation.
async fn forward_stdin(session: Session, ct: CancellationToken) {
    let mut stdin = tokio::io::stdin();
    let mut buffer = vec![0u8; STDIN_CHUNK_SIZE];
    loop {
        let read = tokio::select! {
            () = ct.cancelled() => break,
            read = stdin.read(&mut buffer) => read,
        };
        match read {
            Ok(0) => break,
            Ok(n) => {
                if let Err(err) = session.write(&buffer[..n]).await {
                    warn!(%err, "failed to forward input");
                }
            }
            Err(err) => {
                warn!(%err, "stdin read failed");
                break;
            }
        }
    }
}

/// Forward host window size changes to the session.
#[cfg(unix)]
async fn forward_resizes(pool: SessionPool, key: SessionKey, ct: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut winch = match signal(SignalKind::window_change()) {
        Ok(winch) => winch,
        Err(err) => {
            warn!(%err, "failed to register SIGWINCH handler, resize disabled");
            return;
        }
    };
    loop {
        tokio::select! {
            () = ct.cancelled() => break,
            received = winch.recv() => {
                if received.is_none() {
                    break;
                }
                let (cols, rows) = host_size();
                pool.resize(&key, cols, rows).await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn forward_resizes(_pool: SessionPool, _key: SessionKey, ct: CancellationToken) {
    ct.cancelled().await;
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr so they never interleave with terminal output.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
