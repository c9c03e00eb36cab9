//! `portable-pty` implementation of the spawn primitive.
//!
//! The child environment is exactly the plan's environment: the builder's
//! inherited variables are cleared first, so only what the resolver put in
//! the plan reaches the process.
//!
//! A dedicated blocking thread drains the PTY master and forwards each
//! chunk as [`PtyEvent::Data`]. When the master reports EOF (the child and
//! every process holding the slave side are gone) the thread reaps the
//! child and sends a single [`PtyEvent::Exit`].
//!
//! Input goes the other way through a second thread fed by a channel, so a
//! child that stops reading stdin can only stall that thread, never the
//! caller.

use std::future::Future;
use std::io::{Read, Write};
use std::pin::Pin;
use std::sync::Mutex;
use std::thread;

#[cfg(unix)]
use nix::sys::signal::{kill, killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::plan::SpawnPlan;
use crate::models::session::TerminalSize;
use crate::pty::{PtyEvent, PtyProcess, PtySpawner, SpawnedProcess};
use crate::{AppError, Result};

/// Read buffer size for the output thread.
const READ_CHUNK_SIZE: usize = 8192;

/// Production spawner using the platform's native PTY system.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePtySpawner;

impl NativePtySpawner {
    /// Create a new native spawner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PtySpawner for NativePtySpawner {
    fn spawn(
        &self,
        plan: &SpawnPlan,
        size: TerminalSize,
    ) -> Pin<Box<dyn Future<Output = Result<SpawnedProcess>> + Send + '_>> {
        let plan = plan.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || spawn_blocking_pty(&plan, size))
                .await
                .map_err(|err| AppError::Spawn(format!("spawn task panicked: {err}")))?
        })
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn spawn_blocking_pty(plan: &SpawnPlan, size: TerminalSize) -> Result<SpawnedProcess> {
    if let Some(cwd) = &plan.cwd {
        if !cwd.is_dir() {
            return Err(AppError::Spawn(format!(
                "working directory does not exist: {}",
                cwd.display()
            )));
        }
    }

    let pair = native_pty_system()
        .openpty(pty_size(size))
        .map_err(|err| AppError::Spawn(format!("failed to open pty: {err}")))?;

    let mut cmd = CommandBuilder::new(&plan.executable);
    cmd.args(&plan.args);
    cmd.env_clear();
    for (key, value) in &plan.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &plan.cwd {
        cmd.cwd(cwd);
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|err| AppError::Spawn(format!("failed to spawn {}: {err}", plan.executable)))?;
    // The master only sees EOF once no slave handle remains open.
    drop(pair.slave);

    let pid = child.process_id();
    let killer = child.clone_killer();
    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|err| AppError::Spawn(format!("failed to clone pty reader: {err}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|err| AppError::Spawn(format!("failed to take pty writer: {err}")))?;
    let input = spawn_writer(writer, pid)?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let executable = plan.executable.clone();

    thread::Builder::new()
        .name(format!("pty-reader-{}", pid.unwrap_or(0)))
        .spawn(move || {
            let mut buffer = [0u8; READ_CHUNK_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if event_tx.send(PtyEvent::Data(buffer[..n].to_vec())).is_err() {
                            debug!(pid, "pty reader: receiver dropped, stopping");
                            break;
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        // Linux reports EIO on the master once the child is gone.
                        debug!(pid, %err, "pty reader: read ended");
                        break;
                    }
                }
            }

            let code = match child.wait() {
                Ok(status) => i32::try_from(status.exit_code()).ok(),
                Err(err) => {
                    warn!(pid, %err, "error waiting for pty child process");
                    None
                }
            };
            info!(pid, executable, ?code, "pty process exited");
            let _ = event_tx.send(PtyEvent::Exit(code));
        })
        .map_err(|err| AppError::Spawn(format!("failed to start pty reader thread: {err}")))?;

    info!(pid, command = plan.command_line(), %size, "pty process spawned");

    Ok(SpawnedProcess {
        process: Box::new(NativePtyProcess {
            input,
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
            pid,
        }),
        events: event_rx,
    })
}

/// Start the input thread. It exits when the sender is dropped or the
/// master stops accepting bytes.
fn spawn_writer(
    mut writer: Box<dyn Write + Send>,
    pid: Option<u32>,
) -> Result<mpsc::UnboundedSender<Vec<u8>>> {
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    thread::Builder::new()
        .name(format!("pty-writer-{}", pid.unwrap_or(0)))
        .spawn(move || {
            while let Some(bytes) = input_rx.blocking_recv() {
                if let Err(err) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
                    debug!(pid, %err, "pty writer: write failed, stopping");
                    break;
                }
            }
        })
        .map_err(|err| AppError::Spawn(format!("failed to start pty writer thread: {err}")))?;
    Ok(input_tx)
}

/// Handle to a process running under a native PTY.
struct NativePtyProcess {
    input: mpsc::UnboundedSender<Vec<u8>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
}

fn poisoned(what: &str) -> AppError {
    AppError::Pty(format!("{what} lock poisoned"))
}

impl PtyProcess for NativePtyProcess {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        self.input
            .send(bytes.to_vec())
            .map_err(|_| AppError::Pty("pty input closed".into()))
    }

    fn resize(&self, size: TerminalSize) -> Result<()> {
        self.master
            .lock()
            .map_err(|_| poisoned("master"))?
            .resize(pty_size(size))
            .map_err(|err| AppError::Pty(format!("failed to resize pty: {err}")))
    }

    fn kill(&self) -> Result<()> {
        self.killer
            .lock()
            .map_err(|_| poisoned("killer"))?
            .kill()
            .map_err(|err| AppError::Pty(format!("failed to kill pty process: {err}")))
    }

    #[cfg(unix)]
    fn force_kill(&self) -> Result<()> {
        let Some(raw) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return self.kill();
        };
        // The child leads its own session, so its pid is also its group id.
        let pid = Pid::from_raw(raw);
        killpg(pid, Signal::SIGKILL)
            .or_else(|_| kill(pid, Signal::SIGKILL))
            .map_err(|err| AppError::Pty(format!("failed to force-kill pty process: {err}")))
    }

    #[cfg(not(unix))]
    fn force_kill(&self) -> Result<()> {
        self.kill()
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}
