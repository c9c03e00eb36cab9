//! Shared fakes for session and pool integration tests.
//!
//! `FakeSpawner` stands in for the OS PTY primitive: every spawn records
//! its plan and hands back a `FakeHandle` through which a test can push
//! output or exit events and inspect the writes, resizes, and kills the
//! session performed.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lane_pty::models::agent::AgentConfig;
use lane_pty::models::plan::SpawnPlan;
use lane_pty::models::session::TerminalSize;
use lane_pty::pool::{PoolSettings, SessionPool};
use lane_pty::pty::{PtyEvent, PtyProcess, PtySpawner, SpawnedProcess};
use lane_pty::resolver::{AgentConfigSource, CommandProbe, SpawnResolver};
use lane_pty::session::SessionEvent;
use lane_pty::{AppError, Result};
use tokio::sync::{mpsc, Semaphore};

/// Generous bound for anything that should happen promptly.
pub const WAIT: Duration = Duration::from_secs(2);

/// Shell used by test resolvers.
pub const TEST_SHELL: &str = "/bin/bash";

// ── Fake process ─────────────────────────────────────────────────────────────

/// What a session did to one fake process.
#[derive(Debug, Default)]
pub struct ProcessLog {
    pub writes: Mutex<Vec<u8>>,
    pub resizes: Mutex<Vec<TerminalSize>>,
    pub kills: AtomicUsize,
    pub force_kills: AtomicUsize,
}

impl ProcessLog {
    pub fn written(&self) -> Vec<u8> {
        self.writes.lock().unwrap().clone()
    }

    pub fn resized(&self) -> Vec<TerminalSize> {
        self.resizes.lock().unwrap().clone()
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn force_kill_count(&self) -> usize {
        self.force_kills.load(Ordering::SeqCst)
    }
}

/// How a fake process reacts to termination requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KillResponse {
    /// Exits on the first kill.
    Exit,
    /// Survives a regular kill, exits on a forced one.
    IgnoreKill,
    /// Never exits unless the test says so.
    IgnoreAll,
}

struct FakeProcess {
    log: Arc<ProcessLog>,
    events: mpsc::UnboundedSender<PtyEvent>,
    on_kill: KillResponse,
    pid: u32,
}

impl PtyProcess for FakeProcess {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        self.log.writes.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn resize(&self, size: TerminalSize) -> Result<()> {
        self.log.resizes.lock().unwrap().push(size);
        Ok(())
    }

    fn kill(&self) -> Result<()> {
        self.log.kills.fetch_add(1, Ordering::SeqCst);
        if self.on_kill == KillResponse::Exit {
            let _ = self.events.send(PtyEvent::Exit(Some(137)));
        }
        Ok(())
    }

    fn force_kill(&self) -> Result<()> {
        self.log.force_kills.fetch_add(1, Ordering::SeqCst);
        if self.on_kill != KillResponse::IgnoreAll {
            let _ = self.events.send(PtyEvent::Exit(Some(137)));
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}

/// Test-side view of one spawned fake process.
#[derive(Clone)]
pub struct FakeHandle {
    pub plan: SpawnPlan,
    pub size: TerminalSize,
    pub log: Arc<ProcessLog>,
    events: mpsc::UnboundedSender<PtyEvent>,
}

impl FakeHandle {
    /// Emit a chunk of output from the process.
    pub fn output(&self, bytes: &[u8]) {
        let _ = self.events.send(PtyEvent::Data(bytes.to_vec()));
    }

    /// Terminate the process with `code`.
    pub fn exit(&self, code: Option<i32>) {
        let _ = self.events.send(PtyEvent::Exit(code));
    }
}

// ── Fake spawner ─────────────────────────────────────────────────────────────

/// Scriptable spawn primitive.
pub struct FakeSpawner {
    handles: Mutex<Vec<FakeHandle>>,
    attempts: Mutex<Vec<SpawnPlan>>,
    failing: Mutex<HashSet<String>>,
    gate: Option<Arc<Semaphore>>,
    on_kill: KillResponse,
    next_pid: AtomicUsize,
}

impl FakeSpawner {
    /// Spawner that succeeds immediately.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None, KillResponse::Exit))
    }

    /// Spawner whose processes survive a regular kill.
    pub fn stubborn() -> Arc<Self> {
        Arc::new(Self::build(None, KillResponse::IgnoreKill))
    }

    /// Spawner whose processes survive even a forced kill.
    pub fn unkillable() -> Arc<Self> {
        Arc::new(Self::build(None, KillResponse::IgnoreAll))
    }

    /// Spawner that blocks every spawn until [`open`](Self::open) is called.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::build(
            Some(Arc::new(Semaphore::new(0))),
            KillResponse::Exit,
        ))
    }

    fn build(gate: Option<Arc<Semaphore>>, on_kill: KillResponse) -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            gate,
            on_kill,
            next_pid: AtomicUsize::new(1000),
        }
    }

    /// Make spawns of `executable` fail.
    pub fn fail_on(&self, executable: &str) {
        self.failing.lock().unwrap().insert(executable.to_owned());
    }

    /// Let gated spawns proceed.
    pub fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    /// Every plan passed to `spawn`, successful or not.
    pub fn attempts(&self) -> Vec<SpawnPlan> {
        self.attempts.lock().unwrap().clone()
    }

    /// Successfully spawned processes, in order.
    pub fn handles(&self) -> Vec<FakeHandle> {
        self.handles.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Most recent successful spawn.
    pub fn last(&self) -> FakeHandle {
        self.handles
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("at least one spawned process")
    }
}

impl PtySpawner for FakeSpawner {
    fn spawn(
        &self,
        plan: &SpawnPlan,
        size: TerminalSize,
    ) -> Pin<Box<dyn Future<Output = Result<SpawnedProcess>> + Send + '_>> {
        let plan = plan.clone();
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate open").forget();
            }
            self.attempts.lock().unwrap().push(plan.clone());
            if self.failing.lock().unwrap().contains(&plan.executable) {
                return Err(AppError::Spawn(format!("cannot exec {}", plan.executable)));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let log = Arc::new(ProcessLog::default());
            let pid = u32::try_from(self.next_pid.fetch_add(1, Ordering::SeqCst)).unwrap();
            self.handles.lock().unwrap().push(FakeHandle {
                plan,
                size,
                log: Arc::clone(&log),
                events: tx.clone(),
            });

            Ok(SpawnedProcess {
                process: Box::new(FakeProcess {
                    log,
                    events: tx,
                    on_kill: self.on_kill,
                    pid,
                }),
                events: rx,
            })
        })
    }
}

// ── Resolver collaborators ───────────────────────────────────────────────────

/// Agent source returning one fixed configuration for every lane.
pub struct StaticAgentSource(pub AgentConfig);

impl AgentConfigSource for StaticAgentSource {
    fn lane_agent_config(
        &self,
        _lane_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<AgentConfig>> + Send + '_>> {
        let agent = self.0.clone();
        Box::pin(async move { Ok(agent) })
    }
}

/// Probe that knows a fixed set of commands.
#[derive(Default)]
pub struct FakeProbe {
    known: HashMap<String, PathBuf>,
}

impl FakeProbe {
    pub fn with(commands: &[(&str, &str)]) -> Self {
        Self {
            known: commands
                .iter()
                .map(|(name, path)| ((*name).to_owned(), PathBuf::from(path)))
                .collect(),
        }
    }
}

impl CommandProbe for FakeProbe {
    fn locate(&self, command: &str) -> Pin<Box<dyn Future<Output = Option<PathBuf>> + Send + '_>> {
        let found = self.known.get(command).cloned();
        Box::pin(async move { found })
    }
}

// ── Builders ─────────────────────────────────────────────────────────────────

pub fn test_settings(max: usize) -> PoolSettings {
    PoolSettings {
        max_concurrent_sessions: max,
        frame_interval: Duration::from_millis(16),
        release_grace: Duration::from_millis(500),
    }
}

pub fn test_resolver(agent: AgentConfig, probe: FakeProbe) -> Arc<SpawnResolver> {
    Arc::new(SpawnResolver::with_environment(
        Arc::new(StaticAgentSource(agent)),
        Arc::new(probe),
        TEST_SHELL.to_owned(),
        HashMap::from([("PATH".to_owned(), "/usr/bin:/bin".to_owned())]),
    ))
}

/// Pool running plain shells on `spawner`.
pub fn shell_pool(max: usize, spawner: &Arc<FakeSpawner>) -> SessionPool {
    SessionPool::new(
        test_settings(max),
        test_resolver(AgentConfig::shell_default(), FakeProbe::default()),
        Arc::clone(spawner) as Arc<dyn PtySpawner>,
    )
}

/// Receive the next event or panic after [`WAIT`].
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

/// Collect output until the `Exited` event and return it with the code.
pub async fn drain_until_exit(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> (Vec<u8>, Option<i32>) {
    let mut output = Vec::new();
    loop {
        match next_event(rx).await {
            SessionEvent::Output(bytes) => output.extend_from_slice(&bytes),
            SessionEvent::Exited { code } => return (output, code),
        }
    }
}
