//! PTY bridge: one live process plus its I/O state.
//!
//! A [`Session`] is a cheap, cloneable handle. The pool owns the canonical
//! copy; UI code holds clones to write input, resize, and consume events.
//!
//! Input is forwarded to the process immediately. Output is accumulated
//! by an [`OutputBatcher`] and delivered at most once per frame interval
//! as a single [`SessionEvent::Output`], which bounds display updates no
//! matter how fast the child writes. Exit is reported exactly once via
//! [`SessionEvent::Exited`], always after the last output.

pub mod batcher;

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::models::plan::SpawnPlan;
use crate::models::session::{SessionInfo, SessionKey, SessionStatus, TerminalSize};
use crate::pty::{PtyEvent, PtyProcess, PtySpawner};
use crate::{AppError, Result};

pub use batcher::OutputBatcher;

/// Event delivered to a session's subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// All output accumulated during one frame, in original order.
    Output(Vec<u8>),
    /// The process terminated. Sent once, after the final output.
    Exited {
        /// Process exit code, if available.
        code: Option<i32>,
    },
}

/// Exit notification bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitDelivery {
    /// Process still running (or never started).
    Running,
    /// Exited, but no subscriber has been told yet.
    Pending(Option<i32>),
    /// Subscriber notified.
    Delivered,
}

/// Mutable session state guarded by one async mutex.
struct SessionState {
    process: Option<Arc<dyn PtyProcess>>,
    size: TerminalSize,
    pending_resize: Option<TerminalSize>,
    kill_requested: bool,
    killed: bool,
    batcher: OutputBatcher,
    subscriber: Option<mpsc::UnboundedSender<SessionEvent>>,
    exit: ExitDelivery,
    exit_code: Option<i32>,
    pid: Option<u32>,
    failure: Option<String>,
    pump: Option<JoinHandle<()>>,
}

impl SessionState {
    /// Deliver buffered output to the subscriber, if one is attached.
    ///
    /// Bytes are retained when nobody is listening or the receiver is gone.
    fn flush(&mut self) {
        let Some(subscriber) = &self.subscriber else {
            return;
        };
        let Some(bytes) = self.batcher.take() else {
            return;
        };
        if let Err(err) = subscriber.send(SessionEvent::Output(bytes)) {
            self.subscriber = None;
            if let SessionEvent::Output(bytes) = err.0 {
                self.batcher.restore(bytes);
            }
        }
    }

    /// Deliver a pending exit notification after flushing output.
    fn deliver_exit(&mut self) {
        self.flush();
        let ExitDelivery::Pending(code) = self.exit else {
            return;
        };
        if let Some(subscriber) = &self.subscriber {
            if subscriber.send(SessionEvent::Exited { code }).is_ok() {
                self.exit = ExitDelivery::Delivered;
            } else {
                self.subscriber = None;
            }
        }
    }
}

struct SessionInner {
    key: SessionKey,
    created_at: DateTime<Utc>,
    frame_interval: Duration,
    status: watch::Sender<SessionStatus>,
    state: Mutex<SessionState>,
}

impl SessionInner {
    fn transition(&self, next: SessionStatus) -> bool {
        let changed = self.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(key = %self.key, status = ?next, "session status changed");
        }
        changed
    }

    /// Handle process termination reported by the pump.
    async fn finish(&self, code: Option<i32>) {
        let mut state = self.state.lock().await;
        state.process = None;
        state.exit_code = code;
        state.exit = ExitDelivery::Pending(code);
        self.transition(SessionStatus::Exited);
        state.deliver_exit();
        info!(key = %self.key, ?code, "session exited");
    }
}

/// Handle to one PTY-backed session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.inner.key)
            .field("status", &self.status())
            .field("created_at", &self.inner.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session in the `Initializing` state with no process yet.
    #[must_use]
    pub fn new(key: SessionKey, size: TerminalSize, frame_interval: Duration) -> Self {
        let (status, _) = watch::channel(SessionStatus::Initializing);
        Self {
            inner: Arc::new(SessionInner {
                key,
                created_at: Utc::now(),
                frame_interval,
                status,
                state: Mutex::new(SessionState {
                    process: None,
                    size,
                    pending_resize: None,
                    kill_requested: false,
                    killed: false,
                    batcher: OutputBatcher::new(),
                    subscriber: None,
                    exit: ExitDelivery::Running,
                    exit_code: None,
                    pid: None,
                    failure: None,
                    pump: None,
                }),
            }),
        }
    }

    /// Spawn `plan` through `spawner` and wire the process to this session.
    ///
    /// On success the session becomes `Ready`, any resize requested while
    /// spawning is applied, and a kill requested while spawning is carried
    /// out. On failure the session stays `Initializing` so the caller may
    /// retry with a fallback plan or call [`fail`](Self::fail).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the session is no longer initializing
    /// or the spawn primitive fails.
    pub async fn launch(
        &self,
        spawner: &dyn PtySpawner,
        plan: &SpawnPlan,
        size: TerminalSize,
    ) -> Result<()> {
        if self.status() != SessionStatus::Initializing {
            return Err(AppError::Spawn(format!(
                "session {} already launched",
                self.inner.key
            )));
        }

        let spawned = spawner.spawn(plan, size).await?;

        let mut state = self.inner.state.lock().await;
        let process: Arc<dyn PtyProcess> = Arc::from(spawned.process);
        state.pid = process.pid();
        state.size = size;

        if let Some(queued) = state.pending_resize.take() {
            if queued == size {
                debug!(key = %self.inner.key, %queued, "queued resize matches spawn size");
            } else {
                match process.resize(queued) {
                    Ok(()) => {
                        state.size = queued;
                        debug!(key = %self.inner.key, %queued, "applied queued resize");
                    }
                    Err(err) => warn!(key = %self.inner.key, %err, "failed to apply queued resize"),
                }
            }
        }

        if !self.inner.transition(SessionStatus::Ready) {
            if let Err(err) = process.kill() {
                warn!(key = %self.inner.key, %err, "failed to kill orphaned process");
            }
            return Err(AppError::Spawn(format!(
                "session {} left initializing during spawn",
                self.inner.key
            )));
        }
        state.process = Some(process);

        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!("session_pump", key = %self.inner.key);
        state.pump = Some(tokio::spawn(pump(inner, spawned.events).instrument(span)));

        info!(
            key = %self.inner.key,
            pid = state.pid,
            command = plan.command_line(),
            "session ready"
        );

        if state.kill_requested {
            debug!(key = %self.inner.key, "applying kill requested during spawn");
            kill_locked(&self.inner.key, &mut state);
        }

        Ok(())
    }

    /// Mark an initializing session as failed and render the error into
    /// its output stream, since the user has no other terminal to act on.
    pub async fn fail(&self, error: &AppError) {
        let mut state = self.inner.state.lock().await;
        if !self.inner.transition(SessionStatus::Failed) {
            return;
        }
        let message = error.to_string();
        warn!(key = %self.inner.key, error = %message, "session failed to start");
        state.batcher.push(failure_banner(&message).as_bytes());
        state.failure = Some(message);
        state.flush();
    }

    /// Attach the single output subscriber, replacing any previous one.
    ///
    /// Output retained while nobody was listening is delivered at once, as
    /// is an exit that no subscriber has seen yet.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock().await;
        if state.subscriber.replace(tx).is_some() {
            debug!(key = %self.inner.key, "previous subscriber replaced");
        }
        state.deliver_exit();
        rx
    }

    /// Forward input bytes to the process without batching.
    ///
    /// A no-op when the process is not running (still spawning, exited,
    /// or failed). The state lock is released before the bytes reach the
    /// process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pty` if the write to a running process fails.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let process = {
            let state = self.inner.state.lock().await;
            match &state.process {
                Some(process) if self.status() == SessionStatus::Ready => Some(Arc::clone(process)),
                _ => None,
            }
        };
        match process {
            Some(process) => process.write(bytes),
            None => {
                debug!(
                    key = %self.inner.key,
                    status = ?self.status(),
                    len = bytes.len(),
                    "write ignored: process not running"
                );
                Ok(())
            }
        }
    }

    /// Resize the terminal.
    ///
    /// While the session is initializing the request is queued and applied
    /// once the process exists; only the latest queued size is kept.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pty` if the running process rejects the resize.
    pub async fn resize(&self, size: TerminalSize) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        match self.status() {
            SessionStatus::Initializing => {
                debug!(key = %self.inner.key, %size, "resize queued until spawn completes");
                state.pending_resize = Some(size);
                Ok(())
            }
            SessionStatus::Ready => {
                if state.size == size {
                    return Ok(());
                }
                if let Some(process) = &state.process {
                    process.resize(size)?;
                }
                state.size = size;
                debug!(key = %self.inner.key, %size, "session resized");
                Ok(())
            }
            SessionStatus::Exited | SessionStatus::Failed => Ok(()),
        }
    }

    /// Terminate the process. Idempotent.
    ///
    /// Buffered output is flushed first. A kill issued while the session
    /// is still initializing is applied as soon as spawning completes.
    pub async fn kill(&self) {
        let mut state = self.inner.state.lock().await;
        match self.status() {
            SessionStatus::Initializing => state.kill_requested = true,
            SessionStatus::Ready => kill_locked(&self.inner.key, &mut state),
            SessionStatus::Exited | SessionStatus::Failed => {}
        }
    }

    /// Send the process a signal it cannot ignore.
    ///
    /// Used once a regular [`kill`](Self::kill) has had its grace period.
    /// A no-op unless the process is running.
    pub async fn force_kill(&self) {
        let state = self.inner.state.lock().await;
        if self.status() != SessionStatus::Ready {
            return;
        }
        if let Some(process) = &state.process {
            match process.force_kill() {
                Ok(()) => warn!(key = %self.inner.key, pid = state.pid, "process force-killed"),
                Err(err) => warn!(key = %self.inner.key, %err, "failed to force-kill session process"),
            }
        }
    }

    /// Flush remaining output, detach the subscriber, and stop the pump.
    pub async fn dispose(&self) {
        let mut state = self.inner.state.lock().await;
        state.deliver_exit();
        state.subscriber = None;
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        debug!(key = %self.inner.key, "session disposed");
    }

    /// Wait until the session leaves `Initializing` and return the new status.
    pub async fn settled(&self) -> SessionStatus {
        let mut rx = self.inner.status.subscribe();
        let settled = rx
            .wait_for(|status| *status != SessionStatus::Initializing)
            .await
            .map(|status| *status);
        settled.unwrap_or_else(|_| self.status())
    }

    /// Wait up to `timeout` for the process to exit.
    ///
    /// Returns `true` if the session is `Exited` (or `Failed`) in time.
    pub async fn wait_exit(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.status.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|status| matches!(status, SessionStatus::Exited | SessionStatus::Failed)),
        )
        .await;
        matches!(waited, Ok(Ok(_)))
    }

    /// Key this session is registered under.
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.inner.key
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Whether two handles refer to the same session.
    #[must_use]
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current terminal size.
    pub async fn size(&self) -> TerminalSize {
        self.inner.state.lock().await.size
    }

    /// OS process ID, once spawned.
    pub async fn pid(&self) -> Option<u32> {
        self.inner.state.lock().await.pid
    }

    /// Process exit code, once exited.
    pub async fn exit_code(&self) -> Option<i32> {
        self.inner.state.lock().await.exit_code
    }

    /// Failure message, for sessions that could not start.
    pub async fn failure(&self) -> Option<String> {
        self.inner.state.lock().await.failure.clone()
    }

    /// Serializable snapshot.
    pub async fn info(&self) -> SessionInfo {
        let state = self.inner.state.lock().await;
        SessionInfo {
            key: self.inner.key.to_string(),
            status: self.status(),
            cols: state.size.cols,
            rows: state.size.rows,
            pid: state.pid,
            exit_code: state.exit_code,
            failure: state.failure.clone(),
            created_at: self.inner.created_at,
        }
    }
}

fn kill_locked(key: &SessionKey, state: &mut SessionState) {
    if state.killed {
        return;
    }
    state.killed = true;
    state.flush();
    if let Some(process) = &state.process {
        match process.kill() {
            Ok(()) => info!(%key, pid = state.pid, "kill signal sent"),
            Err(err) => warn!(%key, %err, "failed to kill session process"),
        }
    }
}

fn failure_banner(message: &str) -> String {
    format!("\r\n\x1b[31mfailed to start terminal: {message}\x1b[0m\r\n")
}

/// Relay process events into the session, flushing once per frame.
async fn pump(inner: Arc<SessionInner>, mut events: mpsc::UnboundedReceiver<PtyEvent>) {
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                inner.state.lock().await.flush();
            }

            event = events.recv() => match event {
                Some(PtyEvent::Data(chunk)) => {
                    let mut state = inner.state.lock().await;
                    if state.batcher.push(&chunk) && deadline.is_none() {
                        deadline = Some(Instant::now() + inner.frame_interval);
                    }
                }
                Some(PtyEvent::Exit(code)) => {
                    inner.finish(code).await;
                    break;
                }
                None => {
                    debug!(key = %inner.key, "pty event channel closed without exit status");
                    inner.finish(None).await;
                    break;
                }
            },
        }
    }
}
