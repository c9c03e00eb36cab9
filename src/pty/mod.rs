//! Process-spawn primitive seam.
//!
//! The pool never touches OS PTY APIs directly. It asks a [`PtySpawner`]
//! for a [`SpawnedProcess`]: a [`PtyProcess`] handle for input, resize, and
//! kill, plus a channel of [`PtyEvent`]s carrying raw output chunks and the
//! final exit notification.
//!
//! - `native`: production spawner backed by `portable-pty`.

pub mod native;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::models::plan::SpawnPlan;
use crate::models::session::TerminalSize;
use crate::Result;

pub use native::NativePtySpawner;

/// Raw event emitted by a running PTY process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// A chunk of output exactly as read from the PTY master.
    Data(Vec<u8>),
    /// The process terminated; no further events follow.
    Exit(Option<i32>),
}

/// Live handle to a spawned PTY process.
///
/// Calls are synchronous and must return promptly: input is handed to the
/// process in order without waiting for the child to read it.
pub trait PtyProcess: Send + Sync {
    /// Write input bytes to the PTY.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pty` if the write fails.
    fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Resize the PTY.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pty` if the resize fails.
    fn resize(&self, size: TerminalSize) -> Result<()>;

    /// Terminate the process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pty` if the signal cannot be delivered.
    fn kill(&self) -> Result<()>;

    /// Terminate the process with a signal it cannot ignore.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pty` if the signal cannot be delivered.
    fn force_kill(&self) -> Result<()>;

    /// OS process ID, when the platform reports one.
    fn pid(&self) -> Option<u32>;
}

/// Result of a successful spawn.
pub struct SpawnedProcess {
    /// Handle for input, resize, and kill.
    pub process: Box<dyn PtyProcess>,
    /// Output chunks followed by exactly one [`PtyEvent::Exit`].
    pub events: mpsc::UnboundedReceiver<PtyEvent>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.process.pid())
            .finish_non_exhaustive()
    }
}

/// OS-level fork/exec under a pseudo-terminal.
pub trait PtySpawner: Send + Sync {
    /// Spawn `plan` in a new PTY of the given size.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the PTY cannot be opened or the
    /// command cannot be started.
    fn spawn(
        &self,
        plan: &SpawnPlan,
        size: TerminalSize,
    ) -> Pin<Box<dyn Future<Output = Result<SpawnedProcess>> + Send + '_>>;
}
