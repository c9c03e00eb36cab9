//! Executable lookup on the host.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::debug;

use crate::resolver::CommandProbe;

/// Production probe: absolute paths are checked directly, bare names are
/// searched on `PATH` with the `which` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathProbe;

impl PathProbe {
    /// Create a new probe.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn locate_blocking(command: &str) -> Option<PathBuf> {
    let path = Path::new(command);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    match which::which(command) {
        Ok(found) => Some(found),
        Err(err) => {
            debug!(command, %err, "command not found on PATH");
            None
        }
    }
}

impl CommandProbe for PathProbe {
    fn locate(&self, command: &str) -> Pin<Box<dyn Future<Output = Option<PathBuf>> + Send + '_>> {
        let command = command.trim().to_owned();
        Box::pin(async move {
            if command.is_empty() {
                return None;
            }
            tokio::task::spawn_blocking(move || locate_blocking(&command))
                .await
                .ok()
                .flatten()
        })
    }
}
