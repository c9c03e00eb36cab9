//! Concrete spawn instructions produced by the resolver.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Executable, arguments, directory, and environment for one PTY process.
///
/// Immutable once produced; the session hands it to the spawn primitive
/// unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SpawnPlan {
    /// Program to execute.
    pub executable: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Working directory; `None` lets the spawner pick the home directory.
    pub cwd: Option<PathBuf>,
    /// Complete child environment.
    pub env: HashMap<String, String>,
}

impl SpawnPlan {
    /// Human-readable command line for logs and error banners.
    #[must_use]
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.executable.clone()
        } else {
            format!("{} {}", self.executable, self.args.join(" "))
        }
    }
}
