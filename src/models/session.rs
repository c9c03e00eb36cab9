//! Session identity, lifecycle status, and per-acquire configuration.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Separator placed between the lane and tab identifiers of a key.
const TAB_SEPARATOR: &str = "-tab-";

/// Largest accepted value for either terminal dimension.
pub const MAX_DIMENSION: u16 = 1000;

/// Composite identifier addressing at most one live session.
///
/// Rendered as `"<lane>"` for a lane's primary terminal and
/// `"<lane>-tab-<tab>"` for a secondary tab. Equality, hashing and
/// ordering use the rendered form, so `lane("a-tab-b")` and
/// `tab("a", "b")` address the same session.
#[derive(Debug, Clone)]
pub struct SessionKey {
    lane_id: String,
    tab_id: Option<String>,
    rendered: String,
}

impl SessionKey {
    /// Key for the primary terminal of a lane.
    #[must_use]
    pub fn lane(lane_id: impl Into<String>) -> Self {
        let lane_id = lane_id.into();
        Self {
            rendered: lane_id.clone(),
            lane_id,
            tab_id: None,
        }
    }

    /// Key for a secondary tab within a lane.
    #[must_use]
    pub fn tab(lane_id: impl Into<String>, tab_id: impl Into<String>) -> Self {
        let lane_id = lane_id.into();
        let tab_id = tab_id.into();
        Self {
            rendered: format!("{lane_id}{TAB_SEPARATOR}{tab_id}"),
            lane_id,
            tab_id: Some(tab_id),
        }
    }

    /// Parse a rendered key back into its lane and tab parts.
    ///
    /// The first `-tab-` occurrence splits the lane from the tab.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(TAB_SEPARATOR) {
            Some((lane, tab)) if !lane.is_empty() && !tab.is_empty() => Self::tab(lane, tab),
            _ => Self::lane(raw),
        }
    }

    /// Lane this session belongs to.
    #[must_use]
    pub fn lane_id(&self) -> &str {
        &self.lane_id
    }

    /// Tab within the lane, if this is not the lane's primary terminal.
    #[must_use]
    pub fn tab_id(&self) -> Option<&str> {
        self.tab_id.as_deref()
    }

    /// Rendered key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.rendered == other.rendered
    }
}

impl Eq for SessionKey {}

impl Hash for SessionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rendered.hash(state);
    }
}

impl PartialOrd for SessionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SessionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rendered.cmp(&other.rendered)
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl From<&str> for SessionKey {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// Lifecycle status of a pooled session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Entry published; the process is still being spawned.
    Initializing,
    /// Process running and wired to the session.
    Ready,
    /// Process terminated, on its own or via kill.
    Exited,
    /// Neither the requested command nor the fallback shell could start.
    Failed,
}

impl SessionStatus {
    /// Whether the status counts against the pool's concurrency limit.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Initializing | Self::Ready)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Ready | Self::Failed) | (Self::Ready, Self::Exited)
        )
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TerminalSize {
    /// Number of columns.
    pub cols: u16,
    /// Number of rows.
    pub rows: u16,
}

impl TerminalSize {
    /// Validate and build a terminal size.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidSize` if either dimension is zero or
    /// larger than [`MAX_DIMENSION`].
    pub fn new(cols: u16, rows: u16) -> Result<Self> {
        if cols == 0 || rows == 0 {
            return Err(AppError::InvalidSize(format!(
                "terminal dimensions must be greater than 0 (got {cols}x{rows})"
            )));
        }
        if cols > MAX_DIMENSION || rows > MAX_DIMENSION {
            return Err(AppError::InvalidSize(format!(
                "terminal dimensions too large (got {cols}x{rows}, max {MAX_DIMENSION}x{MAX_DIMENSION})"
            )));
        }
        Ok(Self { cols, rows })
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl Display for TerminalSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Caller-supplied intent for a session, built before each `acquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Working directory requested by the caller (usually the lane root).
    pub cwd: Option<PathBuf>,
    /// Run the lane's configured agent instead of a plain shell.
    pub use_agent: bool,
    /// Extra environment variables for the child process.
    pub env: HashMap<String, String>,
    /// Initial column count.
    pub desired_cols: u16,
    /// Initial row count.
    pub desired_rows: u16,
}

impl SessionConfig {
    /// Plain shell session in the given directory.
    #[must_use]
    pub fn shell(cwd: Option<PathBuf>) -> Self {
        Self {
            cwd,
            ..Self::default()
        }
    }

    /// Agent session in the given directory.
    #[must_use]
    pub fn agent(cwd: Option<PathBuf>) -> Self {
        Self {
            cwd,
            use_agent: true,
            ..Self::default()
        }
    }

    /// Validated initial terminal size.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidSize` if the desired size is out of range.
    pub fn size(&self) -> Result<TerminalSize> {
        TerminalSize::new(self.desired_cols, self.desired_rows)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let size = TerminalSize::default();
        Self {
            cwd: None,
            use_agent: false,
            env: HashMap::new(),
            desired_cols: size.cols,
            desired_rows: size.rows,
        }
    }
}

/// Serializable snapshot of a session for display and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionInfo {
    /// Rendered session key.
    pub key: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Current column count.
    pub cols: u16,
    /// Current row count.
    pub rows: u16,
    /// OS process ID, once spawned.
    pub pid: Option<u32>,
    /// Exit code, once exited.
    pub exit_code: Option<i32>,
    /// Failure message for sessions that could not start.
    pub failure: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
