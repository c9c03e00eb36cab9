//! Error types shared across the session pool.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// A missing agent command is not an error; it is reported as an
/// [`AgentUnavailable`](crate::resolver::AgentUnavailable) notification.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The pool already holds the maximum number of live sessions.
    ResourceExhausted(String),
    /// The process-spawn primitive could not start the requested command.
    Spawn(String),
    /// PTY write, resize, or kill failure on a running process.
    Pty(String),
    /// Terminal dimensions outside the accepted range.
    InvalidSize(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::ResourceExhausted(msg) => write!(f, "resource exhausted: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Pty(msg) => write!(f, "pty: {msg}"),
            Self::InvalidSize(msg) => write!(f, "invalid size: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
