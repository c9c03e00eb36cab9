#![forbid(unsafe_code)]

//! `lane-pty`: pooled pseudo-terminal sessions for lane-based workspaces.
//!
//! One PTY-backed session per lane or tab, created lazily through
//! [`pool::SessionPool`], with frame-batched output and a login-shell
//! fallback when a lane's agent CLI is missing.

pub mod config;
pub mod errors;
pub mod models;
pub mod pool;
pub mod pty;
pub mod resolver;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use models::session::{SessionConfig, SessionKey, SessionStatus, TerminalSize};
pub use pool::SessionPool;
pub use session::{Session, SessionEvent};
