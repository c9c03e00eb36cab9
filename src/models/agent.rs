//! External CLI agent descriptions and presets.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Kind of program a lane runs in its primary terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Claude Code CLI.
    Claude,
    /// Cursor CLI.
    Cursor,
    /// Aider CLI.
    Aider,
    /// Plain login shell; no probing or fallback involved.
    Shell,
}

impl AgentType {
    /// Lowercase identifier used in configuration and notifications.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Cursor => "cursor",
            Self::Aider => "aider",
            Self::Shell => "shell",
        }
    }
}

impl Display for AgentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// Command line and environment for a lane's agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Type of agent.
    pub agent_type: AgentType,
    /// Command to execute; a bare name is looked up on `PATH`.
    pub command: String,
    /// CLI arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Agent-specific environment; wins over the base environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Start in the lane's working directory.
    #[serde(default = "default_true")]
    pub use_lane_cwd: bool,
}

impl AgentConfig {
    /// Plain shell; the resolver substitutes the configured login shell.
    #[must_use]
    pub fn shell_default() -> Self {
        Self::preset(AgentType::Shell, "")
    }

    /// Claude Code preset.
    #[must_use]
    pub fn claude_preset() -> Self {
        Self::preset(AgentType::Claude, "claude")
    }

    /// Cursor preset.
    #[must_use]
    pub fn cursor_preset() -> Self {
        Self::preset(AgentType::Cursor, "cursor")
    }

    /// Aider preset.
    #[must_use]
    pub fn aider_preset() -> Self {
        Self::preset(AgentType::Aider, "aider")
    }

    /// Preset for an agent type.
    #[must_use]
    pub fn for_type(agent_type: AgentType) -> Self {
        match agent_type {
            AgentType::Claude => Self::claude_preset(),
            AgentType::Cursor => Self::cursor_preset(),
            AgentType::Aider => Self::aider_preset(),
            AgentType::Shell => Self::shell_default(),
        }
    }

    fn preset(agent_type: AgentType, command: &str) -> Self {
        Self {
            agent_type,
            command: command.to_owned(),
            args: Vec::new(),
            env: HashMap::new(),
            use_lane_cwd: true,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::shell_default()
    }
}
