//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::models::agent::{AgentConfig, AgentType};
use crate::{AppError, Result};

fn default_max_concurrent_sessions() -> u32 {
    10
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_release_grace_seconds() -> u64 {
    5
}

/// Per-lane settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LaneConfig {
    /// Agent used by this lane instead of the global default.
    #[serde(default)]
    pub agent_override: Option<AgentConfig>,
}

/// Global configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Maximum number of initializing or running sessions.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: u32,
    /// Output batching interval; one flush per frame at most.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// How long `release` waits for a killed process to exit.
    #[serde(default = "default_release_grace_seconds")]
    pub release_grace_seconds: u64,
    /// Login shell override; `$SHELL` is used when absent.
    #[serde(default)]
    pub shell: Option<String>,
    /// Agent used by lanes without an override.
    #[serde(default)]
    pub default_agent: AgentConfig,
    /// Lane-specific settings keyed by lane ID.
    #[serde(default)]
    pub lanes: HashMap<String, LaneConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: default_max_concurrent_sessions(),
            frame_interval_ms: default_frame_interval_ms(),
            release_grace_seconds: default_release_grace_seconds(),
            shell: None,
            default_agent: AgentConfig::default(),
            lanes: HashMap::new(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Output batching interval as a [`Duration`].
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Grace period granted to a killed process during release.
    #[must_use]
    pub fn release_grace(&self) -> Duration {
        Duration::from_secs(self.release_grace_seconds)
    }

    /// Resolve the agent for a lane: lane override, then global default.
    #[must_use]
    pub fn lane_agent_config(&self, lane_id: &str) -> AgentConfig {
        self.lanes
            .get(lane_id)
            .and_then(|lane| lane.agent_override.clone())
            .unwrap_or_else(|| self.default_agent.clone())
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(AppError::Config(
                "max_concurrent_sessions must be greater than zero".into(),
            ));
        }

        if self.frame_interval_ms == 0 {
            return Err(AppError::Config(
                "frame_interval_ms must be greater than zero".into(),
            ));
        }

        if self.shell.as_deref().is_some_and(|shell| shell.trim().is_empty()) {
            return Err(AppError::Config("shell must not be empty".into()));
        }

        validate_agent("default_agent", &self.default_agent)?;
        for (lane_id, lane) in &self.lanes {
            if let Some(agent) = &lane.agent_override {
                validate_agent(&format!("lanes.{lane_id}.agent_override"), agent)?;
            }
        }

        Ok(())
    }
}

fn validate_agent(field: &str, agent: &AgentConfig) -> Result<()> {
    if agent.agent_type != AgentType::Shell && agent.command.trim().is_empty() {
        return Err(AppError::Config(format!(
            "{field}.command must not be empty for agent type {}",
            agent.agent_type
        )));
    }
    Ok(())
}
