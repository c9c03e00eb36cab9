//! Spawn resolver: turns a session's declared intent into a [`SpawnPlan`].
//!
//! Agent sessions are probed before they are planned. A missing agent
//! degrades to the lane's login shell and raises an [`AgentUnavailable`]
//! notice on a broadcast channel, so the user still gets a working
//! terminal and the UI can explain why the agent did not start.
//!
//! - `shell`: login shell selection and environment layering.
//! - `probe`: `PATH` lookup via `which`.

pub mod probe;
pub mod shell;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::models::agent::{AgentConfig, AgentType};
use crate::models::plan::SpawnPlan;
use crate::models::session::{SessionConfig, SessionKey};
use crate::Result;

pub use probe::PathProbe;

/// Buffered notices per subscriber before old ones are dropped.
const UNAVAILABLE_CHANNEL_CAPACITY: usize = 32;

// ── Collaborator seams ───────────────────────────────────────────────────────

/// Supplies the agent configured for a lane.
pub trait AgentConfigSource: Send + Sync {
    /// Agent configuration for `lane_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings backing the lane cannot be read.
    fn lane_agent_config(
        &self,
        lane_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<AgentConfig>> + Send + '_>>;
}

/// Checks whether a command exists on the host.
pub trait CommandProbe: Send + Sync {
    /// Resolved path of `command`, or `None` when it cannot be found.
    fn locate(&self, command: &str) -> Pin<Box<dyn Future<Output = Option<PathBuf>> + Send + '_>>;
}

/// Agent source backed by the loaded TOML configuration.
#[derive(Debug, Clone)]
pub struct ConfigAgentSource {
    config: Arc<GlobalConfig>,
}

impl ConfigAgentSource {
    /// Wrap a loaded configuration.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self { config }
    }
}

impl AgentConfigSource for ConfigAgentSource {
    fn lane_agent_config(
        &self,
        lane_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<AgentConfig>> + Send + '_>> {
        let agent = self.config.lane_agent_config(lane_id);
        Box::pin(async move { Ok(agent) })
    }
}

// ── Resolution ───────────────────────────────────────────────────────────────

/// Notice that a lane's agent could not be started and a shell was used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentUnavailable {
    /// Lane whose agent is missing.
    pub lane_id: String,
    /// Configured agent type.
    pub agent_type: AgentType,
    /// Command that was looked up or spawned.
    pub command: String,
}

/// Outcome of resolving a session's intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Plan to spawn first.
    pub plan: SpawnPlan,
    /// Login shell plan to try when `plan` is an agent that fails to spawn.
    pub fallback: Option<SpawnPlan>,
    /// Agent that `plan` runs; reported through
    /// [`SpawnResolver::spawn_failed`] if the fallback is used.
    pub agent: Option<AgentUnavailable>,
}

impl Resolution {
    fn shell(plan: SpawnPlan) -> Self {
        Self {
            plan,
            fallback: None,
            agent: None,
        }
    }
}

/// Produces spawn plans for sessions.
pub struct SpawnResolver {
    agents: Arc<dyn AgentConfigSource>,
    probe: Arc<dyn CommandProbe>,
    shell: String,
    inherited: HashMap<String, String>,
    unavailable: broadcast::Sender<AgentUnavailable>,
}

impl std::fmt::Debug for SpawnResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnResolver")
            .field("shell", &self.shell)
            .field("inherited_vars", &self.inherited.len())
            .finish_non_exhaustive()
    }
}

impl SpawnResolver {
    /// Build a resolver using the host environment.
    ///
    /// The login shell is the configured `shell_override`, else `$SHELL`,
    /// else the platform default.
    #[must_use]
    pub fn new(
        agents: Arc<dyn AgentConfigSource>,
        probe: Arc<dyn CommandProbe>,
        shell_override: Option<&str>,
    ) -> Self {
        let env_shell = std::env::var("SHELL").ok();
        let shell = shell::select_shell(shell_override, env_shell.as_deref());
        Self::with_environment(agents, probe, shell, shell::inherited_env())
    }

    /// Build a resolver with an explicit shell and inherited environment.
    #[must_use]
    pub fn with_environment(
        agents: Arc<dyn AgentConfigSource>,
        probe: Arc<dyn CommandProbe>,
        shell: String,
        inherited: HashMap<String, String>,
    ) -> Self {
        let (unavailable, _) = broadcast::channel(UNAVAILABLE_CHANNEL_CAPACITY);
        Self {
            agents,
            probe,
            shell,
            inherited,
            unavailable,
        }
    }

    /// Resolver wired to the configuration and the `PATH` probe.
    #[must_use]
    pub fn from_config(config: &Arc<GlobalConfig>) -> Self {
        Self::new(
            Arc::new(ConfigAgentSource::new(Arc::clone(config))),
            Arc::new(PathProbe::new()),
            config.shell.as_deref(),
        )
    }

    /// Login shell used for shell plans and fallbacks.
    #[must_use]
    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Receive [`AgentUnavailable`] notices from now on.
    #[must_use]
    pub fn subscribe_unavailable(&self) -> broadcast::Receiver<AgentUnavailable> {
        self.unavailable.subscribe()
    }

    /// Report that an agent plan could not be spawned and the shell
    /// fallback is being used instead.
    pub fn spawn_failed(&self, agent: &AgentUnavailable) {
        warn!(
            lane_id = agent.lane_id,
            agent_type = %agent.agent_type,
            command = agent.command,
            "agent failed to spawn, falling back to shell"
        );
        self.notify(agent.clone());
    }

    fn notify(&self, notice: AgentUnavailable) {
        if self.unavailable.send(notice).is_err() {
            debug!("no agent-unavailable subscribers");
        }
    }

    /// Resolve `config` for `key` into a spawn plan. Never fails: every
    /// problem degrades to the login shell.
    pub async fn resolve(&self, key: &SessionKey, config: &SessionConfig) -> Resolution {
        if !config.use_agent {
            return Resolution::shell(self.shell_plan(key, config, config.cwd.clone()));
        }

        let agent = match self.agents.lane_agent_config(key.lane_id()).await {
            Ok(agent) => agent,
            Err(err) => {
                warn!(%key, %err, "failed to load lane agent config, using shell");
                return Resolution::shell(self.shell_plan(key, config, config.cwd.clone()));
            }
        };

        if agent.agent_type == AgentType::Shell {
            return Resolution::shell(self.shell_plan(key, config, config.cwd.clone()));
        }

        let cwd = if agent.use_lane_cwd {
            config.cwd.clone()
        } else {
            None
        };
        let shell_plan = self.shell_plan(key, config, cwd.clone());
        let identity = AgentUnavailable {
            lane_id: key.lane_id().to_owned(),
            agent_type: agent.agent_type,
            command: agent.command.clone(),
        };

        let Some(executable) = self.probe.locate(&agent.command).await else {
            info!(
                %key,
                agent_type = %agent.agent_type,
                command = agent.command,
                "agent not found, using shell"
            );
            self.notify(identity);
            return Resolution::shell(shell_plan);
        };

        let mut env = shell_plan.env.clone();
        env.extend(agent.env);

        debug!(%key, executable = %executable.display(), "agent located");
        Resolution {
            plan: SpawnPlan {
                executable: executable.to_string_lossy().into_owned(),
                args: agent.args,
                cwd,
                env,
            },
            fallback: Some(shell_plan),
            agent: Some(identity),
        }
    }

    /// Interactive login shell plan with the layered environment.
    fn shell_plan(
        &self,
        key: &SessionKey,
        config: &SessionConfig,
        cwd: Option<PathBuf>,
    ) -> SpawnPlan {
        let mut env = self.inherited.clone();
        env.extend(shell::base_env(key));
        env.extend(config.env.clone());
        SpawnPlan {
            executable: self.shell.clone(),
            args: shell::login_args(&self.shell),
            cwd,
            env,
        }
    }
}
