//! Session pool: the only entry point the UI uses.
//!
//! Sessions are created lazily on first `acquire` of a key and live until
//! `release`. The check for an existing entry, the capacity check, and the
//! publication of a new `Initializing` entry happen under one lock
//! acquisition, so concurrent acquires of one key always share a session
//! and the concurrency limit cannot be overshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::session::{SessionConfig, SessionInfo, SessionKey, TerminalSize};
use crate::pty::{NativePtySpawner, PtySpawner};
use crate::resolver::{AgentUnavailable, SpawnResolver};
use crate::session::Session;
use crate::{AppError, Result};

/// How long `release` waits for a force-killed process to be reaped.
const FORCE_KILL_WAIT: Duration = Duration::from_secs(2);

/// Pool tuning taken from [`GlobalConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum number of initializing or ready sessions.
    pub max_concurrent_sessions: usize,
    /// Output batching interval handed to each session.
    pub frame_interval: Duration,
    /// How long `release` waits for a killed process to exit.
    pub release_grace: Duration,
}

impl From<&GlobalConfig> for PoolSettings {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            max_concurrent_sessions: usize::try_from(config.max_concurrent_sessions)
                .unwrap_or(usize::MAX),
            frame_interval: config.frame_interval(),
            release_grace: config.release_grace(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&GlobalConfig::default())
    }
}

enum PoolEntry {
    Live(Session),
    Releasing {
        session: Session,
        done: watch::Receiver<bool>,
    },
}

impl PoolEntry {
    fn session(&self) -> &Session {
        match self {
            Self::Live(session) | Self::Releasing { session, .. } => session,
        }
    }
}

/// What `acquire` must do after inspecting the map.
enum Lookup {
    Reuse(Session),
    AwaitRelease(watch::Receiver<bool>),
    Created(Session),
}

struct PoolInner {
    entries: Mutex<HashMap<SessionKey, PoolEntry>>,
    settings: PoolSettings,
    resolver: Arc<SpawnResolver>,
    spawner: Arc<dyn PtySpawner>,
}

impl PoolInner {
    /// Resolve and launch a freshly published session.
    ///
    /// An agent plan that fails to spawn is retried with the login shell;
    /// if nothing can start, the session is marked failed.
    async fn start(&self, session: &Session, config: &SessionConfig, size: TerminalSize) {
        let resolution = self.resolver.resolve(session.key(), config).await;

        let mut error = match session
            .launch(self.spawner.as_ref(), &resolution.plan, size)
            .await
        {
            Ok(()) => return,
            Err(err) => err,
        };

        if let Some(fallback) = &resolution.fallback {
            warn!(
                %error,
                command = resolution.plan.command_line(),
                "primary spawn failed, trying login shell"
            );
            if let Some(agent) = &resolution.agent {
                self.resolver.spawn_failed(agent);
            }
            match session.launch(self.spawner.as_ref(), fallback, size).await {
                Ok(()) => return,
                Err(err) => error = err,
            }
        }

        session.fail(&error).await;
    }

    async fn live_count(&self) -> usize {
        let entries = self.entries.lock().await;
        count_live(&entries)
    }
}

fn count_live(entries: &HashMap<SessionKey, PoolEntry>) -> usize {
    entries
        .values()
        .filter(|entry| entry.session().status().is_live())
        .count()
}

/// Keyed pool of PTY sessions.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Create a pool with injected collaborators.
    #[must_use]
    pub fn new(
        settings: PoolSettings,
        resolver: Arc<SpawnResolver>,
        spawner: Arc<dyn PtySpawner>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                entries: Mutex::new(HashMap::new()),
                settings,
                resolver,
                spawner,
            }),
        }
    }

    /// Pool wired to the configuration, `PATH` probe, and native PTYs.
    #[must_use]
    pub fn from_config(config: &Arc<GlobalConfig>) -> Self {
        Self::new(
            PoolSettings::from(config.as_ref()),
            Arc::new(SpawnResolver::from_config(config)),
            Arc::new(NativePtySpawner::new()),
        )
    }

    /// Pool settings in effect.
    #[must_use]
    pub fn settings(&self) -> PoolSettings {
        self.inner.settings
    }

    /// Return the session for `key`, creating it if needed.
    ///
    /// Concurrent calls for the same key share one session. The returned
    /// session is `Ready`, or `Failed` with the error rendered into its
    /// output stream.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidSize` if the requested size is out of
    /// range, or `AppError::ResourceExhausted` if the pool is full.
    pub async fn acquire(&self, key: &SessionKey, config: SessionConfig) -> Result<Session> {
        let span = info_span!("acquire", %key, use_agent = config.use_agent);
        self.acquire_inner(key, config).instrument(span).await
    }

    async fn acquire_inner(&self, key: &SessionKey, config: SessionConfig) -> Result<Session> {
        let size = config.size()?;

        loop {
            let (lookup, stale) = self.lookup_or_publish(key, size).await?;

            if let Some(stale) = stale {
                debug!(status = ?stale.status(), "replacing finished session");
                stale.dispose().await;
            }

            match lookup {
                Lookup::Reuse(session) => {
                    debug!("reusing existing session");
                    session.settled().await;
                    return Ok(session);
                }
                Lookup::AwaitRelease(mut done) => {
                    debug!("waiting for in-flight release");
                    let _ = done.wait_for(|released| *released).await;
                }
                Lookup::Created(session) => {
                    let inner = Arc::clone(&self.inner);
                    let task_session = session.clone();
                    let span = info_span!("start_session", key = %key);
                    tokio::spawn(
                        async move { inner.start(&task_session, &config, size).await }
                            .instrument(span),
                    );
                    let status = session.settled().await;
                    info!(?status, "session acquired");
                    return Ok(session);
                }
            }
        }
    }

    /// Inspect the map under one lock and publish a new session on a miss.
    async fn lookup_or_publish(
        &self,
        key: &SessionKey,
        size: TerminalSize,
    ) -> Result<(Lookup, Option<Session>)> {
        let mut entries = self.inner.entries.lock().await;

        match entries.get(key) {
            Some(PoolEntry::Live(session)) if session.status().is_live() => {
                return Ok((Lookup::Reuse(session.clone()), None));
            }
            Some(PoolEntry::Releasing { done, .. }) if done.has_changed().is_ok() => {
                return Ok((Lookup::AwaitRelease(done.clone()), None));
            }
            Some(_) | None => {}
        }
        // Anything still registered here has exited, failed, or lost its releaser.
        let stale = entries.remove(key).map(|entry| entry.session().clone());

        let live = count_live(&entries);
        let max = self.inner.settings.max_concurrent_sessions;
        if live >= max {
            warn!(live, max, "session limit reached");
            drop(entries);
            if let Some(stale) = stale {
                stale.dispose().await;
            }
            return Err(AppError::ResourceExhausted(format!(
                "maximum concurrent sessions reached ({live}/{max})"
            )));
        }

        let session = Session::new(key.clone(), size, self.inner.settings.frame_interval);
        entries.insert(key.clone(), PoolEntry::Live(session.clone()));
        info!(live = live + 1, max, %size, "session published");

        Ok((Lookup::Created(session), stale))
    }

    /// Kill and remove the session for `key`.
    ///
    /// Waits for an in-progress spawn to settle, then for the process to
    /// exit. A process still running after the release grace period is
    /// force-killed. Unknown keys are ignored; a concurrent release of the
    /// same key waits for the first one.
    pub async fn release(&self, key: &SessionKey) {
        let span = info_span!("release", %key);
        self.release_inner(key).instrument(span).await;
    }

    async fn release_inner(&self, key: &SessionKey) {
        let (session, done) = {
            let mut entries = self.inner.entries.lock().await;
            let existing = entries.get(key).map(|entry| match entry {
                PoolEntry::Live(session) => Ok(session.clone()),
                PoolEntry::Releasing { done, .. } => Err(done.clone()),
            });
            let session = match existing {
                None => {
                    info!("release of unknown session ignored");
                    return;
                }
                Some(Err(mut in_flight)) => {
                    drop(entries);
                    let _ = in_flight.wait_for(|released| *released).await;
                    return;
                }
                Some(Ok(session)) => session,
            };
            let (done, rx) = watch::channel(false);
            entries.insert(
                key.clone(),
                PoolEntry::Releasing {
                    session: session.clone(),
                    done: rx,
                },
            );
            (session, done)
        };

        session.settled().await;
        session.kill().await;

        let grace = self.inner.settings.release_grace;
        if !session.wait_exit(grace).await {
            warn!(
                grace_ms = grace.as_millis(),
                "session did not exit within grace period, forcing kill"
            );
            session.force_kill().await;
            if !session.wait_exit(FORCE_KILL_WAIT).await {
                warn!("session still running after forced kill");
            }
        }
        session.dispose().await;

        {
            let mut entries = self.inner.entries.lock().await;
            if entries
                .get(key)
                .is_some_and(|entry| entry.session().ptr_eq(&session))
            {
                entries.remove(key);
            }
        }
        let _ = done.send(true);

        let exit_code = session.exit_code().await;
        info!(?exit_code, "session released");
    }

    /// Resize the session for `key`. Invalid sizes and unknown keys are
    /// logged and ignored.
    pub async fn resize(&self, key: &SessionKey, cols: u16, rows: u16) {
        let size = match TerminalSize::new(cols, rows) {
            Ok(size) => size,
            Err(err) => {
                warn!(%key, %err, "ignoring invalid resize");
                return;
            }
        };

        let Some(session) = self.get_handle(key).await else {
            warn!(%key, %size, "resize for unknown session ignored");
            return;
        };

        if let Err(err) = session.resize(size).await {
            warn!(%key, %err, "session resize failed");
        }
    }

    /// Handle to the session for `key`, if one is registered and not
    /// being released.
    pub async fn get_handle(&self, key: &SessionKey) -> Option<Session> {
        match self.inner.entries.lock().await.get(key) {
            Some(PoolEntry::Live(session)) => Some(session.clone()),
            Some(PoolEntry::Releasing { .. }) | None => None,
        }
    }

    /// Release every session concurrently and wait for all of them.
    pub async fn cleanup(&self) {
        let keys = self.keys().await;
        info!(count = keys.len(), "cleaning up session pool");

        let mut releases = JoinSet::new();
        for key in keys {
            let pool = self.clone();
            releases.spawn(async move { pool.release(&key).await });
        }
        while let Some(joined) = releases.join_next().await {
            if let Err(err) = joined {
                warn!(%err, "release task failed during cleanup");
            }
        }
    }

    /// Registered keys, sorted.
    pub async fn keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.inner.entries.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of initializing or ready sessions.
    pub async fn live_count(&self) -> usize {
        self.inner.live_count().await
    }

    /// Snapshot of the session for `key`.
    pub async fn info(&self, key: &SessionKey) -> Option<SessionInfo> {
        let session = self
            .inner
            .entries
            .lock()
            .await
            .get(key)
            .map(|entry| entry.session().clone())?;
        Some(session.info().await)
    }

    /// Receive notices about agents replaced by a login shell.
    #[must_use]
    pub fn subscribe_agent_unavailable(&self) -> broadcast::Receiver<AgentUnavailable> {
        self.inner.resolver.subscribe_unavailable()
    }
}
