// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The container-exclusive scheduler.
//!
//! At most one managed game container runs at a time. Start replaces
//! whatever is active, Stop is explicit, and a per-server crash watcher
//! classifies every other disappearance as a crash. All state-changing
//! operations serialize on one lock; `active_watchers` and
//! `intentional_stops` are only touched under it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use gamedock_docker::{ContainerSummary, CreateContainerSpec, DockerClient};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gamedock_store::runs::StopReason;
use gamedock_store::settings::{self, Bag};
use gamedock_store::{runs, servers};

use crate::error::{Error, Result};
use crate::notify::Notifier;

/// Grace period passed to the engine on stop and restart.
pub const STOP_GRACE_SECONDS: u32 = 10;

/// Label the orchestrator puts on the panel's own infrastructure
/// containers; anything carrying it is never a game container.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Label carrying the owning server id on managed game containers.
const SERVER_ID_LABEL: &str = "gamedock.server-id";

/// Soft memory reservation for every game container.
const MEMORY_RESERVATION_BYTES: i64 = 512 * 1024 * 1024;

/// Server state derived from the engine; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// No container exists for the server.
    Missing,
    /// Container exists but is not running.
    Stopped,
    /// Start transition in flight.
    Starting,
    /// Container is running.
    Running,
    /// Stop transition in flight.
    Stopping,
}

impl ServerStatus {
    /// Stable string form for the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Missing => "missing",
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
        }
    }
}

/// Outcome of a stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The named server was stopped.
    Stopped {
        /// Server that was stopped.
        id: String,
    },
    /// Nothing was running (only reachable through the `active` pseudo-id).
    NothingRunning,
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Name prefix for every managed game container.
    pub container_prefix: String,
    /// Crash watcher poll interval.
    pub watch_interval: Duration,
}

impl SchedulerConfig {
    /// Production defaults for a given container prefix.
    pub fn new(container_prefix: impl Into<String>) -> Self {
        Self {
            container_prefix: container_prefix.into(),
            watch_interval: Duration::from_secs(30),
        }
    }
}

/// Shared mutable scheduler state, touched only under the scheduler lock.
#[derive(Default)]
struct SchedulerState {
    /// One cancellation token per live crash watcher.
    active_watchers: HashMap<String, CancellationToken>,
    /// Ids whose next observed stop is intentional, not a crash.
    intentional_stops: HashSet<String>,
}

/// The scheduler. Cheap to clone via [`Arc`].
pub struct Scheduler {
    pool: SqlitePool,
    docker: DockerClient,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
    state: Arc<Mutex<SchedulerState>>,
}

/// Whether a listed container is a managed game container: named with the
/// managed prefix and not an orchestration-owned platform container.
pub fn is_game_container(summary: &ContainerSummary, prefix: &str) -> bool {
    summary.name().starts_with(prefix) && !summary.labels.contains_key(COMPOSE_PROJECT_LABEL)
}

/// Resolve `${VAR}` placeholders in an env value from the process
/// environment. Unknown variables resolve to the empty string.
pub fn resolve_placeholders(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let var = &rest[start + 2..start + 2 + end];
                out.push_str(&std::env::var(var).unwrap_or_default());
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                // Unterminated placeholder; keep it verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

impl Scheduler {
    /// Create a scheduler.
    pub fn new(
        pool: SqlitePool,
        docker: DockerClient,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            pool,
            docker,
            notifier,
            config,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Container name for a server id.
    pub fn container_name(&self, id: &str) -> String {
        format!("{}{}", self.config.container_prefix, id)
    }

    /// Server id from a managed container name.
    pub fn server_id_from<'a>(&self, container_name: &'a str) -> &'a str {
        container_name
            .strip_prefix(&self.config.container_prefix)
            .unwrap_or(container_name)
    }

    /// The at-most-one running game container.
    pub async fn active_game_container(&self) -> Result<Option<ContainerSummary>> {
        let containers = self.docker.list_containers(false).await?;
        Ok(containers
            .into_iter()
            .find(|c| c.is_running() && is_game_container(c, &self.config.container_prefix)))
    }

    /// Derived status for one server.
    pub async fn status(&self, id: &str) -> Result<ServerStatus> {
        match self.docker.inspect(&self.container_name(id)).await {
            Ok(inspect) if inspect.state.running => Ok(ServerStatus::Running),
            Ok(_) => Ok(ServerStatus::Stopped),
            Err(e) if e.is_not_found() => Ok(ServerStatus::Missing),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the server's container is running. Engine errors count as
    /// not running; guards that need hard errors use [`Scheduler::status`].
    pub async fn is_running(&self, id: &str) -> bool {
        matches!(self.status(id).await, Ok(ServerStatus::Running))
    }

    /// Start a server, replacing whatever game container is active.
    ///
    /// On any failure before the container starts, no run row is written
    /// and no watcher is registered.
    pub async fn start(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        let server = servers::get_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Server '{}' not found", id)))?;

        // Settle whatever game container is active: another server gets
        // replaced; the same server restarting closes its own run first, so
        // at most one open run ever exists.
        if let Some(active) = self.active_game_container().await? {
            let active_id = self.server_id_from(active.name()).to_string();
            let reason = if active_id == id {
                StopReason::User
            } else {
                info!(replacing = %active_id, with = %id, "Replacing active game server");
                StopReason::Replaced
            };
            state.intentional_stops.insert(active_id.clone());
            if let Some(watcher) = state.active_watchers.remove(&active_id) {
                watcher.cancel();
            }
            if let Err(e) = self.docker.stop(active.name(), STOP_GRACE_SECONDS).await {
                warn!(server_id = %active_id, error = %e, "Stop of replaced server failed");
            }
            runs::stop_open(&self.pool, &active_id, reason).await?;
            state.intentional_stops.remove(&active_id);
        }

        // A stale container under the target name always gets recreated.
        let name = self.container_name(id);
        match self.docker.remove(&name, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let env = server
            .env_map()?
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, resolve_placeholders(&v)))
            .collect();
        let binds = server
            .volume_map()?
            .into_iter()
            .map(|(host, container)| format!("{}:{}", host, container))
            .collect();

        self.docker.pull_image(&server.image).await?;

        let memory_gb =
            settings::get_i64(&self.pool, Bag::Panel, "game_memory_limit_gb", 6).await?;
        let cpu_limit = settings::get_i64(&self.pool, Bag::Panel, "game_cpu_limit", 3).await?;

        let spec = CreateContainerSpec {
            name: name.clone(),
            image: server.image.clone(),
            env,
            binds,
            memory_limit_bytes: memory_gb * (1 << 30),
            memory_reservation_bytes: MEMORY_RESERVATION_BYTES,
            nano_cpus: cpu_limit * 1_000_000_000,
            labels: HashMap::from([(SERVER_ID_LABEL.to_string(), id.to_string())]),
        };
        self.docker.create(&spec).await?;
        self.docker.start(&name).await?;

        runs::start(&self.pool, id).await?;

        self.register_watcher(&mut state, id, &server.name);

        info!(server_id = %id, container = %name, "Server started");
        Ok(())
    }

    /// Stop a server. The pseudo-id `active` resolves to whatever game
    /// container is currently running.
    pub async fn stop(&self, id_or_active: &str) -> Result<StopOutcome> {
        let mut state = self.state.lock().await;

        let id = if id_or_active == "active" {
            match self.active_game_container().await? {
                Some(active) => self.server_id_from(active.name()).to_string(),
                None => return Ok(StopOutcome::NothingRunning),
            }
        } else {
            servers::get_by_id(&self.pool, id_or_active)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Server '{}' not found", id_or_active)))?;
            id_or_active.to_string()
        };

        state.intentional_stops.insert(id.clone());
        if let Some(watcher) = state.active_watchers.remove(&id) {
            watcher.cancel();
        }

        let name = self.container_name(&id);
        match self.docker.stop(&name, STOP_GRACE_SECONDS).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            // Not retried; the next operator action reconciles.
            Err(e) => warn!(server_id = %id, error = %e, "Container stop failed"),
        }

        runs::stop_open(&self.pool, &id, StopReason::User).await?;
        state.intentional_stops.remove(&id);

        info!(server_id = %id, "Server stopped");
        Ok(StopOutcome::Stopped { id })
    }

    /// Delete a server definition and its run history. Refused while the
    /// server is running; backup files survive for post-mortem restore.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _state = self.state.lock().await;

        servers::get_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Server '{}' not found", id)))?;

        if self.is_running(id).await {
            return Err(Error::InvalidRequest(
                "Cannot delete server while it is running".to_string(),
            ));
        }

        runs::delete_by_server(&self.pool, id).await?;
        servers::delete_by_id(&self.pool, id).await?;

        info!(server_id = %id, "Server deleted");
        Ok(())
    }

    /// Register a single-shot crash watcher, replacing any prior watcher
    /// for the id. Caller holds the scheduler lock.
    fn register_watcher(&self, state: &mut SchedulerState, id: &str, server_name: &str) {
        state.intentional_stops.remove(id);
        if let Some(old) = state.active_watchers.remove(id) {
            old.cancel();
        }

        let token = CancellationToken::new();
        state.active_watchers.insert(id.to_string(), token.clone());

        let pool = self.pool.clone();
        let docker = self.docker.clone();
        let notifier = self.notifier.clone();
        let shared = self.state.clone();
        let container = self.container_name(id);
        let interval = self.config.watch_interval;
        let id = id.to_string();
        let server_name = server_name.to_string();

        tokio::spawn(async move {
            watch_for_crash(
                pool, docker, notifier, shared, container, id, server_name, interval, token,
            )
            .await;
        });
    }
}

/// Single-shot crash watcher body.
///
/// Polls the container every watch interval. On the first observation of a
/// not-running container it classifies the stop (intentional vs crash),
/// settles the ledger if needed, removes itself from the registry, and
/// exits. Transient engine errors are swallowed and retried next tick.
#[allow(clippy::too_many_arguments)]
async fn watch_for_crash(
    pool: SqlitePool,
    docker: DockerClient,
    notifier: Arc<dyn Notifier>,
    state: Arc<Mutex<SchedulerState>>,
    container: String,
    server_id: String,
    server_name: String,
    interval: Duration,
    token: CancellationToken,
) {
    debug!(server_id = %server_id, "Crash watcher started");

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(server_id = %server_id, "Crash watcher cancelled");
                return;
            }

            _ = tokio::time::sleep(interval) => {}
        }

        let running = match docker.inspect(&container).await {
            Ok(inspect) => inspect.state.running,
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                debug!(server_id = %server_id, error = %e, "Watcher poll failed, retrying");
                continue;
            }
        };

        if running {
            continue;
        }

        let mut state = state.lock().await;
        if token.is_cancelled() {
            return;
        }
        state.active_watchers.remove(&server_id);

        if state.intentional_stops.remove(&server_id) {
            debug!(server_id = %server_id, "Stop was intentional, watcher retiring");
            return;
        }
        drop(state);

        warn!(server_id = %server_id, "Unexpected container stop, recording crash");
        if let Err(e) = runs::stop_open(&pool, &server_id, StopReason::Crash).await {
            warn!(server_id = %server_id, error = %e, "Failed to close crashed run");
        }

        // Fire-and-forget; delivery failures never affect the ledger.
        tokio::spawn(async move {
            notifier.crash(&server_name).await;
        });

        return;
    }
}
