// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background workers: the auto-backup ticker and the auth-session sweep.
//!
//! Both follow the same shape: a config struct, a `run()` loop driven by
//! `tokio::select!`, and an `Arc<Notify>` shutdown handle. Per-cycle errors
//! are logged and swallowed; the loop always reaches the next tick.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use gamedock_store::settings::{self, Bag};
use gamedock_store::{backups, sessions};

use crate::backup::BackupEngine;
use crate::scheduler::Scheduler;

/// Configuration for the auto-backup worker.
#[derive(Debug, Clone)]
pub struct AutoBackupConfig {
    /// How often to evaluate whether a backup is due.
    pub poll_interval: Duration,
}

impl Default for AutoBackupConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3600),
        }
    }
}

/// Hourly worker that backs up the active game server when the configured
/// interval has elapsed since its most recent backup.
pub struct AutoBackupWorker {
    pool: SqlitePool,
    scheduler: Arc<Scheduler>,
    engine: Arc<BackupEngine>,
    config: AutoBackupConfig,
    shutdown: Arc<Notify>,
}

impl AutoBackupWorker {
    /// Create a new auto-backup worker.
    pub fn new(
        pool: SqlitePool,
        scheduler: Arc<Scheduler>,
        engine: Arc<BackupEngine>,
        config: AutoBackupConfig,
    ) -> Self {
        Self {
            pool,
            scheduler,
            engine,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the auto-backup loop until shutdown.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Auto-backup worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Auto-backup worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Auto-backup cycle failed");
                    }
                }
            }
        }

        info!("Auto-backup worker stopped");
    }

    /// One evaluation cycle.
    async fn tick(&self) -> crate::error::Result<()> {
        let interval_hours =
            settings::get_i64(&self.pool, Bag::Panel, "auto_backup_interval_hours", 0).await?;
        if interval_hours <= 0 {
            debug!("Auto-backup disabled");
            return Ok(());
        }

        let Some(active) = self.scheduler.active_game_container().await? else {
            debug!("No active game server, nothing to back up");
            return Ok(());
        };
        let server_id = self.scheduler.server_id_from(active.name()).to_string();

        let newest = backups::list(&self.pool, &server_id)
            .await?
            .into_iter()
            .map(|b| b.created_at)
            .max();
        let due = match newest {
            Some(created_at) => {
                gamedock_store::now_unix() - created_at >= interval_hours * 3600
            }
            None => true,
        };
        if !due {
            debug!(server_id = %server_id, "Auto-backup not due yet");
            return Ok(());
        }

        info!(server_id = %server_id, "Auto-backup due, creating");
        self.engine.create(&server_id).await?;

        Ok(())
    }
}

/// Configuration for the session sweep worker.
#[derive(Debug, Clone)]
pub struct SessionSweepConfig {
    /// How often to expire stale auth sessions.
    pub poll_interval: Duration,
}

impl Default for SessionSweepConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3600),
        }
    }
}

/// Hourly worker that deletes expired auth sessions.
pub struct SessionSweepWorker {
    pool: SqlitePool,
    config: SessionSweepConfig,
    shutdown: Arc<Notify>,
}

impl SessionSweepWorker {
    /// Create a new session sweep worker.
    pub fn new(pool: SqlitePool, config: SessionSweepConfig) -> Self {
        Self {
            pool,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until shutdown.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Session sweep worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Session sweep worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match sessions::cleanup_expired(&self.pool).await {
                        Ok(0) => debug!("No expired sessions"),
                        Ok(removed) => info!(removed, "Expired sessions removed"),
                        Err(e) => error!(error = %e, "Session sweep failed"),
                    }
                }
            }
        }

        info!("Session sweep worker stopped");
    }
}
