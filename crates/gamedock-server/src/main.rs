// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gamedock control plane server.
//!
//! Wires the store, engine client, scheduler, backup engine, notifier, and
//! background workers together, then serves the panel API until ctrl-c.

use std::sync::Arc;
use std::time::Instant;

use gamedock_docker::DockerClient;
use tracing::{info, warn};

use gamedock_server::api::{self, AppState};
use gamedock_server::backup::BackupEngine;
use gamedock_server::config::Config;
use gamedock_server::notify::{ChannelNotifier, CompositeNotifier, Notifier, WebhookNotifier};
use gamedock_server::scheduler::{Scheduler, SchedulerConfig};
use gamedock_server::workers::{
    AutoBackupConfig, AutoBackupWorker, SessionSweepConfig, SessionSweepWorker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gamedock_server=info,gamedock_docker=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Arc::new(Config::from_env()?);

    info!(
        http_addr = %config.http_addr,
        docker_socket = %config.docker_socket.display(),
        prefix = %config.container_prefix,
        "Starting gamedock"
    );

    let pool = gamedock_store::open(&config.database_path).await?;
    info!(path = %config.database_path.display(), "Database ready");

    let docker = DockerClient::new(&config.docker_socket);

    let channel = config
        .discord_bot_token
        .clone()
        .map(|token| ChannelNotifier::new(pool.clone(), token));
    let webhook = config.webhook_url.clone().map(WebhookNotifier::new);
    let notifier: Arc<dyn Notifier> = Arc::new(CompositeNotifier::new(channel, webhook));

    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        docker.clone(),
        notifier.clone(),
        SchedulerConfig::new(&config.container_prefix),
    ));

    let backups = Arc::new(BackupEngine::new(
        pool.clone(),
        docker.clone(),
        config.container_prefix.clone(),
        config.backup_root.clone(),
        config.host_data_dir.clone(),
    ));

    let auto_backup = AutoBackupWorker::new(
        pool.clone(),
        scheduler.clone(),
        backups.clone(),
        AutoBackupConfig::default(),
    );
    let auto_backup_shutdown = auto_backup.shutdown_handle();
    tokio::spawn(async move { auto_backup.run().await });

    let session_sweep = SessionSweepWorker::new(pool.clone(), SessionSweepConfig::default());
    let session_sweep_shutdown = session_sweep.shutdown_handle();
    tokio::spawn(async move { session_sweep.run().await });

    let state = AppState {
        pool,
        docker,
        scheduler,
        backups,
        notifier,
        config: config.clone(),
        started_at: Instant::now(),
    };

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "Panel API ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    auto_backup_shutdown.notify_one();
    session_sweep_shutdown.notify_one();

    info!("Gamedock shut down");
    Ok(())
}
