// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface of the control plane.
//!
//! A thin axum edge over the scheduler, backup engine, store, and telemetry
//! producers. Handlers authenticate explicitly at the top (user session, bot
//! key, or either) so the admission policy is visible in the route table.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::routing::{delete, get, post};
use gamedock_docker::DockerClient;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::backup::BackupEngine;
use crate::config::Config;
use crate::notify::Notifier;
use crate::scheduler::Scheduler;

pub mod auth;
pub mod banners;
pub mod backups;
pub mod servers;
pub mod services;
pub mod settings;
pub mod streams;

/// Uploads are capped at 5 MiB; the body limit leaves room for multipart
/// framing around the image.
const BODY_LIMIT: usize = 6 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Store pool.
    pub pool: SqlitePool,
    /// Engine client.
    pub docker: DockerClient,
    /// The exclusive scheduler.
    pub scheduler: Arc<Scheduler>,
    /// The backup engine.
    pub backups: Arc<BackupEngine>,
    /// Notification sink.
    pub notifier: Arc<dyn Notifier>,
    /// Process configuration.
    pub config: Arc<Config>,
    /// Process start time for uptime reporting.
    pub started_at: Instant,
}

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/api/health", get(settings::health))
        .route("/api/health/status", get(settings::health_status))
        .route("/api/servers", get(servers::list).post(servers::create))
        .route("/api/servers/catalog", get(servers::catalog))
        .route("/api/servers/{id}", delete(servers::remove))
        .route("/api/servers/{id}/start", post(servers::start))
        .route("/api/servers/{id}/stop", post(servers::stop))
        .route("/api/servers/{id}/logs", get(streams::server_logs))
        .route("/api/servers/{id}/stats", get(streams::server_stats))
        .route(
            "/api/servers/{id}/config",
            get(servers::get_config).put(servers::put_config),
        )
        .route("/api/servers/{id}/history", get(servers::history))
        .route(
            "/api/servers/{id}/banner",
            get(banners::fetch).post(banners::upload).delete(banners::clear),
        )
        .route(
            "/api/servers/{id}/backups",
            get(backups::list).post(backups::create),
        )
        .route("/api/servers/{id}/backups/{bid}", delete(backups::remove))
        .route(
            "/api/servers/{id}/backups/{bid}/restore",
            post(backups::restore),
        )
        .route(
            "/api/servers/{id}/backups/{bid}/download",
            get(backups::download),
        )
        .route(
            "/api/settings",
            get(settings::get_settings).put(settings::put_settings),
        )
        .route(
            "/api/bot/settings",
            get(settings::get_bot_settings).put(settings::put_bot_settings),
        )
        .route("/api/bot/channels", get(settings::bot_channels))
        .route("/api/notifications/error", post(settings::report_error))
        .route("/api/services/stats", get(services::all_stats))
        .route("/api/services/host/stats", get(services::host_stats))
        .route("/api/services/{name}/restart", post(services::restart))
        .route("/api/services/{name}/logs", get(services::logs))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS: locked to the public origin when one is configured (cookies need
/// credentials), permissive otherwise.
fn cors_layer(config: &Config) -> CorsLayer {
    match config
        .public_url
        .as_deref()
        .and_then(|url| url.parse::<HeaderValue>().ok())
    {
        // Cookie auth requires credentials, which rules out wildcards.
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
            ])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                HeaderName::from_static("x-bot-api-key"),
            ])
            .allow_credentials(true),
        None => {
            warn!("PUBLIC_URL not set, CORS is permissive");
            CorsLayer::permissive()
        }
    }
}
