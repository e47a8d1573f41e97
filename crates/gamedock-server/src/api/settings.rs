// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Health, settings, and notification endpoints.

use std::collections::HashMap;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde_json::{Value, json};

use gamedock_store::settings::{self, Bag};

use super::auth;
use super::AppState;
use crate::error::Result;
use crate::notify::ErrorReport;
use crate::scheduler::COMPOSE_PROJECT_LABEL;

/// `GET /api/health` — open liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// `GET /api/health/status` — open; platform summary for the dashboard.
pub async fn health_status(State(state): State<AppState>) -> Json<Value> {
    const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

    let mut services: Vec<Value> = Vec::new();
    let mut degraded = false;

    match state.docker.list_containers(true).await {
        Ok(containers) => {
            for container in containers {
                let Some(project) = container.labels.get(COMPOSE_PROJECT_LABEL) else {
                    continue;
                };
                if *project != state.config.compose_project {
                    continue;
                }
                let name = container
                    .labels
                    .get(COMPOSE_SERVICE_LABEL)
                    .cloned()
                    .unwrap_or_else(|| container.name().to_string());
                if !container.is_running() {
                    degraded = true;
                }
                services.push(json!({ "name": name, "status": container.state }));
            }
        }
        Err(_) => degraded = true,
    }

    let active_game = match state.scheduler.active_game_container().await {
        Ok(Some(active)) => {
            Some(state.scheduler.server_id_from(active.name()).to_string())
        }
        Ok(None) => None,
        Err(_) => {
            degraded = true;
            None
        }
    };

    Json(json!({
        "status": if degraded { "degraded" } else { "operational" },
        "backendUptime": state.started_at.elapsed().as_secs(),
        "services": services,
        "activeGame": active_game,
        "timestamp": gamedock_store::now_unix(),
    }))
}

/// `GET /api/settings` — user or bot; effective panel settings.
pub async fn get_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_user_or_bot(&state, &headers).await?;
    let all = settings::get_all(&state.pool, Bag::Panel).await?;
    Ok(Json(json!(all)))
}

/// `PUT /api/settings` — user only; unknown keys dropped silently.
pub async fn put_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<HashMap<String, Value>>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;
    store_bag(&state, Bag::Panel, body).await?;
    Ok(Json(json!({ "ok": true })))
}

/// `GET /api/bot/settings` — user only.
pub async fn get_bot_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;
    let all = settings::get_all(&state.pool, Bag::Bot).await?;
    Ok(Json(json!(all)))
}

/// `PUT /api/bot/settings` — user only.
pub async fn put_bot_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<HashMap<String, Value>>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;
    store_bag(&state, Bag::Bot, body).await?;
    Ok(Json(json!({ "ok": true })))
}

/// `GET /api/bot/channels` — user only; the configured channel wiring.
pub async fn bot_channels(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    let all = settings::get_all(&state.pool, Bag::Bot).await?;
    let channels: Vec<Value> = all
        .into_iter()
        .filter(|(key, value)| key.ends_with("_channel_id") && !value.is_empty())
        .map(|(key, value)| json!({ "key": key, "channel_id": value }))
        .collect();

    Ok(Json(json!(channels)))
}

/// `POST /api/notifications/error` — user only; forwards a client-side
/// error to the notifier.
pub async fn report_error(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(report): Json<ErrorReport>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    state.notifier.error(&report).await;
    Ok(Json(json!({ "ok": true, "sent": true })))
}

/// Write string-able values into a bag; the store drops unrecognized keys.
async fn store_bag(
    state: &AppState,
    bag: Bag,
    body: HashMap<String, Value>,
) -> Result<()> {
    for (key, value) in body {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => {
                settings::unset(&state.pool, bag, &key).await?;
                continue;
            }
            _ => continue,
        };
        settings::set(&state.pool, bag, &key, &value).await?;
    }
    Ok(())
}
