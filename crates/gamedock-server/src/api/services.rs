// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Infrastructure service endpoints.
//!
//! "Services" are the panel's own orchestrated containers, resolved by the
//! compose project label rather than the game prefix. They can be
//! restarted, tailed, and observed; the aggregate stats stream fans in one
//! producer per service and tags each record with `service=<name>`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use gamedock_docker::ContainerSummary;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::auth;
use super::streams::{ProducerStream, sse_response};
use super::AppState;
use crate::error::{Error, Result};
use crate::scheduler::{COMPOSE_PROJECT_LABEL, STOP_GRACE_SECONDS};
use crate::telemetry;

/// Compose label carrying the service name.
const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

/// All containers belonging to the panel's compose project.
async fn infra_containers(state: &AppState) -> Result<Vec<ContainerSummary>> {
    let containers = state.docker.list_containers(true).await?;
    Ok(containers
        .into_iter()
        .filter(|c| {
            c.labels
                .get(COMPOSE_PROJECT_LABEL)
                .is_some_and(|project| *project == state.config.compose_project)
        })
        .collect())
}

fn service_name(container: &ContainerSummary) -> String {
    container
        .labels
        .get(COMPOSE_SERVICE_LABEL)
        .cloned()
        .unwrap_or_else(|| container.name().to_string())
}

async fn find_service(state: &AppState, name: &str) -> Result<ContainerSummary> {
    infra_containers(state)
        .await?
        .into_iter()
        .find(|c| service_name(c) == name)
        .ok_or_else(|| Error::NotFound(format!("Service '{}' not found", name)))
}

/// `POST /api/services/{name}/restart` — user only.
pub async fn restart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    let container = find_service(&state, &name).await?;
    state
        .docker
        .restart(container.name(), STOP_GRACE_SECONDS)
        .await?;

    Ok(Json(json!({ "ok": true, "message": format!("Service '{}' restarted", name) })))
}

/// `GET /api/services/{name}/logs` — user only; live log lines.
pub async fn logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    auth::require_user(&state, &headers).await?;

    let container = find_service(&state, &name).await?;
    let token = CancellationToken::new();
    let rx = telemetry::spawn_container_logs(
        state.docker.clone(),
        container.name().to_string(),
        token.clone(),
    );

    Ok(sse_response(ProducerStream::new(rx, token)))
}

/// `GET /api/services/host/stats` — user only; the host sampler.
pub async fn host_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth::require_user(&state, &headers).await?;

    let token = CancellationToken::new();
    let rx = telemetry::spawn_host_stats(state.config.data_dir.clone(), token.clone());

    Ok(sse_response(ProducerStream::new(rx, token)))
}

/// `GET /api/services/stats` — user only; one multiplexed stream carrying
/// every infrastructure service's stats, each record tagged with its
/// service name. The stream stays open until the client disconnects.
pub async fn all_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth::require_user(&state, &headers).await?;

    let containers = infra_containers(&state).await?;
    let token = CancellationToken::new();
    let (tx, rx) = mpsc::channel::<String>(64);

    for container in containers.into_iter().filter(|c| c.is_running()) {
        let name = service_name(&container);
        let mut service_rx = telemetry::spawn_container_stats(
            state.docker.clone(),
            container.name().to_string(),
            token.child_token(),
        );
        let tx = tx.clone();

        // Re-tag each record with its service before fan-in. A service
        // producer ending does not end the response; the client does.
        tokio::spawn(async move {
            while let Some(payload) = service_rx.recv().await {
                let tagged = match serde_json::from_str::<Value>(&payload) {
                    Ok(Value::Object(mut record)) => {
                        record.insert("service".to_string(), json!(name));
                        Value::Object(record).to_string()
                    }
                    _ => json!({ "service": name, "raw": payload }).to_string(),
                };
                if tx.send(tagged).await.is_err() {
                    return;
                }
            }
        });
    }

    Ok(sse_response(ProducerStream::new(rx, token)))
}
