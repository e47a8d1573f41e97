// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde_json::{Value, json};

use gamedock_store::backups;

use super::auth;
use super::AppState;
use crate::error::Result;

/// `GET /api/servers/{id}/backups` — user only; newest first.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    let rows: Vec<Value> = backups::list(&state.pool, &id)
        .await?
        .into_iter()
        .map(|b| {
            json!({
                "id": b.id,
                "server_id": b.server_id,
                "filename": b.filename,
                "size_bytes": b.size_bytes,
                "created_at": b.created_at,
            })
        })
        .collect();

    Ok(Json(json!(rows)))
}

/// `POST /api/servers/{id}/backups` — user only; pause, archive, resume.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    let record = state.backups.create(&id).await?;
    Ok(Json(json!({
        "ok": true,
        "backup": {
            "id": record.id,
            "filename": record.filename,
            "size_bytes": record.size_bytes,
            "created_at": record.created_at,
        }
    })))
}

/// `POST /api/servers/{id}/backups/{bid}/restore` — user only; refused
/// while the server is running.
pub async fn restore(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, bid)): Path<(String, i64)>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    state.backups.restore(&id, bid).await?;
    Ok(Json(json!({ "ok": true })))
}

/// `DELETE /api/servers/{id}/backups/{bid}` — user only.
pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, bid)): Path<(String, i64)>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    state.backups.delete(&id, bid).await?;
    Ok(Json(json!({ "ok": true })))
}

/// `GET /api/servers/{id}/backups/{bid}/download` — user only; the raw
/// archive.
pub async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, bid)): Path<(String, i64)>,
) -> Result<impl IntoResponse> {
    auth::require_user(&state, &headers).await?;

    let record = state.backups.get_owned(&id, bid).await?;
    let bytes = tokio::fs::read(state.backups.archive_path(&record)).await?;

    Ok((
        [
            ("content-type", "application/gzip".to_string()),
            (
                "content-disposition",
                format!("attachment; filename=\"{}\"", record.filename),
            ),
        ],
        bytes,
    ))
}
