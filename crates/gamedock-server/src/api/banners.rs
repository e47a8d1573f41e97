// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server banner upload and retrieval.
//!
//! Banners are small theme images stored under `<DATA_DIR>/banners/`.
//! Uploads are validated by magic bytes, never by the client's claimed
//! content type, and capped at 5 MiB.

use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde_json::{Value, json};
use tracing::debug;

use gamedock_store::servers;

use super::auth;
use super::AppState;
use crate::error::{Error, Result};

/// Upload size cap.
const MAX_BANNER_BYTES: usize = 5 * 1024 * 1024;

/// Sniff an uploaded image: JPEG, PNG, or WebP. Returns `(extension,
/// content type)`.
pub fn sniff_image(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(("jpg", "image/jpeg"));
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(("png", "image/png"));
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(("webp", "image/webp"));
    }
    None
}

/// `POST /api/servers/{id}/banner` — user only; multipart image upload.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    let server = servers::get_by_id(&state.pool, &id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Server '{}' not found", id)))?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidRequest(format!("Bad upload: {}", e)))?
        .ok_or_else(|| Error::InvalidRequest("No file in upload".to_string()))?;
    let bytes = field
        .bytes()
        .await
        .map_err(|e| Error::InvalidRequest(format!("Bad upload: {}", e)))?;

    if bytes.len() > MAX_BANNER_BYTES {
        return Err(Error::InvalidRequest(
            "Banner must be 5 MiB or smaller".to_string(),
        ));
    }
    let (ext, _) = sniff_image(&bytes).ok_or_else(|| {
        Error::InvalidRequest("Banner must be a JPEG, PNG, or WebP image".to_string())
    })?;

    let dir = state.config.data_dir.join("banners");
    tokio::fs::create_dir_all(&dir).await?;

    // One banner per server; drop any previous one with a different
    // extension.
    if let Some(old) = &server.banner_path {
        let old_path = state.config.data_dir.join(old);
        if let Err(e) = tokio::fs::remove_file(&old_path).await {
            debug!(path = %old_path.display(), error = %e, "No previous banner to remove");
        }
    }

    let relative = format!("banners/{}.{}", id, ext);
    tokio::fs::write(state.config.data_dir.join(&relative), &bytes).await?;

    servers::update_theme(
        &state.pool,
        &id,
        Some(&relative),
        server.accent_color.as_deref(),
    )
    .await?;

    Ok(Json(json!({ "ok": true, "banner_path": relative })))
}

/// `GET /api/servers/{id}/banner` — user only; the stored image.
pub async fn fetch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    auth::require_user(&state, &headers).await?;

    let server = servers::get_by_id(&state.pool, &id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Server '{}' not found", id)))?;
    let relative = server
        .banner_path
        .ok_or_else(|| Error::NotFound("No banner uploaded".to_string()))?;

    let bytes = tokio::fs::read(state.config.data_dir.join(&relative)).await?;
    let content_type = sniff_image(&bytes).map(|(_, ct)| ct).unwrap_or("application/octet-stream");

    Ok(([("content-type", content_type)], bytes))
}

/// `DELETE /api/servers/{id}/banner` — user only; clears the theme image.
pub async fn clear(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    let server = servers::get_by_id(&state.pool, &id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Server '{}' not found", id)))?;

    if let Some(relative) = &server.banner_path {
        let path = state.config.data_dir.join(relative);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), error = %e, "Banner file already gone");
        }
    }
    servers::update_theme(&state.pool, &id, None, server.accent_color.as_deref()).await?;

    Ok(Json(json!({ "ok": true })))
}
