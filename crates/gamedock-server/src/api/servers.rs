// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server CRUD, lifecycle, config, and history endpoints.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};

use gamedock_store::runs;
use gamedock_store::servers::{self, NewServer};

use super::auth;
use super::AppState;
use crate::error::{Error, Result};
use crate::scheduler::{StopOutcome, is_game_container};

/// A built-in game template. The core treats templates as opaque
/// `(image, port, env, volumes)` tuples; this catalog just seeds the form.
struct Template {
    id: &'static str,
    name: &'static str,
    game_type: &'static str,
    image: &'static str,
    port: u16,
    env: &'static [(&'static str, &'static str)],
    volumes: &'static [(&'static str, &'static str)],
}

static TEMPLATES: &[Template] = &[
    Template {
        id: "minecraft",
        name: "Minecraft (Java)",
        game_type: "minecraft",
        image: "itzg/minecraft-server:latest",
        port: 25565,
        env: &[("EULA", "TRUE"), ("MEMORY", "4G")],
        volumes: &[("/data/minecraft", "/data")],
    },
    Template {
        id: "valheim",
        name: "Valheim",
        game_type: "valheim",
        image: "lloesche/valheim-server",
        port: 2456,
        env: &[("SERVER_NAME", "Valheim"), ("WORLD_NAME", "Dedicated")],
        volumes: &[("/data/valheim", "/config")],
    },
    Template {
        id: "zomboid",
        name: "Project Zomboid",
        game_type: "zomboid",
        image: "afey/zomboid",
        port: 16261,
        env: &[("ADMIN_PASSWORD", "${ZOMBOID_ADMIN_PASSWORD}")],
        volumes: &[("/data/zomboid", "/server-data")],
    },
    Template {
        id: "terraria",
        name: "Terraria",
        game_type: "terraria",
        image: "ryshe/terraria:latest",
        port: 7777,
        env: &[("WORLD_FILENAME", "world.wld")],
        volumes: &[("/data/terraria", "/root/.local/share/Terraria/Worlds")],
    },
];

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// `GET /api/servers` — open; the dashboard list.
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let search = params.get("search").map(|s| s.to_lowercase());

    // One engine round-trip covers every server's status.
    let running: Vec<String> = match state.docker.list_containers(false).await {
        Ok(containers) => containers
            .iter()
            .filter(|c| c.is_running() && is_game_container(c, &state.config.container_prefix))
            .map(|c| {
                state
                    .scheduler
                    .server_id_from(c.name())
                    .to_string()
            })
            .collect(),
        Err(_) => Vec::new(),
    };

    let servers = servers::get_all(&state.pool).await?;
    let list: Vec<Value> = servers
        .into_iter()
        .filter(|s| {
            search.as_deref().is_none_or(|q| {
                s.id.to_lowercase().contains(q)
                    || s.name.to_lowercase().contains(q)
                    || s.game_type.to_lowercase().contains(q)
            })
        })
        .map(|s| {
            let status = if running.iter().any(|id| id == &s.id) {
                "running"
            } else {
                "stopped"
            };
            json!({
                "id": s.id,
                "name": s.name,
                "game_type": s.game_type,
                "port": s.port,
                "status": status,
                "banner_path": s.banner_path,
                "accent_color": s.accent_color,
            })
        })
        .collect();

    Ok(Json(json!(list)))
}

/// `GET /api/servers/catalog` — open; built-in templates.
pub async fn catalog(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let search = params.get("search").map(|s| s.to_lowercase());
    let list: Vec<Value> = TEMPLATES
        .iter()
        .filter(|t| {
            search.as_deref().is_none_or(|q| {
                t.id.contains(q) || t.name.to_lowercase().contains(q) || t.game_type.contains(q)
            })
        })
        .map(|t| {
            json!({
                "template_id": t.id,
                "name": t.name,
                "game_type": t.game_type,
                "docker_image": t.image,
                "port": t.port,
                "env_vars": t.env.iter().cloned().collect::<HashMap<_, _>>(),
                "volumes": t.volumes.iter().cloned().collect::<HashMap<_, _>>(),
            })
        })
        .collect();
    Json(json!(list))
}

/// Body of `POST /api/servers`.
#[derive(Debug, Deserialize)]
pub struct CreateServerBody {
    /// Template to seed defaults from.
    #[serde(default)]
    pub template_id: Option<String>,
    /// Server slug.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Image override.
    #[serde(default)]
    pub docker_image: Option<String>,
    /// Host port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Env overrides.
    #[serde(default)]
    pub env_vars: Option<HashMap<String, String>>,
    /// Volume overrides.
    #[serde(default)]
    pub volumes: Option<HashMap<String, String>>,
}

/// `POST /api/servers` — user only.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateServerBody>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    if !is_valid_id(&body.id) {
        return Err(Error::InvalidRequest(
            "Server id must match [a-z0-9_-]+".to_string(),
        ));
    }
    if body.name.trim().is_empty() {
        return Err(Error::InvalidRequest("Server name is required".to_string()));
    }

    let template = body
        .template_id
        .as_deref()
        .and_then(|id| TEMPLATES.iter().find(|t| t.id == id));

    let image = body
        .docker_image
        .clone()
        .or_else(|| template.map(|t| t.image.to_string()))
        .ok_or_else(|| Error::InvalidRequest("docker_image is required".to_string()))?;
    let port = body
        .port
        .or_else(|| template.map(|t| t.port))
        .ok_or_else(|| Error::InvalidRequest("port is required".to_string()))?;

    let mut env: HashMap<String, String> = template
        .map(|t| {
            t.env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default();
    if let Some(overrides) = &body.env_vars {
        env.extend(overrides.clone());
    }

    let volumes: HashMap<String, String> = match (&body.volumes, template) {
        (Some(volumes), _) if !volumes.is_empty() => volumes.clone(),
        (_, Some(t)) => t
            .volumes
            .iter()
            .map(|(h, c)| (h.to_string(), c.to_string()))
            .collect(),
        _ => HashMap::from([(format!("/data/{}", body.id), "/data".to_string())]),
    };

    if servers::get_by_id(&state.pool, &body.id).await?.is_some() {
        return Err(Error::Conflict(format!(
            "Server '{}' already exists",
            body.id
        )));
    }
    if let Some(holder) = servers::get_by_port(&state.pool, port).await? {
        return Err(Error::Conflict(format!(
            "Port {} is already used by '{}'",
            port, holder.name
        )));
    }

    let game_type = template.map(|t| t.game_type).unwrap_or("custom");
    servers::insert(
        &state.pool,
        &NewServer {
            id: body.id.clone(),
            name: body.name.trim().to_string(),
            game_type: game_type.to_string(),
            image,
            port,
            env,
            volumes,
        },
    )
    .await?;

    Ok(Json(json!({ "ok": true })))
}

/// `DELETE /api/servers/{id}` — user only; refused while running.
pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;
    state.scheduler.delete(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

/// `POST /api/servers/{id}/start` — user or bot.
pub async fn start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    auth::require_user_or_bot(&state, &headers).await?;
    state.scheduler.start(&id).await?;
    Ok(Json(json!({ "ok": true, "message": format!("Server '{}' started", id) })))
}

/// `POST /api/servers/{id}/stop` — user or bot; `active` pseudo-id stops
/// whatever is running.
pub async fn stop(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    auth::require_user_or_bot(&state, &headers).await?;
    match state.scheduler.stop(&id).await? {
        StopOutcome::Stopped { id } => Ok(Json(
            json!({ "ok": true, "message": format!("Server '{}' stopped", id) }),
        )),
        StopOutcome::NothingRunning => {
            Ok(Json(json!({ "ok": true, "message": "No server running" })))
        }
    }
}

/// `GET /api/servers/{id}/config` — user only.
pub async fn get_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    let server = servers::get_by_id(&state.pool, &id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Server '{}' not found", id)))?;

    Ok(Json(json!({
        "id": server.id,
        "docker_image": server.image,
        "port": server.port,
        "env_vars": server.env_map()?,
        "volumes": server.volume_map()?,
        "accent_color": server.accent_color,
        "banner_path": server.banner_path,
    })))
}

/// Body of `PUT /api/servers/{id}/config`.
#[derive(Debug, Deserialize)]
pub struct PutConfigBody {
    /// New image reference.
    pub docker_image: String,
    /// New env map.
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    /// New accent color; omit to keep.
    #[serde(default)]
    pub accent_color: Option<String>,
}

/// `PUT /api/servers/{id}/config` — user only; refused while running.
pub async fn put_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<PutConfigBody>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    let server = servers::get_by_id(&state.pool, &id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Server '{}' not found", id)))?;

    if state.scheduler.is_running(&id).await {
        return Err(Error::InvalidRequest(
            "Cannot edit config while server is running".to_string(),
        ));
    }

    servers::update_config(&state.pool, &id, &body.docker_image, &body.env_vars).await?;
    if let Some(accent) = &body.accent_color {
        servers::update_theme(
            &state.pool,
            &id,
            server.banner_path.as_deref(),
            Some(accent),
        )
        .await?;
    }

    Ok(Json(json!({ "ok": true })))
}

/// `GET /api/servers/{id}/history` — user only; run ledger, newest first.
pub async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    auth::require_user(&state, &headers).await?;

    servers::get_by_id(&state.pool, &id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Server '{}' not found", id)))?;

    let now = gamedock_store::now_unix();
    let rows: Vec<Value> = runs::history(&state.pool, &id, 100)
        .await?
        .into_iter()
        .map(|run| {
            let end = run.stopped_at.unwrap_or(now);
            json!({
                "id": run.id,
                "started_at": run.started_at,
                "stopped_at": run.stopped_at,
                "duration_seconds": (end - run.started_at).max(0),
                "stop_reason": run.stop_reason,
            })
        })
        .collect();

    Ok(Json(json!(rows)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_id() {
        assert!(is_valid_id("mc"));
        assert!(is_valid_id("my_server-2"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("Upper"));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id("dots.not.ok"));
    }

    #[test]
    fn test_templates_have_unique_ids_and_ports() {
        let mut ids: Vec<_> = TEMPLATES.iter().map(|t| t.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), TEMPLATES.len());

        for template in TEMPLATES {
            assert!(template.port > 0);
            assert!(!template.image.is_empty());
            assert!(template.volumes.iter().all(|(h, _)| h.starts_with("/data/")));
        }
    }
}
