// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server definition records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::Result;

/// A server definition as stored.
///
/// `env` and `volumes` are JSON text columns; use [`ServerRecord::env_map`]
/// and [`ServerRecord::volume_map`] to decode them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServerRecord {
    /// Slug identifier, `^[a-z0-9_-]+$`, unique.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Game tag (e.g. "minecraft", "valheim", "custom").
    pub game_type: String,
    /// Container image reference.
    pub image: String,
    /// Host port the game binds (host networking).
    pub port: i64,
    /// Environment variables, JSON object text.
    pub env: String,
    /// Bind mounts host->container, JSON object text.
    pub volumes: String,
    /// Creation time, unix seconds.
    pub created_at: i64,
    /// Stored banner image path, if uploaded.
    pub banner_path: Option<String>,
    /// Accent color hex string, if themed.
    pub accent_color: Option<String>,
}

impl ServerRecord {
    /// Decode the env JSON column.
    pub fn env_map(&self) -> Result<HashMap<String, String>> {
        Ok(serde_json::from_str(&self.env)?)
    }

    /// Decode the volumes JSON column.
    pub fn volume_map(&self) -> Result<HashMap<String, String>> {
        Ok(serde_json::from_str(&self.volumes)?)
    }
}

/// Fields for inserting a new server.
#[derive(Debug, Clone)]
pub struct NewServer {
    /// Slug identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Game tag.
    pub game_type: String,
    /// Container image reference.
    pub image: String,
    /// Host port.
    pub port: u16,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Bind mounts host->container.
    pub volumes: HashMap<String, String>,
}

/// Get all servers ordered by creation time.
pub async fn get_all(pool: &SqlitePool) -> Result<Vec<ServerRecord>> {
    let servers = sqlx::query_as::<_, ServerRecord>(
        r#"
        SELECT id, name, game_type, image, port, env, volumes,
               created_at, banner_path, accent_color
        FROM servers
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(servers)
}

/// Get a server by id.
pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<ServerRecord>> {
    let server = sqlx::query_as::<_, ServerRecord>(
        r#"
        SELECT id, name, game_type, image, port, env, volumes,
               created_at, banner_path, accent_color
        FROM servers
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(server)
}

/// Get the server occupying a port, if any.
pub async fn get_by_port(pool: &SqlitePool, port: u16) -> Result<Option<ServerRecord>> {
    let server = sqlx::query_as::<_, ServerRecord>(
        r#"
        SELECT id, name, game_type, image, port, env, volumes,
               created_at, banner_path, accent_color
        FROM servers
        WHERE port = ?
        "#,
    )
    .bind(port as i64)
    .fetch_optional(pool)
    .await?;

    Ok(server)
}

/// Insert a new server definition.
pub async fn insert(pool: &SqlitePool, server: &NewServer) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO servers (id, name, game_type, image, port, env, volumes, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&server.id)
    .bind(&server.name)
    .bind(&server.game_type)
    .bind(&server.image)
    .bind(server.port as i64)
    .bind(serde_json::to_string(&server.env)?)
    .bind(serde_json::to_string(&server.volumes)?)
    .bind(crate::now_unix())
    .execute(pool)
    .await?;

    Ok(())
}

/// Update a server's image and env.
pub async fn update_config(
    pool: &SqlitePool,
    id: &str,
    image: &str,
    env: &HashMap<String, String>,
) -> Result<()> {
    sqlx::query("UPDATE servers SET image = ?, env = ? WHERE id = ?")
        .bind(image)
        .bind(serde_json::to_string(env)?)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Update a server's theme fields. `None` clears the field.
pub async fn update_theme(
    pool: &SqlitePool,
    id: &str,
    banner_path: Option<&str>,
    accent_color: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE servers SET banner_path = ?, accent_color = ? WHERE id = ?")
        .bind(banner_path)
        .bind(accent_color)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete a server definition. Returns whether a row was removed.
pub async fn delete_by_id(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM servers WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
