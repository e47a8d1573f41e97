// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup archive records.
//!
//! The database row is authoritative; orphan files on disk are tolerated.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::Result;

/// One backup archive.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BackupRecord {
    /// Row id.
    pub id: i64,
    /// Server the archive belongs to.
    pub server_id: String,
    /// Archive filename, `<server_id>_YYYY-MM-DD_HH-MM-SS.tar.gz`.
    pub filename: String,
    /// Archive size in bytes.
    pub size_bytes: i64,
    /// When the archive was created, unix seconds.
    pub created_at: i64,
}

/// List backups for one server, newest first.
pub async fn list(pool: &SqlitePool, server_id: &str) -> Result<Vec<BackupRecord>> {
    let backups = sqlx::query_as::<_, BackupRecord>(
        r#"
        SELECT id, server_id, filename, size_bytes, created_at
        FROM backups
        WHERE server_id = ?
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(server_id)
    .fetch_all(pool)
    .await?;

    Ok(backups)
}

/// List all backups across servers, newest first.
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<BackupRecord>> {
    let backups = sqlx::query_as::<_, BackupRecord>(
        r#"
        SELECT id, server_id, filename, size_bytes, created_at
        FROM backups
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(backups)
}

/// Count backups for one server.
pub async fn count(pool: &SqlitePool, server_id: &str) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM backups WHERE server_id = ?")
        .bind(server_id)
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}

/// The oldest backup for one server, if any.
pub async fn oldest(pool: &SqlitePool, server_id: &str) -> Result<Option<BackupRecord>> {
    let backup = sqlx::query_as::<_, BackupRecord>(
        r#"
        SELECT id, server_id, filename, size_bytes, created_at
        FROM backups
        WHERE server_id = ?
        ORDER BY created_at ASC, id ASC
        LIMIT 1
        "#,
    )
    .bind(server_id)
    .fetch_optional(pool)
    .await?;

    Ok(backup)
}

/// Record a new backup. Returns the row id.
pub async fn insert(
    pool: &SqlitePool,
    server_id: &str,
    filename: &str,
    size_bytes: i64,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO backups (server_id, filename, size_bytes, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(server_id)
    .bind(filename)
    .bind(size_bytes)
    .bind(crate::now_unix())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Get a backup by row id.
pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<BackupRecord>> {
    let backup = sqlx::query_as::<_, BackupRecord>(
        r#"
        SELECT id, server_id, filename, size_bytes, created_at
        FROM backups
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(backup)
}

/// Delete a backup row.
pub async fn delete_by_id(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM backups WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
