// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite persistence for the gamedock control plane.
//!
//! One database file holds everything the panel needs to survive a restart:
//! server definitions, the run ledger, auth sessions, backup records, and the
//! two keyed settings bags. All operations are prepared statements over a
//! shared [`SqlitePool`]; writes are not retried here, the caller decides.
//!
//! # Modules
//!
//! - [`servers`]: server definitions (image, port, env, volumes, theme)
//! - [`runs`]: the run ledger (one row per interval a server was live)
//! - [`sessions`]: opaque auth sessions with expiry
//! - [`backups`]: backup archive records
//! - [`settings`]: panel and bot settings bags with static defaults

#![deny(missing_docs)]

use std::path::Path;

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use thiserror::Error;

pub mod backups;
pub mod runs;
pub mod servers;
pub mod sessions;
pub mod settings;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Store errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON column could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// Open (creating if needed) the database at `path` and run migrations.
pub async fn open(path: impl AsRef<Path>) -> Result<SqlitePool> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    MIGRATOR.run(&pool).await?;

    Ok(pool)
}

/// Open an in-memory database with the full schema. Test helper.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    MIGRATOR.run(&pool).await?;

    Ok(pool)
}

/// Health check for database connectivity.
pub async fn health_check(pool: &SqlitePool) -> Result<bool> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| true)
        .map_err(Into::into)
}

/// Current wall clock as unix seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
