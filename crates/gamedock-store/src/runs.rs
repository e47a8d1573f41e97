// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The run ledger: one row per interval a server was live.
//!
//! The open row (`stopped_at IS NULL`) is the authoritative "is running"
//! signal for history and billing. The scheduler guarantees at most one open
//! row exists table-wide at any instant.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::Result;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Stopped by an operator action.
    User,
    /// The container died without an intentional stop.
    Crash,
    /// Stopped to make room for another server's start.
    Replaced,
}

impl StopReason {
    /// Stable string form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::User => "user",
            StopReason::Crash => "crash",
            StopReason::Replaced => "replaced",
        }
    }
}

/// One run ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunRecord {
    /// Row id.
    pub id: i64,
    /// Server this run belongs to.
    pub server_id: String,
    /// When the run started, unix seconds.
    pub started_at: i64,
    /// When the run ended; `None` while live.
    pub stopped_at: Option<i64>,
    /// Why the run ended; `None` while live.
    pub stop_reason: Option<String>,
}

/// Open a new run for a server. Returns the row id.
pub async fn start(pool: &SqlitePool, server_id: &str) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO server_sessions (server_id, started_at)
        VALUES (?, ?)
        "#,
    )
    .bind(server_id)
    .bind(crate::now_unix())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Close the open run for a server, recording the reason.
///
/// A no-op when the server has no open run (e.g. the crash watcher fires
/// after a stop already settled the ledger).
pub async fn stop_open(pool: &SqlitePool, server_id: &str, reason: StopReason) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE server_sessions
        SET stopped_at = ?, stop_reason = ?
        WHERE server_id = ? AND stopped_at IS NULL
        "#,
    )
    .bind(crate::now_unix())
    .bind(reason.as_str())
    .bind(server_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the open run across the whole table, if any.
pub async fn open_run(pool: &SqlitePool) -> Result<Option<RunRecord>> {
    let run = sqlx::query_as::<_, RunRecord>(
        r#"
        SELECT id, server_id, started_at, stopped_at, stop_reason
        FROM server_sessions
        WHERE stopped_at IS NULL
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(run)
}

/// Run history for one server, newest first.
pub async fn history(pool: &SqlitePool, server_id: &str, limit: i64) -> Result<Vec<RunRecord>> {
    let runs = sqlx::query_as::<_, RunRecord>(
        r#"
        SELECT id, server_id, started_at, stopped_at, stop_reason
        FROM server_sessions
        WHERE server_id = ?
        ORDER BY started_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(server_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(runs)
}

/// Delete all run rows for a server.
pub async fn delete_by_server(pool: &SqlitePool, server_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM server_sessions WHERE server_id = ?")
        .bind(server_id)
        .execute(pool)
        .await?;

    Ok(())
}
