// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Auth sessions. The token is opaque to the rest of the system.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::Result;

/// One authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthSessionRecord {
    /// Opaque bearer token.
    pub token: String,
    /// Identity of the authenticated principal.
    pub principal_id: String,
    /// Display name shown in the panel.
    pub display_name: String,
    /// Avatar image reference, if any.
    pub avatar_ref: Option<String>,
    /// Expiry, unix seconds.
    pub expires_at: i64,
}

/// Insert a new session.
pub async fn insert(pool: &SqlitePool, session: &AuthSessionRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions (token, principal_id, display_name, avatar_ref, expires_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (token) DO UPDATE SET
            principal_id = excluded.principal_id,
            display_name = excluded.display_name,
            avatar_ref = excluded.avatar_ref,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(&session.token)
    .bind(&session.principal_id)
    .bind(&session.display_name)
    .bind(&session.avatar_ref)
    .bind(session.expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Resolve a token to an unexpired session.
pub async fn get_valid(pool: &SqlitePool, token: &str) -> Result<Option<AuthSessionRecord>> {
    let session = sqlx::query_as::<_, AuthSessionRecord>(
        r#"
        SELECT token, principal_id, display_name, avatar_ref, expires_at
        FROM sessions
        WHERE token = ? AND expires_at > ?
        "#,
    )
    .bind(token)
    .bind(crate::now_unix())
    .fetch_optional(pool)
    .await?;

    Ok(session)
}

/// Delete a session (logout).
pub async fn delete(pool: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

/// Remove sessions whose expiry is past. Returns how many were removed.
pub async fn cleanup_expired(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(crate::now_unix())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
