// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Panel and bot settings bags.
//!
//! Each bag is a key/value table with an enumerated set of recognized keys.
//! Reads resolve stored value, then static default, then empty string.
//! Writers filter unknown keys against the recognized set.

use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::Result;

/// Which settings table to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bag {
    /// Panel-wide operational settings.
    Panel,
    /// Chat-bot integration settings.
    Bot,
}

/// Recognized panel keys with static defaults.
const PANEL_DEFAULTS: &[(&str, &str)] = &[
    ("host_domain", "aypapol.com"),
    ("game_memory_limit_gb", "6"),
    ("game_cpu_limit", "3"),
    ("auto_stop_hours", "0"),
    ("max_backups_per_server", "5"),
    ("auto_backup_interval_hours", "0"),
];

/// Recognized bot keys. `logs_channel_id` is reserved.
const BOT_DEFAULTS: &[(&str, &str)] = &[
    ("allowed_channel_id", ""),
    ("errors_channel_id", ""),
    ("crashes_channel_id", ""),
    ("logs_channel_id", ""),
];

impl Bag {
    fn table(&self) -> &'static str {
        match self {
            Bag::Panel => "panel_settings",
            Bag::Bot => "bot_settings",
        }
    }

    fn defaults(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Bag::Panel => PANEL_DEFAULTS,
            Bag::Bot => BOT_DEFAULTS,
        }
    }

    /// Whether `key` is a recognized key for this bag.
    pub fn recognizes(&self, key: &str) -> bool {
        self.defaults().iter().any(|(k, _)| *k == key)
    }
}

/// Get one setting: stored value, else static default, else empty.
pub async fn get(pool: &SqlitePool, bag: Bag, key: &str) -> Result<String> {
    let query = format!("SELECT value FROM {} WHERE key = ?", bag.table());
    let stored: Option<(String,)> = sqlx::query_as(&query).bind(key).fetch_optional(pool).await?;

    if let Some((value,)) = stored {
        return Ok(value);
    }

    Ok(bag
        .defaults()
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
        .unwrap_or_default())
}

/// Get one setting parsed as an integer, falling back to `fallback` on a
/// malformed value.
pub async fn get_i64(pool: &SqlitePool, bag: Bag, key: &str, fallback: i64) -> Result<i64> {
    let raw = get(pool, bag, key).await?;
    Ok(raw.trim().parse().unwrap_or(fallback))
}

/// Store one setting. Unknown keys are dropped silently.
pub async fn set(pool: &SqlitePool, bag: Bag, key: &str, value: &str) -> Result<()> {
    if !bag.recognizes(key) {
        return Ok(());
    }

    let query = format!(
        r#"
        INSERT INTO {} (key, value) VALUES (?, ?)
        ON CONFLICT (key) DO UPDATE SET value = excluded.value
        "#,
        bag.table()
    );
    sqlx::query(&query).bind(key).bind(value).execute(pool).await?;

    Ok(())
}

/// Remove a stored setting so the default applies again.
pub async fn unset(pool: &SqlitePool, bag: Bag, key: &str) -> Result<()> {
    let query = format!("DELETE FROM {} WHERE key = ?", bag.table());
    sqlx::query(&query).bind(key).execute(pool).await?;

    Ok(())
}

/// Effective values for every recognized key in the bag.
pub async fn get_all(pool: &SqlitePool, bag: Bag) -> Result<HashMap<String, String>> {
    let query = format!("SELECT key, value FROM {}", bag.table());
    let stored: Vec<(String, String)> = sqlx::query_as(&query).fetch_all(pool).await?;

    let mut all: HashMap<String, String> = bag
        .defaults()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (key, value) in stored {
        if bag.recognizes(&key) {
            all.insert(key, value);
        }
    }

    Ok(all)
}
