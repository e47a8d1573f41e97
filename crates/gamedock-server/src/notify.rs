// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Crash and error notification sinks.
//!
//! Notifications are fire-and-forget: a failed delivery is logged and never
//! rolls back the state change that triggered it. The composite sink tries
//! the chat channel first and falls back to the webhook.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use gamedock_store::settings::{self, Bag};

/// Outbound request timeout. Deliveries are best-effort; a slow chat API
/// must not stall the scheduler.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

const DISCORD_API: &str = "https://discord.com/api/v10";

/// A frontend-reported error forwarded to the error channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorReport {
    /// Error message.
    pub message: String,
    /// Stack trace, if captured.
    #[serde(default)]
    pub stack: Option<String>,
    /// Page URL the error occurred on.
    #[serde(default)]
    pub url: Option<String>,
    /// Component that raised the error.
    #[serde(default)]
    pub component: Option<String>,
}

/// Async sink for crash and error events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A managed game container died without an intentional stop.
    async fn crash(&self, server_name: &str);

    /// A client reported an error worth surfacing to operators.
    async fn error(&self, report: &ErrorReport);
}

/// Posts rich messages to chat channels through a bot token.
///
/// Channel ids come from the bot settings bag so operators can repoint them
/// without a restart.
pub struct ChannelNotifier {
    pool: SqlitePool,
    http: reqwest::Client,
    bot_token: String,
}

impl ChannelNotifier {
    /// Create a channel notifier with the given bot token.
    pub fn new(pool: SqlitePool, bot_token: String) -> Self {
        Self {
            pool,
            http: reqwest::Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .unwrap_or_default(),
            bot_token,
        }
    }

    async fn channel_for(&self, key: &str) -> Option<String> {
        match settings::get(&self.pool, Bag::Bot, key).await {
            Ok(id) if !id.is_empty() => Some(id),
            Ok(_) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read notifier channel");
                None
            }
        }
    }

    async fn post_embed(
        &self,
        channel_id: &str,
        embed: serde_json::Value,
    ) -> Result<(), String> {
        let url = format!("{}/channels/{}/messages", DISCORD_API, channel_id);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&json!({ "embeds": [embed] }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("chat API returned {}", response.status()));
        }
        Ok(())
    }

    /// Deliver a crash message; the error is surfaced so the composite can
    /// fall back.
    pub async fn try_crash(&self, server_name: &str) -> Result<(), String> {
        let channel = self
            .channel_for("crashes_channel_id")
            .await
            .ok_or_else(|| "no crashes channel configured".to_string())?;
        self.post_embed(
            &channel,
            json!({
                "title": "Server crashed",
                "description": format!("**{}** stopped unexpectedly.", server_name),
                "color": 0xed4245,
            }),
        )
        .await
    }

    /// Deliver an error report; the error is surfaced so the composite can
    /// fall back.
    pub async fn try_error(&self, report: &ErrorReport) -> Result<(), String> {
        let channel = self
            .channel_for("errors_channel_id")
            .await
            .ok_or_else(|| "no errors channel configured".to_string())?;

        let mut fields = Vec::new();
        if let Some(component) = &report.component {
            fields.push(json!({ "name": "Component", "value": component, "inline": true }));
        }
        if let Some(url) = &report.url {
            fields.push(json!({ "name": "URL", "value": url, "inline": true }));
        }
        if let Some(stack) = &report.stack {
            let stack: String = stack.chars().take(1000).collect();
            fields.push(json!({ "name": "Stack", "value": format!("```{}```", stack) }));
        }

        self.post_embed(
            &channel,
            json!({
                "title": "Panel error",
                "description": report.message,
                "color": 0xfaa61a,
                "fields": fields,
            }),
        )
        .await
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn crash(&self, server_name: &str) {
        if let Err(e) = self.try_crash(server_name).await {
            warn!(server = %server_name, error = %e, "Crash notification failed");
        }
    }

    async fn error(&self, report: &ErrorReport) {
        if let Err(e) = self.try_error(report).await {
            warn!(error = %e, "Error notification failed");
        }
    }
}

/// Posts plain messages to a generic webhook URL.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a webhook notifier for the given URL.
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .unwrap_or_default(),
            url,
        }
    }

    async fn post_content(&self, content: String) -> Result<(), String> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "content": content }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("webhook returned {}", response.status()));
        }
        Ok(())
    }

    /// Deliver a crash message.
    pub async fn try_crash(&self, server_name: &str) -> Result<(), String> {
        self.post_content(format!(":rotating_light: **{}** stopped unexpectedly.", server_name))
            .await
    }

    /// Deliver an error report.
    pub async fn try_error(&self, report: &ErrorReport) -> Result<(), String> {
        self.post_content(format!(":warning: Panel error: {}", report.message))
            .await
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn crash(&self, server_name: &str) {
        if let Err(e) = self.try_crash(server_name).await {
            warn!(server = %server_name, error = %e, "Crash webhook failed");
        }
    }

    async fn error(&self, report: &ErrorReport) {
        if let Err(e) = self.try_error(report).await {
            warn!(error = %e, "Error webhook failed");
        }
    }
}

/// Channel-first delivery with webhook fallback.
///
/// Either half may be absent; with neither configured, events are only
/// logged.
pub struct CompositeNotifier {
    channel: Option<ChannelNotifier>,
    webhook: Option<WebhookNotifier>,
}

impl CompositeNotifier {
    /// Build from optional halves.
    pub fn new(channel: Option<ChannelNotifier>, webhook: Option<WebhookNotifier>) -> Self {
        Self { channel, webhook }
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    async fn crash(&self, server_name: &str) {
        if let Some(channel) = &self.channel {
            match channel.try_crash(server_name).await {
                Ok(()) => return,
                Err(e) => debug!(error = %e, "Channel crash delivery failed, trying webhook"),
            }
        }
        if let Some(webhook) = &self.webhook {
            if let Err(e) = webhook.try_crash(server_name).await {
                warn!(server = %server_name, error = %e, "Crash notification failed");
            }
            return;
        }
        warn!(server = %server_name, "Crash detected but no notifier configured");
    }

    async fn error(&self, report: &ErrorReport) {
        if let Some(channel) = &self.channel {
            match channel.try_error(report).await {
                Ok(()) => return,
                Err(e) => debug!(error = %e, "Channel error delivery failed, trying webhook"),
            }
        }
        if let Some(webhook) = &self.webhook {
            if let Err(e) = webhook.try_error(report).await {
                warn!(error = %e, "Error notification failed");
            }
        }
    }
}
