// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server-sent event endpoints for container telemetry.
//!
//! Each subscriber gets its own producer; the response stream owns a
//! cancellation guard, so a client disconnect cancels the producer token and
//! the producer notices within one record. Records are framed as
//! `data: <payload>\n\n` with no event names, ids, or retry hints.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use gamedock_store::servers;

use super::auth;
use super::AppState;
use crate::error::{Error, Result};
use crate::telemetry;

/// A producer-backed SSE stream. Dropping it cancels the producer.
pub struct ProducerStream {
    rx: mpsc::Receiver<String>,
    _guard: DropGuard,
}

impl ProducerStream {
    /// Wrap a producer channel and the token that controls it.
    pub fn new(rx: mpsc::Receiver<String>, token: CancellationToken) -> Self {
        Self {
            rx,
            _guard: token.drop_guard(),
        }
    }
}

impl Stream for ProducerStream {
    type Item = std::result::Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
            .map(|record| record.map(|payload| Ok(Event::default().data(payload))))
    }
}

/// Wrap a producer stream in an event-stream response with the headers
/// proxies need to leave it unbuffered.
pub fn sse_response(stream: ProducerStream) -> impl IntoResponse {
    (
        [
            ("cache-control", "no-cache"),
            ("connection", "keep-alive"),
            ("x-accel-buffering", "no"),
        ],
        Sse::new(stream),
    )
}

async fn require_known_server(state: &AppState, id: &str) -> Result<()> {
    servers::get_by_id(&state.pool, id)
        .await?
        .map(|_| ())
        .ok_or_else(|| Error::NotFound(format!("Server '{}' not found", id)))
}

/// `GET /api/servers/{id}/logs` — user only; live log lines.
pub async fn server_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    auth::require_user(&state, &headers).await?;
    require_known_server(&state, &id).await?;

    let token = CancellationToken::new();
    let rx = telemetry::spawn_container_logs(
        state.docker.clone(),
        state.scheduler.container_name(&id),
        token.clone(),
    );

    Ok(sse_response(ProducerStream::new(rx, token)))
}

/// `GET /api/servers/{id}/stats` — user only; live CPU/RAM points.
pub async fn server_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    auth::require_user(&state, &headers).await?;
    require_known_server(&state, &id).await?;

    let token = CancellationToken::new();
    let rx = telemetry::spawn_container_stats(
        state.docker.clone(),
        state.scheduler.container_name(&id),
        token.clone(),
    );

    Ok(sse_response(ProducerStream::new(rx, token)))
}
