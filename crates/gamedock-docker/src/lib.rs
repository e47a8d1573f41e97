// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed client for the local Docker Engine API.
//!
//! The engine speaks HTTP/1.1 over a Unix socket. This crate implements the
//! small slice of that protocol the panel needs, directly on
//! [`tokio::net::UnixStream`]: unary JSON calls plus the two long-lived body
//! streams (logs and stats), decoded from chunked transfer encoding.
//!
//! # Modules
//!
//! - [`http`]: minimal HTTP/1.1 request/response plumbing over the socket
//! - [`client`]: typed engine operations (list, inspect, create, start, ...)
//! - [`logs`]: the multiplexed log-frame decoder for non-TTY containers
//! - [`stats`]: raw stats records and the newline-delimited JSON decoder

#![deny(missing_docs)]

use thiserror::Error;

pub mod client;
pub mod http;
pub mod logs;
pub mod stats;

pub use client::{
    ContainerInspect, ContainerSummary, CreateContainerSpec, DockerClient,
};

/// Errors from engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DockerError {
    /// Socket I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine's response violated HTTP framing.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Engine JSON could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine returned a non-success status.
    #[error("Engine returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message from the engine's error body.
        message: String,
    },

    /// An image pull reported an error record.
    #[error("Image pull failed: {0}")]
    PullFailed(String),
}

impl DockerError {
    /// Whether this is the engine's 404 for a missing container or image.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DockerError::Api { status: 404, .. })
    }
}

/// Result type using [`DockerError`].
pub type Result<T> = std::result::Result<T, DockerError>;
