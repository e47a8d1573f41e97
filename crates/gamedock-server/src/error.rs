// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the control plane.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Control plane errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The request conflicts with existing state (duplicate id, port in use).
    #[error("{0}")]
    Conflict(String),

    /// The request is malformed or not allowed in the current state.
    #[error("{0}")]
    InvalidRequest(String),

    /// No valid principal was presented.
    #[error("Unauthorized")]
    Unauthorized,

    /// The principal may not perform this operation.
    #[error("Forbidden")]
    Forbidden,

    /// Engine operation failed.
    #[error("Engine error: {0}")]
    Docker(#[from] gamedock_docker::DockerError),

    /// Store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] gamedock_store::StoreError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the control plane [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
