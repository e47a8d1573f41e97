// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed engine operations.
//!
//! Thin request/response wrappers over [`crate::http`]. Each operation maps
//! one engine endpoint; errors carry the engine's own message so callers can
//! surface it verbatim.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use serde::Deserialize;
use serde_json::json;
use tokio::net::UnixStream;
use tracing::debug;

use crate::http::{self, BodyStream, encode_query};
use crate::{DockerError, Result};

/// Default engine socket path.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Engine API version prefix for every request path.
const API_PREFIX: &str = "/v1.41";

/// Client for the local engine socket.
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
}

/// Lightweight container info from the list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSummary {
    /// Engine-assigned id.
    #[serde(rename = "Id")]
    pub id: String,
    /// Names, each with a leading slash.
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
    /// Image reference the container was created from.
    #[serde(rename = "Image", default)]
    pub image: String,
    /// Coarse state: created, running, paused, exited, ...
    #[serde(rename = "State", default)]
    pub state: String,
    /// Container labels.
    #[serde(rename = "Labels", default)]
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    /// Primary name without the leading slash.
    pub fn name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.strip_prefix('/').unwrap_or(n))
            .unwrap_or(&self.id)
    }

    /// Whether the engine reports the container as running.
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Detailed state from the inspect endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerInspect {
    /// Name with a leading slash.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Times the engine restarted the container.
    #[serde(rename = "RestartCount", default)]
    pub restart_count: i64,
    /// Runtime state block.
    #[serde(rename = "State", default)]
    pub state: InspectState,
    /// Creation-time config block.
    #[serde(rename = "Config", default)]
    pub config: InspectConfig,
}

/// `State` block of an inspect response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InspectState {
    /// Whether the main process is running.
    #[serde(rename = "Running", default)]
    pub running: bool,
    /// Whether the container is paused.
    #[serde(rename = "Paused", default)]
    pub paused: bool,
    /// RFC 3339 start time.
    #[serde(rename = "StartedAt", default)]
    pub started_at: String,
}

/// `Config` block of an inspect response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InspectConfig {
    /// Whether a TTY is attached; decides the log wire format.
    #[serde(rename = "Tty", default)]
    pub tty: bool,
}

/// Everything needed to create a game container.
#[derive(Debug, Clone)]
pub struct CreateContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment entries, `KEY=value`.
    pub env: Vec<String>,
    /// Bind mounts, `host:container`.
    pub binds: Vec<String>,
    /// Memory hard limit in bytes.
    pub memory_limit_bytes: i64,
    /// Memory soft reservation in bytes.
    pub memory_reservation_bytes: i64,
    /// CPU quota in units of 1e-9 CPUs.
    pub nano_cpus: i64,
    /// Container labels.
    pub labels: HashMap<String, String>,
}

/// Engine error body.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

impl DockerClient {
    /// Client for a specific socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Client for `DOCKER_SOCKET`, defaulting to the standard path.
    pub fn from_env() -> Self {
        let path =
            std::env::var("DOCKER_SOCKET").unwrap_or_else(|_| DEFAULT_SOCKET.to_string());
        Self::new(path)
    }

    /// The socket path this client talks to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn err_from(status: u16, body: &[u8]) -> DockerError {
        let message = serde_json::from_slice::<ApiErrorBody>(body)
            .map(|b| b.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
        DockerError::Api { status, message }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let response = http::request(&self.socket_path, "GET", path, None).await?;
        if !(200..300).contains(&response.status) {
            return Err(Self::err_from(response.status, &response.body));
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// POST with no response body expected. 304 (already in the requested
    /// state) counts as success.
    async fn post_unit(&self, path: &str, body: Option<&[u8]>) -> Result<()> {
        let response = http::request(&self.socket_path, "POST", path, body).await?;
        if (200..300).contains(&response.status) || response.status == 304 {
            return Ok(());
        }
        Err(Self::err_from(response.status, &response.body))
    }

    /// List containers, optionally including stopped ones.
    pub async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let path = format!(
            "{}/containers/json?all={}",
            API_PREFIX,
            if all { "1" } else { "0" }
        );
        self.get_json(&path).await
    }

    /// Inspect a container by name or id.
    pub async fn inspect(&self, name: &str) -> Result<ContainerInspect> {
        let path = format!("{}/containers/{}/json", API_PREFIX, encode_query(name));
        self.get_json(&path).await
    }

    /// Create a container from a spec. Host networking, unless-stopped
    /// restart policy, and rotated json-file logging are fixed here; they
    /// are the same for every managed game container.
    pub async fn create(&self, spec: &CreateContainerSpec) -> Result<()> {
        let body = json!({
            "Image": spec.image,
            "Env": spec.env,
            "Labels": spec.labels,
            "HostConfig": {
                "NetworkMode": "host",
                "Binds": spec.binds,
                "RestartPolicy": { "Name": "unless-stopped" },
                "Memory": spec.memory_limit_bytes,
                "MemoryReservation": spec.memory_reservation_bytes,
                "NanoCpus": spec.nano_cpus,
                "LogConfig": {
                    "Type": "json-file",
                    "Config": { "max-size": "50m", "max-file": "3" }
                }
            }
        });
        let path = format!(
            "{}/containers/create?name={}",
            API_PREFIX,
            encode_query(&spec.name)
        );
        let bytes = serde_json::to_vec(&body)?;

        debug!(name = %spec.name, image = %spec.image, "Creating container");
        self.post_unit(&path, Some(&bytes)).await
    }

    /// Start a created container.
    pub async fn start(&self, name: &str) -> Result<()> {
        let path = format!("{}/containers/{}/start", API_PREFIX, encode_query(name));
        self.post_unit(&path, None).await
    }

    /// Stop a container with a grace period in seconds.
    pub async fn stop(&self, name: &str, grace_seconds: u32) -> Result<()> {
        let path = format!(
            "{}/containers/{}/stop?t={}",
            API_PREFIX,
            encode_query(name),
            grace_seconds
        );
        self.post_unit(&path, None).await
    }

    /// Restart a container with a grace period in seconds.
    pub async fn restart(&self, name: &str, grace_seconds: u32) -> Result<()> {
        let path = format!(
            "{}/containers/{}/restart?t={}",
            API_PREFIX,
            encode_query(name),
            grace_seconds
        );
        self.post_unit(&path, None).await
    }

    /// Freeze all container processes.
    pub async fn pause(&self, name: &str) -> Result<()> {
        let path = format!("{}/containers/{}/pause", API_PREFIX, encode_query(name));
        self.post_unit(&path, None).await
    }

    /// Resume a paused container.
    pub async fn unpause(&self, name: &str) -> Result<()> {
        let path = format!("{}/containers/{}/unpause", API_PREFIX, encode_query(name));
        self.post_unit(&path, None).await
    }

    /// Remove a container, optionally force-killing it first.
    pub async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let path = format!(
            "{}/containers/{}?force={}",
            API_PREFIX,
            encode_query(name),
            if force { "1" } else { "0" }
        );
        let response = http::request(&self.socket_path, "DELETE", &path, None).await?;
        if (200..300).contains(&response.status) {
            return Ok(());
        }
        Err(Self::err_from(response.status, &response.body))
    }

    /// Pull an image, blocking until the progress stream completes.
    ///
    /// The endpoint reports 200 and then streams progress records; a record
    /// with an `error` field means the pull failed partway.
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        let path = format!(
            "{}/images/create?fromImage={}",
            API_PREFIX,
            encode_query(image)
        );
        let (status, mut body) = http::open_stream(&self.socket_path, "POST", &path).await?;
        if !(200..300).contains(&status) {
            let mut collected = BytesMut::new();
            while let Some(chunk) = body.next_chunk().await? {
                collected.extend_from_slice(&chunk);
            }
            return Err(Self::err_from(status, &collected));
        }

        let mut pending = BytesMut::new();
        while let Some(chunk) = body.next_chunk().await? {
            pending.extend_from_slice(&chunk);
            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line = pending.split_to(pos + 1);
                let line = &line[..pos];
                if line.is_empty() {
                    continue;
                }
                if let Ok(record) = serde_json::from_slice::<serde_json::Value>(line)
                    && let Some(error) = record.get("error").and_then(|e| e.as_str())
                {
                    return Err(DockerError::PullFailed(error.to_string()));
                }
            }
        }

        debug!(image = %image, "Image pull complete");
        Ok(())
    }

    /// Open the log stream for a container.
    pub async fn logs(
        &self,
        name: &str,
        follow: bool,
        tail: Option<u32>,
        timestamps: bool,
    ) -> Result<BodyStream<UnixStream>> {
        let tail = tail.map(|n| n.to_string()).unwrap_or_else(|| "all".into());
        let path = format!(
            "{}/containers/{}/logs?follow={}&stdout=1&stderr=1&timestamps={}&tail={}",
            API_PREFIX,
            encode_query(name),
            if follow { "1" } else { "0" },
            if timestamps { "1" } else { "0" },
            tail
        );
        let (status, body) = http::open_stream(&self.socket_path, "GET", &path).await?;
        if !(200..300).contains(&status) {
            return Err(DockerError::Api {
                status,
                message: format!("log stream for '{}' refused", name),
            });
        }
        Ok(body)
    }

    /// Open the stats stream (or take a single sample with `stream=false`).
    pub async fn stats(&self, name: &str, stream: bool) -> Result<BodyStream<UnixStream>> {
        let path = format!(
            "{}/containers/{}/stats?stream={}",
            API_PREFIX,
            encode_query(name),
            if stream { "1" } else { "0" }
        );
        let (status, body) = http::open_stream(&self.socket_path, "GET", &path).await?;
        if !(200..300).contains(&status) {
            return Err(DockerError::Api {
                status,
                message: format!("stats stream for '{}' refused", name),
            });
        }
        Ok(body)
    }
}
