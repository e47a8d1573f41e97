// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test fixtures: an in-process fake engine speaking the Docker API
//! over a real Unix socket, and a recording notifier.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use gamedock_server::notify::{ErrorReport, Notifier};

/// One fake container.
#[derive(Debug, Clone, Default)]
pub struct FakeContainer {
    pub image: String,
    pub running: bool,
    pub paused: bool,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
    pub tty: bool,
}

/// Mutable fake engine state.
#[derive(Debug, Default)]
pub struct EngineState {
    pub containers: HashMap<String, FakeContainer>,
    /// Image substring that makes pulls fail.
    pub fail_pull: Option<String>,
}

/// A fake Docker engine bound to a Unix socket in a tempdir.
pub struct FakeEngine {
    pub socket_path: PathBuf,
    state: Arc<Mutex<EngineState>>,
    _dir: TempDir,
}

impl FakeEngine {
    /// Bind the socket and start serving.
    pub async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        let state = Arc::new(Mutex::new(EngineState::default()));

        let shared = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let state = shared.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });

        Self {
            socket_path,
            state,
            _dir: dir,
        }
    }

    /// Flip a container's running flag out from under the scheduler, the
    /// way an external `docker stop` or an OOM kill would.
    pub async fn set_running(&self, name: &str, running: bool) {
        let mut state = self.state.lock().await;
        if let Some(container) = state.containers.get_mut(name) {
            container.running = running;
        }
    }

    /// Make pulls of any image containing `needle` fail.
    pub async fn fail_pulls_matching(&self, needle: &str) {
        self.state.lock().await.fail_pull = Some(needle.to_string());
    }

    /// Snapshot one container.
    pub async fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().await.containers.get(name).cloned()
    }

    /// Names of containers currently running.
    pub async fn running_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Seed a container directly (e.g. an infra service).
    pub async fn seed_container(&self, name: &str, container: FakeContainer) {
        self.state
            .lock()
            .await
            .containers
            .insert(name.to_string(), container);
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    state: Arc<Mutex<EngineState>>,
) -> std::io::Result<()> {
    let (method, path, body) = read_request(&mut stream).await?;
    let response = route(&method, &path, &body, &state).await;
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

async fn read_request(stream: &mut UnixStream) -> std::io::Result<(String, String, Vec<u8>)> {
    let mut buf = Vec::new();
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Ok((method, path, body))
}

fn respond(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )
}

fn not_found(name: &str) -> String {
    respond(
        404,
        "Not Found",
        &json!({ "message": format!("No such container: {}", name) }).to_string(),
    )
}

fn query_param(path: &str, key: &str) -> Option<String> {
    let (_, query) = path.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
}

async fn route(
    method: &str,
    path: &str,
    body: &[u8],
    state: &Arc<Mutex<EngineState>>,
) -> String {
    let route_path = path.split('?').next().unwrap_or(path);
    let segments: Vec<&str> = route_path
        .trim_start_matches("/v1.41")
        .trim_matches('/')
        .split('/')
        .collect();

    match (method, segments.as_slice()) {
        ("GET", ["containers", "json"]) => {
            let all = query_param(path, "all").as_deref() == Some("1");
            let state = state.lock().await;
            let list: Vec<Value> = state
                .containers
                .iter()
                .filter(|(_, c)| all || c.running)
                .map(|(name, c)| {
                    json!({
                        "Id": name,
                        "Names": [format!("/{}", name)],
                        "Image": c.image,
                        "State": if c.paused { "paused" } else if c.running { "running" } else { "exited" },
                        "Labels": c.labels,
                    })
                })
                .collect();
            respond(200, "OK", &json!(list).to_string())
        }

        ("GET", ["containers", name, "json"]) => {
            let state = state.lock().await;
            match state.containers.get(*name) {
                Some(c) => respond(
                    200,
                    "OK",
                    &json!({
                        "Name": format!("/{}", name),
                        "RestartCount": 0,
                        "State": {
                            "Running": c.running,
                            "Paused": c.paused,
                            "StartedAt": "2025-01-01T00:00:00Z",
                        },
                        "Config": { "Tty": c.tty },
                    })
                    .to_string(),
                ),
                None => not_found(name),
            }
        }

        ("POST", ["containers", "create"]) => {
            let Some(name) = query_param(path, "name") else {
                return respond(400, "Bad Request", r#"{"message":"name required"}"#);
            };
            let spec: Value = serde_json::from_slice(body).unwrap_or_default();
            let labels = spec
                .get("Labels")
                .and_then(|l| serde_json::from_value(l.clone()).ok())
                .unwrap_or_default();
            let image = spec
                .get("Image")
                .and_then(|i| i.as_str())
                .unwrap_or_default()
                .to_string();
            let env = spec
                .get("Env")
                .and_then(|e| serde_json::from_value(e.clone()).ok())
                .unwrap_or_default();
            let mut state = state.lock().await;
            state.containers.insert(
                name.clone(),
                FakeContainer {
                    image,
                    running: false,
                    paused: false,
                    labels,
                    env,
                    tty: false,
                },
            );
            respond(201, "Created", &json!({ "Id": name }).to_string())
        }

        ("POST", ["containers", name, "start"]) => {
            let mut state = state.lock().await;
            match state.containers.get_mut(*name) {
                Some(c) => {
                    c.running = true;
                    respond(204, "No Content", "")
                }
                None => not_found(name),
            }
        }

        ("POST", ["containers", name, "stop"]) | ("POST", ["containers", name, "restart"]) => {
            let restart = segments.last() == Some(&"restart");
            let mut state = state.lock().await;
            match state.containers.get_mut(*name) {
                Some(c) => {
                    c.running = restart;
                    c.paused = false;
                    respond(204, "No Content", "")
                }
                None => not_found(name),
            }
        }

        ("POST", ["containers", name, "pause"]) => {
            let mut state = state.lock().await;
            match state.containers.get_mut(*name) {
                Some(c) if c.running => {
                    c.paused = true;
                    respond(204, "No Content", "")
                }
                Some(_) => respond(409, "Conflict", r#"{"message":"not running"}"#),
                None => not_found(name),
            }
        }

        ("POST", ["containers", name, "unpause"]) => {
            let mut state = state.lock().await;
            match state.containers.get_mut(*name) {
                Some(c) => {
                    c.paused = false;
                    respond(204, "No Content", "")
                }
                None => not_found(name),
            }
        }

        ("DELETE", ["containers", name]) => {
            let mut state = state.lock().await;
            match state.containers.remove(*name) {
                Some(_) => respond(204, "No Content", ""),
                None => not_found(name),
            }
        }

        ("POST", ["images", "create"]) => {
            let image = query_param(path, "fromImage").unwrap_or_default();
            let state = state.lock().await;
            if let Some(needle) = &state.fail_pull
                && image.contains(needle.as_str())
            {
                let progress = format!(
                    "{}\n{}\n",
                    json!({ "status": "Pulling" }),
                    json!({ "error": format!("pull access denied for {}", image) }),
                );
                return respond(200, "OK", &progress);
            }
            let progress = format!(
                "{}\n{}\n",
                json!({ "status": "Pulling" }),
                json!({ "status": "Download complete" }),
            );
            respond(200, "OK", &progress)
        }

        _ => respond(404, "Not Found", r#"{"message":"page not found"}"#),
    }
}

/// A notifier that records events for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    pub crashes: std::sync::Mutex<Vec<String>>,
    pub errors: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn crash(&self, server_name: &str) {
        self.crashes.lock().unwrap().push(server_name.to_string());
    }

    async fn error(&self, report: &ErrorReport) {
        self.errors.lock().unwrap().push(report.message.clone());
    }
}
