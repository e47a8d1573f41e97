// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-subscriber container stats producers.
//!
//! The engine streams cumulative counters; each emitted point is the rate
//! between consecutive records.

use gamedock_docker::DockerClient;
use gamedock_docker::stats::{NdjsonDecoder, StatsSample};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::logs::STREAM_ENDED;

const CHANNEL_CAPACITY: usize = 64;

const MIB: f64 = (1u64 << 20) as f64;

/// One derived stats point.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct StatsPoint {
    /// Container CPU share, 0..=100.
    pub cpu_percent: f64,
    /// Memory in use, MiB.
    pub mem_usage_mb: f64,
    /// Memory limit, MiB.
    pub mem_limit_mb: f64,
}

/// Derive a point from two consecutive cumulative samples.
pub fn compute_point(prev: &StatsSample, cur: &StatsSample) -> StatsPoint {
    let cpu_delta = cur
        .cpu_stats
        .cpu_usage
        .total_usage
        .saturating_sub(prev.cpu_stats.cpu_usage.total_usage) as f64;
    let system_delta = cur.cpu_stats.system_cpu_usage.unwrap_or(0) as i128
        - prev.cpu_stats.system_cpu_usage.unwrap_or(0) as i128;

    let cpu_percent = if system_delta <= 0 {
        0.0
    } else {
        let online = cur.cpu_stats.online_cpus.unwrap_or(1).max(1) as f64;
        (cpu_delta / system_delta as f64 * online * 100.0).clamp(0.0, 100.0)
    };

    StatsPoint {
        cpu_percent,
        mem_usage_mb: cur.memory_stats.usage.unwrap_or(0) as f64 / MIB,
        mem_limit_mb: cur.memory_stats.limit.unwrap_or(0) as f64 / MIB,
    }
}

/// Spawn a cold stats producer for one container. Each record is an
/// already-serialized JSON payload ready for the push stream.
pub fn spawn_container_stats(
    docker: DockerClient,
    container: String,
    token: CancellationToken,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        run_stats_stream(docker, container, token, tx).await;
    });

    rx
}

async fn run_stats_stream(
    docker: DockerClient,
    container: String,
    token: CancellationToken,
    tx: mpsc::Sender<String>,
) {
    let mut body = match docker.stats(&container, true).await {
        Ok(body) => body,
        Err(e) => {
            debug!(container = %container, error = %e, "Stats stream open failed");
            let _ = tx.try_send(terminal_record());
            return;
        }
    };

    let mut decoder = NdjsonDecoder::new();
    let mut prev = StatsSample::default();

    loop {
        let chunk = tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(container = %container, "Stats producer cancelled");
                return;
            }

            chunk = body.next_chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                decoder.extend(&bytes);
                loop {
                    match decoder.next_sample() {
                        Ok(Some(sample)) => {
                            let point = compute_point(&prev, &sample);
                            prev = sample;
                            let Ok(payload) = serde_json::to_string(&point) else {
                                continue;
                            };
                            if tx.send(payload).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            // One malformed record; resync at the next line.
                            debug!(container = %container, error = %e, "Bad stats record");
                        }
                    }
                }
            }
            Ok(None) => {
                let _ = tx.try_send(terminal_record());
                return;
            }
            Err(e) => {
                debug!(container = %container, error = %e, "Stats stream error");
                let _ = tx.try_send(terminal_record());
                return;
            }
        }
    }
}

/// JSON-encoded terminal marker for JSON record streams.
pub fn terminal_record() -> String {
    serde_json::to_string(STREAM_ENDED).unwrap_or_default()
}
