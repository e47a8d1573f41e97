// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Raw stats records from the engine's streaming stats endpoint.
//!
//! The wire format is newline-delimited JSON; each record carries cumulative
//! CPU totals, so rates are computed against the previous record by the
//! telemetry layer, not here.

use bytes::BytesMut;
use serde::Deserialize;

use crate::Result;

/// Cumulative CPU usage counters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuUsage {
    /// Total CPU time consumed by the container, nanoseconds.
    #[serde(default)]
    pub total_usage: u64,
}

/// CPU section of a stats record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuStats {
    /// Container CPU counters.
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    /// Host CPU time consumed by everything, nanoseconds.
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
    /// CPUs available to the container.
    #[serde(default)]
    pub online_cpus: Option<u32>,
}

/// Memory section of a stats record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStats {
    /// Current usage in bytes.
    #[serde(default)]
    pub usage: Option<u64>,
    /// Limit in bytes.
    #[serde(default)]
    pub limit: Option<u64>,
}

/// One decoded stats record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsSample {
    /// CPU counters.
    #[serde(default)]
    pub cpu_stats: CpuStats,
    /// Memory counters.
    #[serde(default)]
    pub memory_stats: MemoryStats,
}

/// Accumulates transport bytes and yields one JSON record per line.
///
/// Records may arrive split across transport chunks; a line is only decoded
/// once its terminating newline is buffered.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: BytesMut,
}

impl NdjsonDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append transport bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete record, skipping blank lines.
    pub fn next_sample(&mut self) -> Result<Option<StatsSample>> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let line = self.buf.split_to(pos + 1);
            let line = &line[..pos];
            let trimmed = line
                .strip_suffix(b"\r")
                .unwrap_or(line);
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_slice(trimmed)?));
        }
    }
}
