// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host-level CPU, memory, and disk sampler.
//!
//! Samples every three seconds: the kernel's aggregate CPU line from
//! `/proc/stat`, memory from `/proc/meminfo`, and disk totals from a
//! `df -B1` invocation against the data directory.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(3);
const CHANNEL_CAPACITY: usize = 16;

const MIB: f64 = (1u64 << 20) as f64;
const GIB: f64 = (1u64 << 30) as f64;

/// One host sample.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct HostStatsPoint {
    /// Whole-machine CPU load, 0..=100.
    pub cpu_percent: f64,
    /// Memory in use, MiB.
    pub mem_usage_mb: f64,
    /// Total memory, MiB.
    pub mem_total_mb: f64,
    /// Data disk used, GiB.
    pub disk_used_gb: f64,
    /// Data disk size, GiB.
    pub disk_total_gb: f64,
}

/// Aggregate CPU counters from `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTotals {
    /// Sum of all time columns.
    pub total: u64,
    /// idle + iowait.
    pub idle: u64,
}

/// Parse the aggregate `cpu ` line of `/proc/stat`.
pub fn parse_proc_stat(contents: &str) -> Option<CpuTotals> {
    let line = contents
        .lines()
        .find(|l| l.starts_with("cpu ") || l.starts_with("cpu\t"))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    // user nice system idle iowait irq softirq steal [guest guest_nice]
    if fields.len() < 5 {
        return None;
    }

    Some(CpuTotals {
        total: fields.iter().sum(),
        idle: fields[3] + fields[4],
    })
}

/// CPU load between two samples: delta of busy time over delta of total.
pub fn cpu_percent_between(prev: CpuTotals, cur: CpuTotals) -> f64 {
    let total_delta = cur.total.saturating_sub(prev.total) as f64;
    if total_delta <= 0.0 {
        return 0.0;
    }
    let busy_delta = (cur.total.saturating_sub(cur.idle))
        .saturating_sub(prev.total.saturating_sub(prev.idle)) as f64;
    (busy_delta / total_delta * 100.0).clamp(0.0, 100.0)
}

/// Parse `MemTotal` and `MemAvailable` (kB) from `/proc/meminfo`.
pub fn parse_meminfo(contents: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut available = None;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = rest.split_whitespace().next()?.parse().ok();
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = rest.split_whitespace().next()?.parse().ok();
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }
    Some((total?, available?))
}

/// Parse `(total_bytes, used_bytes)` from the second line of `df -B1` output.
pub fn parse_df_output(output: &str) -> Option<(u64, u64)> {
    let line = output.lines().nth(1)?;
    let mut fields = line.split_whitespace();
    let _filesystem = fields.next()?;
    let total = fields.next()?.parse().ok()?;
    let used = fields.next()?.parse().ok()?;
    Some((total, used))
}

/// Spawn the host sampler. Each record is an already-serialized JSON
/// payload ready for the push stream.
pub fn spawn_host_stats(
    data_dir: PathBuf,
    token: CancellationToken,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut prev_cpu: Option<CpuTotals> = None;

        loop {
            let point = sample_host(&data_dir, &mut prev_cpu).await;
            if let Ok(payload) = serde_json::to_string(&point)
                && tx.send(payload).await.is_err()
            {
                return;
            }

            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("Host stats producer cancelled");
                    return;
                }

                _ = tokio::time::sleep(SAMPLE_INTERVAL) => {}
            }
        }
    });

    rx
}

async fn sample_host(data_dir: &PathBuf, prev_cpu: &mut Option<CpuTotals>) -> HostStatsPoint {
    let cpu_percent = match tokio::fs::read_to_string("/proc/stat").await {
        Ok(contents) => match parse_proc_stat(&contents) {
            Some(cur) => {
                let pct = prev_cpu
                    .map(|prev| cpu_percent_between(prev, cur))
                    .unwrap_or(0.0);
                *prev_cpu = Some(cur);
                pct
            }
            None => 0.0,
        },
        Err(_) => 0.0,
    };

    let (mem_usage_mb, mem_total_mb) = match tokio::fs::read_to_string("/proc/meminfo").await {
        Ok(contents) => match parse_meminfo(&contents) {
            Some((total_kb, available_kb)) => (
                (total_kb.saturating_sub(available_kb)) as f64 * 1024.0 / MIB,
                total_kb as f64 * 1024.0 / MIB,
            ),
            None => (0.0, 0.0),
        },
        Err(_) => (0.0, 0.0),
    };

    let (disk_used_gb, disk_total_gb) = match df_bytes(data_dir).await {
        Some((total, used)) => (used as f64 / GIB, total as f64 / GIB),
        None => (0.0, 0.0),
    };

    HostStatsPoint {
        cpu_percent,
        mem_usage_mb,
        mem_total_mb,
        disk_used_gb,
        disk_total_gb,
    }
}

async fn df_bytes(data_dir: &PathBuf) -> Option<(u64, u64)> {
    let output = Command::new("df")
        .arg("-B1")
        .arg(data_dir)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_df_output(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_STAT: &str = "cpu  1000 50 300 5000 200 10 20 0 0 0\n\
                             cpu0 500 25 150 2500 100 5 10 0 0 0\n\
                             intr 12345\n";

    const MEMINFO: &str = "MemTotal:       16384000 kB\n\
                           MemFree:         2048000 kB\n\
                           MemAvailable:    8192000 kB\n\
                           Buffers:          512000 kB\n";

    const DF: &str = "Filesystem       1B-blocks        Used   Available Use% Mounted on\n\
                      /dev/sda1     500107862016 250053931008 250053931008  50% /data\n";

    #[test]
    fn test_parse_proc_stat() {
        let totals = parse_proc_stat(PROC_STAT).unwrap();
        assert_eq!(totals.total, 1000 + 50 + 300 + 5000 + 200 + 10 + 20);
        assert_eq!(totals.idle, 5000 + 200);
    }

    #[test]
    fn test_parse_proc_stat_rejects_short_line() {
        assert!(parse_proc_stat("cpu 1 2 3\n").is_none());
        assert!(parse_proc_stat("intr 123\n").is_none());
    }

    #[test]
    fn test_cpu_percent_between() {
        let prev = CpuTotals {
            total: 1000,
            idle: 800,
        };
        let cur = CpuTotals {
            total: 2000,
            idle: 1500,
        };
        // busy went 200 -> 500 over 1000 total: 30%
        assert_eq!(cpu_percent_between(prev, cur), 30.0);
    }

    #[test]
    fn test_cpu_percent_no_progress_is_zero() {
        let same = CpuTotals {
            total: 1000,
            idle: 500,
        };
        assert_eq!(cpu_percent_between(same, same), 0.0);
    }

    #[test]
    fn test_parse_meminfo() {
        let (total, available) = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(total, 16_384_000);
        assert_eq!(available, 8_192_000);
    }

    #[test]
    fn test_parse_meminfo_missing_field() {
        assert!(parse_meminfo("MemTotal: 100 kB\n").is_none());
    }

    #[test]
    fn test_parse_df_output() {
        let (total, used) = parse_df_output(DF).unwrap();
        assert_eq!(total, 500_107_862_016);
        assert_eq!(used, 250_053_931_008);
    }

    #[test]
    fn test_parse_df_output_header_only() {
        assert!(parse_df_output("Filesystem 1B-blocks Used\n").is_none());
    }
}
