// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Live telemetry producers.
//!
//! Three producer families, all cold and per-subscriber: container logs,
//! container stats, and the host sampler. Producers push already-formatted
//! records into a bounded channel; the API layer frames them as server-sent
//! events. Dropping the receiver or cancelling the token stops a producer
//! within one record and releases its engine stream.

pub mod format;
pub mod host;
pub mod logs;
pub mod stats;

pub use format::format_log_line;
pub use host::spawn_host_stats;
pub use logs::{STREAM_ENDED, spawn_container_logs};
pub use stats::{spawn_container_stats, terminal_record};
