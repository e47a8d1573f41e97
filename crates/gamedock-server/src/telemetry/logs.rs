// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-subscriber container log producers.
//!
//! Every subscriber gets its own engine stream; producers never share state.
//! Cancelling the token (or dropping the receiver) tears the producer down
//! within one record, which closes the engine socket.

use gamedock_docker::DockerClient;
use gamedock_docker::logs::FrameDecoder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::format::format_log_line;

/// Terminal record emitted when the underlying stream dies mid-subscription.
pub const STREAM_ENDED: &str = "..stream ended..";

/// Lines buffered per subscriber before backpressure applies.
const CHANNEL_CAPACITY: usize = 256;

/// How many historical lines a new subscriber sees.
const TAIL_LINES: u32 = 500;

/// Spawn a cold log producer for one container.
///
/// The receiver yields normalized lines until the stream ends, the token is
/// cancelled, or the subscriber goes away.
pub fn spawn_container_logs(
    docker: DockerClient,
    container: String,
    token: CancellationToken,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        run_log_stream(docker, container, token, tx).await;
    });

    rx
}

async fn run_log_stream(
    docker: DockerClient,
    container: String,
    token: CancellationToken,
    tx: mpsc::Sender<String>,
) {
    // TTY containers emit a raw byte stream; everything else is framed.
    let tty = match docker.inspect(&container).await {
        Ok(inspect) => inspect.config.tty,
        Err(e) => {
            debug!(container = %container, error = %e, "Inspect before log stream failed");
            let _ = tx.try_send(STREAM_ENDED.to_string());
            return;
        }
    };

    let mut body = match docker.logs(&container, true, Some(TAIL_LINES), true).await {
        Ok(body) => body,
        Err(e) => {
            debug!(container = %container, error = %e, "Log stream open failed");
            let _ = tx.try_send(STREAM_ENDED.to_string());
            return;
        }
    };

    let mut frames = FrameDecoder::new();
    // Partial line carried between raw chunks (TTY mode only; framed
    // payloads are line-aligned by the engine's log driver).
    let mut partial = Vec::new();

    loop {
        let chunk = tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(container = %container, "Log producer cancelled");
                return;
            }

            chunk = body.next_chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                let closed = if tty {
                    emit_raw(&bytes, &mut partial, &tx).await
                } else {
                    emit_framed(&bytes, &mut frames, &tx).await
                };
                if closed {
                    return;
                }
            }
            Ok(None) => {
                if tty && !partial.is_empty() {
                    let line = String::from_utf8_lossy(&partial).into_owned();
                    if let Some(line) = format_log_line(&line) {
                        let _ = tx.try_send(line);
                    }
                }
                let _ = tx.try_send(STREAM_ENDED.to_string());
                return;
            }
            Err(e) => {
                debug!(container = %container, error = %e, "Log stream error");
                let _ = tx.try_send(STREAM_ENDED.to_string());
                return;
            }
        }
    }
}

/// Feed framed bytes through the decoder and forward each payload line.
/// Returns true when the subscriber is gone.
async fn emit_framed(
    bytes: &[u8],
    frames: &mut FrameDecoder,
    tx: &mpsc::Sender<String>,
) -> bool {
    frames.extend(bytes);
    while let Some(frame) = frames.next_frame() {
        let text = String::from_utf8_lossy(&frame.payload);
        for line in text.split('\n') {
            if let Some(line) = format_log_line(line)
                && tx.send(line).await.is_err()
            {
                return true;
            }
        }
    }
    false
}

/// Forward raw TTY bytes, holding the trailing partial line for the next
/// chunk. Returns true when the subscriber is gone.
async fn emit_raw(bytes: &[u8], partial: &mut Vec<u8>, tx: &mpsc::Sender<String>) -> bool {
    partial.extend_from_slice(bytes);
    while let Some(pos) = partial.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = partial.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line[..line.len() - 1]);
        if let Some(line) = format_log_line(&text)
            && tx.send(line).await.is_err()
        {
            return true;
        }
    }
    false
}
