// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Decoder for the engine's multiplexed log stream.
//!
//! Containers without a TTY emit frames of
//! `[1 B stream type][3 B pad][4 B big-endian payload length][payload]`.
//! The decoder accumulates raw bytes and peels a frame only once the full
//! `8 + len` bytes are buffered, so payloads never leak across a frame
//! boundary no matter how the transport slices the stream.

use bytes::{Buf, Bytes, BytesMut};

/// Frame header length: type byte, three pad bytes, 4-byte length.
pub const FRAME_HEADER_LEN: usize = 8;

/// Which stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// stdin (only seen on attach endpoints).
    Stdin,
    /// stdout.
    Stdout,
    /// stderr.
    Stderr,
    /// An unknown type byte; payload is still framed correctly.
    Unknown(u8),
}

impl From<u8> for StreamKind {
    fn from(byte: u8) -> Self {
        match byte {
            0 => StreamKind::Stdin,
            1 => StreamKind::Stdout,
            2 => StreamKind::Stderr,
            other => StreamKind::Unknown(other),
        }
    }
}

/// One complete log frame.
#[derive(Debug, Clone)]
pub struct LogFrame {
    /// Originating stream.
    pub kind: StreamKind,
    /// Raw payload bytes.
    pub payload: Bytes,
}

/// Incremental frame accumulator.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append transport bytes to the accumulator.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, or `None` until enough bytes arrive.
    pub fn next_frame(&mut self) -> Option<LogFrame> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return None;
        }

        let payload_len =
            u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if self.buf.len() < FRAME_HEADER_LEN + payload_len {
            return None;
        }

        let kind = StreamKind::from(self.buf[0]);
        self.buf.advance(FRAME_HEADER_LEN);
        let payload = self.buf.split_to(payload_len).freeze();

        Some(LogFrame { kind, payload })
    }

    /// Bytes buffered but not yet peeled into a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
