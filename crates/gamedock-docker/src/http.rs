// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Minimal HTTP/1.1 over the engine's Unix socket.
//!
//! The engine only ever sees requests we compose ourselves, so this
//! implements exactly what its responses use: a status line, headers,
//! and a body framed by `Content-Length`, chunked transfer encoding, or
//! connection close. Closing the socket is the cancellation path for
//! streaming endpoints; the engine drops the producer on its side.

use bytes::{Buf, Bytes, BytesMut};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::{DockerError, Result};

/// Read buffer growth step.
const READ_CHUNK: usize = 8 * 1024;

/// A fully buffered engine response.
#[derive(Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body bytes.
    pub body: Bytes,
}

/// How the response body is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    /// `Content-Length: n` bytes remain.
    Length(u64),
    /// `Transfer-Encoding: chunked` records.
    Chunked,
    /// Body runs until the engine closes the connection.
    UntilClose,
}

/// Parsed response head.
#[derive(Debug)]
struct ResponseHead {
    status: u16,
    framing: BodyFraming,
}

/// Percent-encode a query value (RFC 3986 unreserved set passes through).
pub fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Write a request head (and optional JSON body) to the socket.
async fn write_request<W: AsyncWrite + Unpin>(
    stream: &mut W,
    method: &str,
    path: &str,
    body: Option<&[u8]>,
) -> Result<()> {
    let mut head = format!(
        "{} {} HTTP/1.1\r\nHost: docker\r\nConnection: close\r\n",
        method, path
    );
    match body {
        Some(body) => {
            head.push_str("Content-Type: application/json\r\n");
            head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        }
        None => head.push_str("Content-Length: 0\r\n\r\n"),
    }

    stream.write_all(head.as_bytes()).await?;
    if let Some(body) = body {
        stream.write_all(body).await?;
    }
    stream.flush().await?;

    Ok(())
}

/// Read bytes until the head terminator `\r\n\r\n` is buffered, then parse
/// the status line and the framing-relevant headers.
async fn read_head<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut BytesMut,
) -> Result<ResponseHead> {
    let head_end = loop {
        if let Some(pos) = find_head_end(buf) {
            break pos;
        }
        let n = read_more(stream, buf).await?;
        if n == 0 {
            return Err(DockerError::Protocol(
                "connection closed before response head".to_string(),
            ));
        }
    };

    let head_bytes = buf.split_to(head_end + 4);
    let head = std::str::from_utf8(&head_bytes)
        .map_err(|_| DockerError::Protocol("non-UTF-8 response head".to_string()))?;

    let mut lines = head.split("\r\n");
    let status_line = lines
        .next()
        .ok_or_else(|| DockerError::Protocol("empty response head".to_string()))?;
    let status = parse_status_line(status_line)?;

    let mut framing = BodyFraming::UntilClose;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        if name == "transfer-encoding" && value.eq_ignore_ascii_case("chunked") {
            framing = BodyFraming::Chunked;
        } else if name == "content-length" {
            let len = value
                .parse::<u64>()
                .map_err(|_| DockerError::Protocol(format!("bad Content-Length: {}", value)))?;
            framing = BodyFraming::Length(len);
        }
    }

    // 204/304 carry no body regardless of headers.
    if status == 204 || status == 304 {
        framing = BodyFraming::Length(0);
    }

    Ok(ResponseHead { status, framing })
}

fn parse_status_line(line: &str) -> Result<u16> {
    // "HTTP/1.1 200 OK"
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(DockerError::Protocol(format!("bad status line: {}", line)));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| DockerError::Protocol(format!("bad status line: {}", line)))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn read_more<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut BytesMut) -> Result<usize> {
    let mut chunk = [0u8; READ_CHUNK];
    let n = stream.read(&mut chunk).await?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

/// Perform a unary request and buffer the whole response body.
pub async fn request(
    socket_path: &Path,
    method: &str,
    path: &str,
    body: Option<&[u8]>,
) -> Result<HttpResponse> {
    let mut stream = UnixStream::connect(socket_path).await?;
    write_request(&mut stream, method, path, body).await?;

    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let head = read_head(&mut stream, &mut buf).await?;

    let mut body_stream = BodyStream::new(stream, buf, head.framing);
    let mut body = BytesMut::new();
    while let Some(chunk) = body_stream.next_chunk().await? {
        body.extend_from_slice(&chunk);
    }

    Ok(HttpResponse {
        status: head.status,
        body: body.freeze(),
    })
}

/// Open a streaming request: the head is read eagerly, the body is consumed
/// incrementally through the returned [`BodyStream`].
pub async fn open_stream(
    socket_path: &Path,
    method: &str,
    path: &str,
) -> Result<(u16, BodyStream<UnixStream>)> {
    let mut stream = UnixStream::connect(socket_path).await?;
    write_request(&mut stream, method, path, None).await?;

    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let head = read_head(&mut stream, &mut buf).await?;

    Ok((head.status, BodyStream::new(stream, buf, head.framing)))
}

/// An incrementally decoded response body.
///
/// Dropping the stream closes the socket, which terminates the engine-side
/// producer; that is the cancellation path for follow-mode logs and
/// streaming stats.
pub struct BodyStream<S> {
    stream: S,
    buf: BytesMut,
    framing: BodyFraming,
    done: bool,
}

impl<S: AsyncRead + Unpin> BodyStream<S> {
    fn new(stream: S, buf: BytesMut, framing: BodyFraming) -> Self {
        Self {
            stream,
            buf,
            framing,
            done: false,
        }
    }

    /// Next decoded slice of body bytes, `None` at end of body.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        match self.framing {
            BodyFraming::Length(remaining) => self.next_sized(remaining).await,
            BodyFraming::UntilClose => self.next_until_close().await,
            BodyFraming::Chunked => self.next_chunked().await,
        }
    }

    async fn next_sized(&mut self, remaining: u64) -> Result<Option<Bytes>> {
        if remaining == 0 {
            self.done = true;
            return Ok(None);
        }
        if self.buf.is_empty() {
            let n = read_more(&mut self.stream, &mut self.buf).await?;
            if n == 0 {
                return Err(DockerError::Protocol(
                    "connection closed mid-body".to_string(),
                ));
            }
        }
        let take = (self.buf.len() as u64).min(remaining) as usize;
        let chunk = self.buf.split_to(take).freeze();
        self.framing = BodyFraming::Length(remaining - take as u64);
        Ok(Some(chunk))
    }

    async fn next_until_close(&mut self) -> Result<Option<Bytes>> {
        if !self.buf.is_empty() {
            return Ok(Some(self.buf.split().freeze()));
        }
        let n = read_more(&mut self.stream, &mut self.buf).await?;
        if n == 0 {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(self.buf.split().freeze()))
    }

    /// Decode one `<hex-size>\r\n<bytes>\r\n` record. A zero-size record
    /// terminates the body.
    async fn next_chunked(&mut self) -> Result<Option<Bytes>> {
        // Size line, possibly arriving across several reads.
        let size = loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.split_to(pos + 2);
                let line = std::str::from_utf8(&line[..pos])
                    .map_err(|_| DockerError::Protocol("non-UTF-8 chunk size".to_string()))?;
                // Chunk extensions after ';' are ignored.
                let size_str = line.split(';').next().unwrap_or_default().trim();
                break usize::from_str_radix(size_str, 16)
                    .map_err(|_| DockerError::Protocol(format!("bad chunk size: {}", size_str)))?;
            }
            let n = read_more(&mut self.stream, &mut self.buf).await?;
            if n == 0 {
                return Err(DockerError::Protocol(
                    "connection closed mid-chunk-header".to_string(),
                ));
            }
        };

        if size == 0 {
            // Trailer section; we request no trailers so expect the bare CRLF.
            self.done = true;
            return Ok(None);
        }

        while self.buf.len() < size + 2 {
            let n = read_more(&mut self.stream, &mut self.buf).await?;
            if n == 0 {
                return Err(DockerError::Protocol(
                    "connection closed mid-chunk".to_string(),
                ));
            }
        }

        let chunk = self.buf.split_to(size).freeze();
        self.buf.advance(2); // trailing CRLF
        Ok(Some(chunk))
    }
}
