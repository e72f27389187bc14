//! Opening handshake (RFC 6455 §4.2), server side.
//!
//! The server reads the HTTP upgrade request head, extracts
//! `Sec-WebSocket-Key`, and answers `101 Switching Protocols` with the
//! derived `Sec-WebSocket-Accept`. Only the key is inspected; the other
//! upgrade headers are not validated.
//!
//! # Example
//!
//! ```
//! use sockwire::handshake::{build_upgrade_response, compute_accept_key, extract_key};
//!
//! let head = "GET /chat HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
//! let key = extract_key(head).unwrap();
//! let accept = compute_accept_key(key);
//! assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
//! assert!(build_upgrade_response(&accept).starts_with("HTTP/1.1 101"));
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HandshakeError, Result};

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Header name matched, case-sensitively, in the request head.
const KEY_HEADER: &str = "Sec-WebSocket-Key: ";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Reply sent, best-effort, when the request carries no key.
pub const BAD_REQUEST_RESPONSE: &str =
    "HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// An HTTP request head and the bytes that followed it on the stream.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request line and headers, terminator included.
    pub head: String,
    /// Bytes read past the blank line. They belong to the frame stream.
    pub leftover: Bytes,
}

/// Read up to and including the first blank line.
///
/// # Errors
///
/// - `HeadTooLarge` if no blank line appears within `max` bytes
/// - `UnexpectedEof` if the stream ends first
/// - `InvalidHead` if the head is not UTF-8
pub async fn read_request_head<R>(reader: &mut R, max: usize) -> Result<RequestHead>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(max.min(1024));
    let mut searched = 0;

    loop {
        if let Some(pos) = find_terminator(&buf[searched..]) {
            let end = searched + pos + HEAD_TERMINATOR.len();
            if end > max {
                return Err(HandshakeError::HeadTooLarge(max).into());
            }
            let head = buf.split_to(end);
            let head = String::from_utf8(head.to_vec()).map_err(|_| HandshakeError::InvalidHead)?;
            return Ok(RequestHead {
                head,
                leftover: buf.freeze(),
            });
        }

        if buf.len() >= max {
            return Err(HandshakeError::HeadTooLarge(max).into());
        }
        // The terminator may straddle two reads.
        searched = buf.len().saturating_sub(HEAD_TERMINATOR.len() - 1);

        buf.reserve(1024);
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(HandshakeError::UnexpectedEof.into());
        }
    }
}

fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
}

/// Value of the `Sec-WebSocket-Key` header: the run of non-whitespace
/// characters after the literal `Sec-WebSocket-Key: `.
pub fn extract_key(head: &str) -> Option<&str> {
    let start = head.find(KEY_HEADER)? + KEY_HEADER.len();
    let rest = &head[start..];
    let end = rest
        .find(|c: char| c.is_whitespace())
        .unwrap_or(rest.len());
    let key = &rest[..end];
    (!key.is_empty()).then_some(key)
}

/// Compute the Sec-WebSocket-Accept value from the client's key.
/// SHA-1(key + GUID) -> Base64.
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// The 101 Switching Protocols response.
pub fn build_upgrade_response(accept_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key
    )
}

/// Run the whole server handshake on `stream`.
///
/// Returns the bytes that followed the request head. A request without a
/// key gets a `400 Bad Request` reply before the error is returned.
pub async fn accept<S>(stream: &mut S, max_head_size: usize) -> Result<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let RequestHead { head, leftover } = read_request_head(stream, max_head_size).await?;

    let key = match extract_key(&head) {
        Some(key) => key,
        None => {
            if let Err(e) = stream.write_all(BAD_REQUEST_RESPONSE.as_bytes()).await {
                tracing::debug!("Failed to send 400 response: {}", e);
            }
            let _ = stream.shutdown().await;
            return Err(HandshakeError::MissingKey.into());
        }
    };

    let response = build_upgrade_response(&compute_accept_key(key));
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    tracing::debug!(leftover = leftover.len(), "handshake complete");
    Ok(leftover)
}
