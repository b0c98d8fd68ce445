//! The HTTP/1.1 opening handshake of RFC 6455.
//!
//! Server side: [`parse_request`] the client's upgrade request and
//! [`answer`] it with `101 Switching Protocols` or `400 Bad Request`.
//! Client side: [`build_request`] with a fresh [`client_key`] and
//! [`parse_response`] the server's answer.

use std::collections::HashMap;

use base64::{prelude::BASE64_STANDARD, Engine};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Appended to `Sec-WebSocket-Key` before hashing.
pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
/// The only protocol version this crate speaks.
pub const VERSION: &str = "13";
/// Rejected handshake attempts tolerated before the connection is dropped.
pub const HANDSHAKE_RETRY: u32 = 3;
/// Consecutive empty frame-header receives before an alive check is forced.
pub const RECEIVE_EMPTY_RETRY: u32 = 10;
/// Timeout of that forced alive check, in seconds.
pub const RECEIVE_EMPTY_ALIVE_TIMEOUT: u64 = 10;
/// Largest header block accepted, terminator included.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const MAX_HEADERS: usize = 64;

/// Errors raised while reading a handshake.
#[derive(Debug, Error, PartialEq)]
pub enum HandshakeError {
    /// The header block grew past [`MAX_HEADER_BYTES`] without a terminator.
    #[error("handshake header exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// `httparse` rejected the header block.
    #[error("malformed handshake: {0}")]
    Malformed(String),
}

/// Index just past the `\r\n\r\n` terminating a header block.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Header fields keyed by lowercase name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    fn from_parsed(parsed: &[httparse::Header<'_>]) -> Self {
        let fields = parsed
            .iter()
            .map(|h| {
                (
                    h.name.to_ascii_lowercase(),
                    String::from_utf8_lossy(h.value).trim().to_string(),
                )
            })
            .collect();
        Self(fields)
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A parsed upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub method: String,
    pub path: String,
    pub headers: Headers,
}

/// A parsed handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub code: u16,
    pub headers: Headers,
}

/// Parses a complete request header block.
///
/// # Errors
///
/// [`HandshakeError::Malformed`] when the block is not a complete HTTP request.
pub fn parse_request(head: &[u8]) -> Result<HandshakeRequest, HandshakeError> {
    let mut fields = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut fields);
    match req.parse(head) {
        Ok(httparse::Status::Complete(_)) => Ok(HandshakeRequest {
            method: req.method.unwrap_or_default().to_string(),
            path: req.path.unwrap_or_default().to_string(),
            headers: Headers::from_parsed(req.headers),
        }),
        Ok(httparse::Status::Partial) => Err(HandshakeError::Malformed("incomplete request".into())),
        Err(e) => Err(HandshakeError::Malformed(e.to_string())),
    }
}

/// Parses a complete response header block.
///
/// # Errors
///
/// [`HandshakeError::Malformed`] when the block is not a complete HTTP response.
pub fn parse_response(head: &[u8]) -> Result<HandshakeResponse, HandshakeError> {
    let mut fields = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut fields);
    match res.parse(head) {
        Ok(httparse::Status::Complete(_)) => Ok(HandshakeResponse {
            code: res.code.unwrap_or_default(),
            headers: Headers::from_parsed(res.headers),
        }),
        Ok(httparse::Status::Partial) => Err(HandshakeError::Malformed("incomplete response".into())),
        Err(e) => Err(HandshakeError::Malformed(e.to_string())),
    }
}

/// `base64(sha1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// The server's reply to an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// `101 Switching Protocols`.
    Accept(Vec<u8>),
    /// `400 Bad Request`; the client may try again.
    Reject(Vec<u8>),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept(_))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Verdict::Accept(bytes) | Verdict::Reject(bytes) => bytes,
        }
    }
}

/// Builds the reply to `request` for a server advertised as `host:port`.
///
/// Version 13 with a key is accepted.  A different version is rejected with
/// a `Sec-WebSocket-Version: 13` hint; a missing version or key gets a bare
/// `400`.
pub fn answer(request: &HandshakeRequest, host: &str, port: u16) -> Verdict {
    let (Some(version), Some(key)) = (
        request.headers.get("sec-websocket-version"),
        request.headers.get("sec-websocket-key"),
    ) else {
        return Verdict::Reject(b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec());
    };

    let location = format!("ws://{host}:{port}/");
    if version != VERSION {
        return Verdict::Reject(
            format!(
                "HTTP/1.1 400 Bad Request\r\n\
                 WebSocket-Origin: {host}\r\n\
                 WebSocket-Location: {location}\r\n\
                 Sec-WebSocket-Version: {VERSION}\r\n\r\n"
            )
            .into_bytes(),
        );
    }

    let accept = accept_key(key);
    Verdict::Accept(
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             WebSocket-Origin: {host}\r\n\
             WebSocket-Location: {location}\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\r\n"
        )
        .into_bytes(),
    )
}

/// A random 16-byte nonce, base64-encoded.
pub fn client_key() -> String {
    BASE64_STANDARD.encode(rand::random::<[u8; 16]>())
}

/// The client's upgrade request.
pub fn build_request(host: &str, port: u16, key: &str) -> Vec<u8> {
    format!(
        "GET / HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: {VERSION}\r\n\
         Sec-WebSocket-Key: {key}\r\n\r\n"
    )
    .into_bytes()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
