//! WebSocket HTTP upgrade handshake (RFC 6455 Section 4).
//!
//! Server side: recognise an upgrade request, pull out `Sec-WebSocket-Key`,
//! compute `Sec-WebSocket-Accept` and write the `101 Switching Protocols`
//! response. Client side: build the upgrade request and check the server's
//! answer.
//!
//! - [`HandshakeResponder::respond`]: server entry point, one call per connection
//! - [`compute_accept_key`]: SHA-1 + Base64 per RFC 6455 Section 4.2.2
//! - [`parse_headers`]: colon-delimited header extraction
//! - [`read_http_head`] / [`read_response_head`]: accumulate reads up to the blank line ending the head
//! - [`build_upgrade_request`] / [`verify_upgrade_response`]: client side

use std::io::{self, Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{CryptoRng, Rng};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::config::MissingKeyPolicy;
use crate::error::{Result, WsError};

/// RFC 6455 magic GUID concatenated with the client key for Sec-WebSocket-Accept.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Blank line that ends an HTTP head.
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Compute the `Sec-WebSocket-Accept` value per RFC 6455 Section 4.2.2.
///
/// Concatenates `client_key` + [`WS_GUID`], SHA-1 hashes, then Base64 encodes.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// An upgrade request starts with the ASCII method `GET`.
pub fn is_upgrade_request(raw: &[u8]) -> bool {
    raw.starts_with(b"GET")
}

/// Header name/value pairs from one HTTP head, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Case-insensitive lookup. A repeated header resolves to its last value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse `name: value` lines separated by CRLF.
///
/// Name and value are trimmed. Lines without exactly one colon are skipped,
/// which also drops the request line and any header whose value itself
/// contains a colon (such as `Host: example.com:8000`).
pub fn parse_headers(text: &str) -> Headers {
    let mut headers = Vec::new();
    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split(':');
        if let (Some(name), Some(value), None) = (parts.next(), parts.next(), parts.next()) {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    Headers(headers)
}

/// Write the `101 Switching Protocols` response to the stream.
///
/// The response goes out in a single `write_all` so a peer reading the head
/// does not see it cut at the accept key.
pub fn write_upgrade_response<W: Write>(stream: &mut W, accept_key: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         \r\n",
        accept_key
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

/// Write a `400 Bad Request` response with the given reason.
pub fn write_bad_request<W: Write>(stream: &mut W, reason: &str) -> std::io::Result<()> {
    let body = format!("Bad Request: {}", reason);
    let response = format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

/// What the responder did with the bytes it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Not an HTTP request; nothing was written.
    NotHttp,
    /// `101 Switching Protocols` was written with this accept token.
    Upgraded { accept: String },
}

/// Server half of the upgrade handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeResponder {
    missing_key: MissingKeyPolicy,
}

impl HandshakeResponder {
    pub fn new(missing_key: MissingKeyPolicy) -> Self {
        HandshakeResponder { missing_key }
    }

    /// Answer the upgrade request in `raw`, writing the response to `stream`.
    ///
    /// Anything that does not start with `GET` is left alone and reported as
    /// [`HandshakeOutcome::NotHttp`]. Only `Sec-WebSocket-Key` is looked at;
    /// `Upgrade`, `Connection` and the version header are not validated.
    pub fn respond<W: Write>(&self, raw: &[u8], stream: &mut W) -> Result<HandshakeOutcome> {
        if !is_upgrade_request(raw) {
            debug!(len = raw.len(), "not an HTTP upgrade request, ignoring");
            return Ok(HandshakeOutcome::NotHttp);
        }

        let headers = parse_headers(&String::from_utf8_lossy(raw));
        let client_key = match headers.get("Sec-WebSocket-Key") {
            Some(key) => key.to_string(),
            None => match self.missing_key {
                MissingKeyPolicy::Proceed => {
                    warn!("upgrade request has no Sec-WebSocket-Key, answering for an empty key");
                    String::new()
                }
                MissingKeyPolicy::Reject => {
                    let reason = "missing Sec-WebSocket-Key header";
                    let _ = write_bad_request(stream, reason);
                    return Err(WsError::Handshake(reason.to_string()));
                }
            },
        };

        let accept = compute_accept_key(&client_key);
        write_upgrade_response(stream, &accept)?;
        debug!(%accept, "sent 101 Switching Protocols");
        Ok(HandshakeOutcome::Upgraded { accept })
    }
}

/// An HTTP head and whatever followed it in the same reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHead {
    /// Bytes up to and including the blank line.
    pub head: Vec<u8>,
    /// Bytes after the blank line; already frame data.
    pub rest: Vec<u8>,
}

/// Read an upgrade request head from `stream` (server side).
///
/// Reads at most `chunk_size` bytes at a time. Input that cannot be an
/// upgrade request is returned as soon as that is clear, and EOF returns what
/// arrived so far. Fails with [`WsError::Handshake`] once `limit` bytes pass
/// without a blank line, and with [`WsError::ConnectionClosed`] on EOF before
/// any byte.
pub fn read_http_head<R: Read>(stream: &mut R, chunk_size: usize, limit: usize) -> Result<HttpHead> {
    read_head(stream, chunk_size, limit, true)
}

/// Read a response head from `stream` (client side).
///
/// Same as [`read_http_head`] but keeps reading until the blank line no
/// matter how the head starts.
pub fn read_response_head<R: Read>(
    stream: &mut R,
    chunk_size: usize,
    limit: usize,
) -> Result<HttpHead> {
    read_head(stream, chunk_size, limit, false)
}

/// Accumulate reads until the blank line ending an HTTP head.
///
/// With `expect_get`, stops early once the bytes cannot be a `GET` request.
fn read_head<R: Read>(
    stream: &mut R,
    chunk_size: usize,
    limit: usize,
    expect_get: bool,
) -> Result<HttpHead> {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            if buf.is_empty() {
                return Err(WsError::ConnectionClosed);
            }
            return Ok(HttpHead {
                head: buf,
                rest: Vec::new(),
            });
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = buf
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR)
        {
            let rest = buf.split_off(pos + HEAD_TERMINATOR.len());
            return Ok(HttpHead { head: buf, rest });
        }
        if expect_get && buf.len() >= 3 && !is_upgrade_request(&buf) {
            return Ok(HttpHead {
                head: buf,
                rest: Vec::new(),
            });
        }
        if buf.len() >= limit {
            return Err(WsError::Handshake(format!(
                "HTTP head exceeds {} bytes",
                limit
            )));
        }
    }
}

/// Random 16-byte nonce, Base64 encoded, for `Sec-WebSocket-Key`.
pub fn generate_key<R: CryptoRng>(rng: &mut R) -> String {
    let nonce: [u8; 16] = rng.random();
    BASE64.encode(nonce)
}

/// Client upgrade request for `path` on `host`.
pub fn build_upgrade_request(host: &str, path: &str, key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: {}\r\n\
         \r\n",
        path, host, key
    )
}

/// Check that `head` is a `101` response carrying the accept token for `key`.
pub fn verify_upgrade_response(head: &[u8], key: &str) -> Result<()> {
    let text = String::from_utf8_lossy(head);
    let status_line = text.split("\r\n").next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    if parts.next() != Some("HTTP/1.1") || parts.next() != Some("101") {
        return Err(WsError::Handshake(format!(
            "unexpected status line: {}",
            status_line
        )));
    }

    let expected = compute_accept_key(key);
    match parse_headers(&text).get("Sec-WebSocket-Accept") {
        Some(accept) if accept == expected => Ok(()),
        Some(accept) => Err(WsError::Handshake(format!(
            "Sec-WebSocket-Accept mismatch: expected {}, got {}",
            expected, accept
        ))),
        None => Err(WsError::Handshake(
            "missing Sec-WebSocket-Accept header".to_string(),
        )),
    }
}
