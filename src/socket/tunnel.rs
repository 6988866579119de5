//! HTTP CONNECT tunnel handshake.
//!
//! A sans-IO state machine: the caller feeds it response bytes and writes the
//! request it produces. [`ConnectJob`](crate::socket::connectjob::ConnectJob)
//! drives it over a real socket.
//!
//! ```text
//! Idle ─install─► CodecInstalled ─build_request─► RequestSent
//!      ─on_data─► AwaitingResponse ─on_data/on_eof─► Success | Failed
//! ```
//!
//! While the handshake runs, the proxy framing layers sit in front of the
//! connection's [`LayerStack`]; [`ProxyTunnelHandshake::finish`] takes them
//! out again so the tunnel is invisible to the application layer.

use crate::base::neterror::NetError;
use crate::socket::client::{Layer, LayerStack};
use crate::socket::proxy::{basic_auth, ProxySettings};
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, HOST, PROXY_AUTHORIZATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use zeroize::Zeroizing;

/// Largest response head accepted from a proxy.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Largest error body waited for before giving up on it.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    CodecInstalled,
    RequestSent,
    AwaitingResponse,
    Success,
    Failed,
}

impl HandshakeState {
    pub fn is_complete(self) -> bool {
        matches!(self, HandshakeState::Success | HandshakeState::Failed)
    }
}

/// One CONNECT exchange with a proxy.
pub struct ProxyTunnelHandshake {
    target: String,
    authorization: Option<Zeroizing<String>>,
    extra_headers: HeaderMap,
    state: HandshakeState,
    buffer: BytesMut,
    status: Option<StatusCode>,
    headers: HeaderMap,
    body_remaining: usize,
    oversized: bool,
    leftover: Bytes,
}

impl ProxyTunnelHandshake {
    /// Handshake tunneling to `host:port`.
    pub fn new(host: &str, port: u16) -> Self {
        let target = if host.contains(':') && !host.starts_with('[') {
            // Bare IPv6 literal
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        Self {
            target,
            authorization: None,
            extra_headers: HeaderMap::new(),
            state: HandshakeState::Idle,
            buffer: BytesMut::new(),
            status: None,
            headers: HeaderMap::new(),
            body_remaining: 0,
            oversized: false,
            leftover: Bytes::new(),
        }
    }

    /// Handshake for `host:port` using the credentials of `proxy`.
    pub fn for_proxy(proxy: &ProxySettings, host: &str, port: u16) -> Self {
        let mut handshake = Self::new(host, port);
        handshake.authorization = proxy.get_auth_header();
        handshake
    }

    /// Authenticate with basic credentials.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.authorization = Some(basic_auth(username, password));
        self
    }

    /// Append a header to the CONNECT request.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.extra_headers.append(name, value);
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Status of the last response head seen so far.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Headers of the last response head seen so far.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Put the CONNECT framing in front of the connection's layers.
    pub fn install(&mut self, layers: &mut LayerStack) -> Result<(), NetError> {
        self.expect_state(HandshakeState::Idle)?;
        layers.insert(0, Layer::ProxyResponseDecoder);
        layers.insert(0, Layer::ProxyRequestEncoder);
        self.state = HandshakeState::CodecInstalled;
        Ok(())
    }

    /// Headers that go out with the request, `Host` first.
    pub fn request_headers(&self) -> Result<HeaderMap, NetError> {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, header_value(&self.target)?);
        for (name, value) in &self.extra_headers {
            if name != HOST {
                headers.append(name.clone(), value.clone());
            }
        }
        if let Some(auth) = &self.authorization {
            // Replaces anything a caller put there.
            let mut value = header_value(auth)?;
            value.set_sensitive(true);
            headers.insert(PROXY_AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Serialize the CONNECT request.
    pub fn build_request(&mut self) -> Result<Bytes, NetError> {
        self.expect_state(HandshakeState::CodecInstalled)?;
        let headers = self.request_headers()?;

        let mut out = BytesMut::with_capacity(256);
        out.put_slice(b"CONNECT ");
        out.put_slice(self.target.as_bytes());
        out.put_slice(b" HTTP/1.1\r\n");
        for (name, value) in &headers {
            out.put_slice(canonical_name(name).as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"\r\n");

        self.state = HandshakeState::RequestSent;
        tracing::debug!(target: "pushnet::tunnel", target_addr = %self.target, "sending CONNECT");
        Ok(out.freeze())
    }

    /// Feed response bytes; returns the state after consuming them.
    pub fn on_data(&mut self, data: &[u8]) -> HandshakeState {
        match self.state {
            HandshakeState::RequestSent => self.state = HandshakeState::AwaitingResponse,
            HandshakeState::AwaitingResponse => {}
            HandshakeState::Success => {
                // Already tunneling; anything else belongs to the application.
                let mut rest = BytesMut::from(&self.leftover[..]);
                rest.put_slice(data);
                self.leftover = rest.freeze();
                return self.state;
            }
            _ => return self.state,
        }

        self.buffer.put_slice(data);
        self.advance();
        self.state
    }

    /// The proxy closed the connection.
    pub fn on_eof(&mut self) -> HandshakeState {
        if !self.state.is_complete() {
            if self.status.is_none() {
                tracing::debug!(target: "pushnet::tunnel", target_addr = %self.target, "proxy closed without response");
            }
            self.state = HandshakeState::Failed;
        }
        self.state
    }

    /// Take the proxy framing out of `layers` and report the outcome.
    ///
    /// On success returns bytes that followed the response head; they belong
    /// to the tunneled protocol.
    pub fn finish(self, layers: &mut LayerStack) -> Result<Bytes, NetError> {
        layers.remove(Layer::ProxyRequestEncoder);
        layers.remove(Layer::ProxyResponseDecoder);

        match self.state {
            HandshakeState::Success => {
                tracing::debug!(target: "pushnet::tunnel", target_addr = %self.target, "tunnel established");
                Ok(self.leftover)
            }
            _ if self.oversized => Err(NetError::ResponseHeadersTooBig),
            _ => {
                let status = self.status.map(|s| s.as_u16());
                tracing::warn!(
                    target: "pushnet::tunnel",
                    target_addr = %self.target,
                    status = ?status,
                    "proxy refused tunnel"
                );
                Err(NetError::TunnelFailed { status, headers: self.headers })
            }
        }
    }

    /// Give up on the exchange (IO failure) and take the framing back out.
    pub fn abort(self, layers: &mut LayerStack) {
        layers.remove(Layer::ProxyRequestEncoder);
        layers.remove(Layer::ProxyResponseDecoder);
        tracing::debug!(target: "pushnet::tunnel", target_addr = %self.target, state = ?self.state, "CONNECT exchange aborted");
    }

    fn expect_state(&self, expected: HandshakeState) -> Result<(), NetError> {
        if self.state == expected {
            Ok(())
        } else {
            tracing::error!(
                target: "pushnet::tunnel",
                expected = ?expected,
                actual = ?self.state,
                "handshake driven out of order"
            );
            Err(NetError::TunnelConnectionFailed)
        }
    }

    fn reject_oversized(&mut self) {
        tracing::warn!(target: "pushnet::tunnel", target_addr = %self.target, "proxy response head too large");
        self.oversized = true;
        self.state = HandshakeState::Failed;
    }

    fn advance(&mut self) {
        loop {
            if self.body_remaining > 0 {
                let n = self.body_remaining.min(self.buffer.len());
                let _ = self.buffer.split_to(n);
                self.body_remaining -= n;
                if self.body_remaining > 0 {
                    return;
                }
                self.state = HandshakeState::Failed;
                return;
            }

            let Some(end) = find(&self.buffer, HEAD_TERMINATOR) else {
                if self.buffer.len() > MAX_HEADER_BYTES {
                    self.reject_oversized();
                }
                return;
            };
            if end + HEAD_TERMINATOR.len() > MAX_HEADER_BYTES {
                self.reject_oversized();
                return;
            }

            let head = self.buffer.split_to(end + HEAD_TERMINATOR.len());
            let (status, headers) = parse_head(&head);
            if status.is_some() {
                // Last status line wins.
                self.status = status;
                self.headers = headers;
            }

            match self.status {
                Some(s) if s.is_informational() => continue,
                Some(StatusCode::OK) => {
                    self.leftover = self.buffer.split().freeze();
                    self.state = HandshakeState::Success;
                    return;
                }
                Some(_) => {
                    let declared = self
                        .headers
                        .get(CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if declared == 0 || declared > MAX_ERROR_BODY_BYTES {
                        self.state = HandshakeState::Failed;
                        return;
                    }
                    self.body_remaining = declared;
                }
                None => {
                    self.state = HandshakeState::Failed;
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for ProxyTunnelHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyTunnelHandshake")
            .field("target", &self.target)
            .field("state", &self.state)
            .field("status", &self.status)
            .field("authenticated", &self.authorization.is_some())
            .finish()
    }
}

fn header_value(value: &str) -> Result<HeaderValue, NetError> {
    HeaderValue::from_str(value).map_err(|_| NetError::TunnelConnectionFailed)
}

/// `proxy-authorization` → `Proxy-Authorization`.
fn canonical_name(name: &HeaderName) -> String {
    name.as_str()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parse a response head. Unparseable status lines yield `None`; malformed
/// header lines are skipped.
fn parse_head(head: &[u8]) -> (Option<StatusCode>, HeaderMap) {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");

    let status = lines.next().and_then(|line| {
        let mut parts = line.splitn(3, ' ');
        let version = parts.next()?;
        if !version.starts_with("HTTP/1.") {
            return None;
        }
        StatusCode::from_bytes(parts.next()?.as_bytes()).ok()
    });

    let mut headers = HeaderMap::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_bytes(name.trim().as_bytes()), HeaderValue::from_str(value.trim()))
        {
            headers.append(name, value);
        }
    }

    (status, headers)
}
