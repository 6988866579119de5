use http::HeaderMap;
use std::io;
use thiserror::Error;

/// Network, pool and tunnel errors.
///
/// Plain variants carry Chromium-compatible codes (see [`NetError::as_i32`]);
/// structured variants keep the context needed to diagnose a failure.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("Tunnel connection failed")]
    TunnelConnectionFailed,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Response headers too big")]
    ResponseHeadersTooBig,
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,

    // Structured errors
    #[error("Connection to {host}:{port} failed: {message}")]
    ConnectionFailedTo { host: String, port: u16, kind: io::ErrorKind, message: String },
    #[error("Could not resolve {domain}: {message}")]
    NameNotResolvedFor { domain: String, message: String },
    #[error("Proxy tunnel failed: {}", describe_status(*.status))]
    TunnelFailed { status: Option<u16>, headers: HeaderMap },
    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedProxy(String),
    #[error("Connection pool disposed")]
    PoolDisposed,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

fn describe_status(status: Option<u16>) -> String {
    match status {
        Some(code) => format!("proxy answered {}", code),
        None => "missing response".to_string(),
    }
}

impl NetError {
    /// Build a connection error that remembers the endpoint.
    pub fn connection_failed_to(host: &str, port: u16, err: io::Error) -> Self {
        NetError::ConnectionFailedTo {
            host: host.to_string(),
            port,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Build a resolution error that remembers the domain.
    pub fn dns_failed(domain: &str, err: io::Error) -> Self {
        NetError::NameNotResolvedFor { domain: domain.to_string(), message: err.to_string() }
    }

    /// Headers returned by the proxy when a tunnel was rejected.
    pub fn proxy_headers(&self) -> Option<&HeaderMap> {
        match self {
            NetError::TunnelFailed { headers, .. } => Some(headers),
            _ => None,
        }
    }

    /// True when the proxy refused the tunnel with 407.
    pub fn is_proxy_auth_failure(&self) -> bool {
        matches!(self, NetError::TunnelFailed { status: Some(407), .. })
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::NameNotResolved => -105,
            NetError::SslProtocolError => -107,
            NetError::TunnelConnectionFailed => -111,
            NetError::ConnectionTimedOut => -118,
            NetError::ResponseHeadersTooBig => -325,
            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme => -302,

            // Structured variants collapse onto their Chromium counterpart
            NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::TunnelFailed { status: Some(407), .. } => -127,
            NetError::TunnelFailed { .. } => -111,
            NetError::UnsupportedProxy(_) => -336,

            // Custom errors (outside Chromium's ranges)
            NetError::PoolDisposed => -10002,

            NetError::Unknown(code) => *code,
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -107 => NetError::SslProtocolError,
            -111 => NetError::TunnelConnectionFailed,
            -118 => NetError::ConnectionTimedOut,
            -127 => NetError::TunnelFailed { status: Some(407), headers: HeaderMap::new() },
            -300 => NetError::InvalidUrl,
            -302 => NetError::UnknownUrlScheme,
            -325 => NetError::ResponseHeadersTooBig,

            -10002 => NetError::PoolDisposed,
            _ => NetError::Unknown(code),
        }
    }
}
