//! Context helpers for IO results.
//!
//! Socket code deals in `std::io::Error`; callers of the pool want to know
//! which endpoint (or which proxy) was being dialed when it went wrong.

use crate::base::neterror::NetError;
use std::io;

/// Extension trait converting IO results into endpoint-aware [`NetError`]s.
pub trait IoResultExt<T> {
    /// Attach the endpoint that was being connected to.
    ///
    /// ```ignore
    /// use pushnet::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .connection_context("push.example.com", 443)?;
    /// // Error: "Connection to push.example.com:443 failed: connection refused"
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    /// Attach the name that failed to resolve.
    fn dns_context(self, domain: &str) -> Result<T, NetError>;

    /// Map IO failures during the CONNECT exchange onto the tunnel error.
    fn tunnel_context(self, proxy_host: &str, proxy_port: u16) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| NetError::connection_failed_to(host, port, e))
    }

    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::dns_failed(domain, e))
    }

    fn tunnel_context(self, proxy_host: &str, proxy_port: u16) -> Result<T, NetError> {
        self.map_err(|e| {
            tracing::debug!(
                target: "pushnet::tunnel",
                proxy = %format!("{}:{}", proxy_host, proxy_port),
                error = %e,
                "IO error during CONNECT exchange"
            );
            NetError::TunnelConnectionFailed
        })
    }
}
