use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::client::{Connection, Layer, LayerStack, SocketType};
use crate::socket::pool::{Connector, EndpointKey};
use crate::socket::proxy::{ProxySettings, ProxyType};
use crate::socket::tunnel::ProxyTunnelHandshake;
use boring::ssl::{SslConnector, SslMethod};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Manages the connection process: DNS -> TCP -> CONNECT tunnel -> TLS.
/// Roughly equivalent to net::ConnectJob.
pub struct ConnectJob;

impl ConnectJob {
    pub async fn connect(key: &EndpointKey) -> Result<Connection, NetError> {
        let mut layers = LayerStack::default();

        let (mut stream, leftover) = match &key.proxy {
            Some(proxy) => {
                let (phost, pport) = proxy.host_port().ok_or(NetError::InvalidUrl)?;
                match proxy.proxy_type() {
                    ProxyType::Http => {}
                    other => {
                        tracing::warn!(target: "pushnet::pool", proxy_type = ?other, "unsupported proxy type");
                        return Err(NetError::UnsupportedProxy(proxy.url.scheme().to_string()));
                    }
                }

                // TCP to the proxy, then tunnel to the real endpoint.
                let mut stream = Self::open_tcp(phost, pport).await?;
                let handshake = ProxyTunnelHandshake::for_proxy(proxy, &key.host, key.port);
                let leftover =
                    Self::establish_tunnel(&mut stream, handshake, &mut layers, proxy).await?;
                (stream, leftover)
            }
            None => (Self::open_tcp(&key.host, key.port).await?, Bytes::new()),
        };

        // TLS always happens *after* any tunnel is established
        if key.tls {
            if !leftover.is_empty() {
                // The target speaks first only after our ClientHello.
                tracing::warn!(target: "pushnet::tunnel", "unexpected bytes after CONNECT response");
                return Err(NetError::TunnelConnectionFailed);
            }
            let tls = Self::tls_handshake(&key.host, stream).await?;
            layers.insert(0, Layer::Tls);
            return Ok(Connection::new(SocketType::Ssl(tls), layers, Bytes::new()));
        }

        stream.set_nodelay(true).ok();
        Ok(Connection::new(SocketType::Tcp(stream), layers, leftover))
    }

    /// Run the CONNECT exchange on `stream`.
    ///
    /// Returns bytes the proxy sent past its response head.
    pub async fn establish_tunnel<S>(
        stream: &mut S,
        mut handshake: ProxyTunnelHandshake,
        layers: &mut LayerStack,
        proxy: &ProxySettings,
    ) -> Result<Bytes, NetError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (phost, pport) = proxy.host_port().ok_or(NetError::InvalidUrl)?;

        handshake.install(layers)?;
        if let Err(e) = Self::exchange(stream, &mut handshake, phost, pport).await {
            handshake.abort(layers);
            return Err(e);
        }
        handshake.finish(layers)
    }

    async fn exchange<S>(
        stream: &mut S,
        handshake: &mut ProxyTunnelHandshake,
        phost: &str,
        pport: u16,
    ) -> Result<(), NetError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = handshake.build_request()?;
        stream.write_all(&request).await.tunnel_context(phost, pport)?;
        stream.flush().await.tunnel_context(phost, pport)?;

        let mut buf = [0u8; 4096];
        while !handshake.state().is_complete() {
            let n = stream.read(&mut buf).await.tunnel_context(phost, pport)?;
            if n == 0 {
                handshake.on_eof();
            } else {
                handshake.on_data(&buf[..n]);
            }
        }
        Ok(())
    }

    async fn open_tcp(host: &str, port: u16) -> Result<TcpStream, NetError> {
        let addrs: Vec<_> =
            tokio::net::lookup_host((host, port)).await.dns_context(host)?.collect();
        if addrs.is_empty() {
            return Err(NetError::NameNotResolved);
        }

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => return Ok(s),
                Err(e) => {
                    tracing::debug!(target: "pushnet::pool", %addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err::<TcpStream, _>(e).connection_context(host, port),
            None => Err(NetError::ConnectionFailed),
        }
    }

    async fn tls_handshake(
        host: &str,
        stream: TcpStream,
    ) -> Result<tokio_boring::SslStream<TcpStream>, NetError> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;
        // Streaming sessions are plain HTTP/1.1 (or a WebSocket upgrade of it).
        builder.set_alpn_protos(b"\x08http/1.1").map_err(|_| NetError::SslProtocolError)?;

        let connector = builder.build();
        let config = connector.configure().map_err(|_| NetError::SslProtocolError)?;

        tokio_boring::connect(config, host, stream).await.map_err(|e| {
            tracing::debug!(target: "pushnet::pool", host = %host, error = ?e, "TLS handshake failed");
            NetError::SslProtocolError
        })
    }
}

/// Opens real sockets through [`ConnectJob`].
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the whole DNS + TCP + tunnel + TLS sequence.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl Connector for TcpConnector {
    type Connection = Connection;

    fn connect<'a>(&'a self, key: &'a EndpointKey) -> BoxFuture<'a, Result<Connection, NetError>> {
        Box::pin(async move {
            match self.connect_timeout {
                Some(limit) => tokio::time::timeout(limit, ConnectJob::connect(key))
                    .await
                    .map_err(|_| NetError::ConnectionTimedOut)?,
                None => ConnectJob::connect(key).await,
            }
        })
    }
}
