use bytes::{Buf, Bytes};
use std::fmt;
use std::io::ErrorKind;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Anything the pool can hold on to.
pub trait Poolable: Send + 'static {
    /// Cheap, non-blocking liveness check.
    fn is_connected(&self) -> bool;
}

#[derive(Debug)]
pub enum SocketType {
    Tcp(TcpStream),
    Ssl(tokio_boring::SslStream<TcpStream>),
}

impl SocketType {
    /// Check if the underlying TCP socket is still connected.
    fn check_tcp_connected(stream: &TcpStream) -> bool {
        if stream.peer_addr().is_err() {
            return false;
        }

        // Non-blocking peek catches FIN and RST without eating pending data.
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match stream.poll_peek(&mut cx, &mut buf) {
            Poll::Ready(Ok(0)) => false,
            Poll::Ready(Ok(_)) => true,
            Poll::Ready(Err(ref e)) if e.kind() == ErrorKind::WouldBlock => true,
            Poll::Ready(Err(_)) => false,
            Poll::Pending => true,
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            SocketType::Tcp(s) => Self::check_tcp_connected(s),
            SocketType::Ssl(s) => Self::check_tcp_connected(s.get_ref()),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, SocketType::Ssl(_))
    }
}

impl AsyncRead for SocketType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            SocketType::Ssl(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketType {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            SocketType::Ssl(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_flush(cx),
            SocketType::Ssl(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            SocketType::Ssl(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// One stage in a connection's protocol stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Outbound half of the CONNECT framing.
    ProxyRequestEncoder,
    /// Inbound half of the CONNECT framing.
    ProxyResponseDecoder,
    /// TLS session to the target.
    Tls,
    /// The streaming protocol itself.
    Application,
}

/// Ordered protocol stages, closest to the wire first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerStack {
    layers: Vec<Layer>,
}

impl Default for LayerStack {
    fn default() -> Self {
        Self { layers: vec![Layer::Application] }
    }
}

impl LayerStack {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn position(&self, layer: Layer) -> Option<usize> {
        self.layers.iter().position(|l| *l == layer)
    }

    pub fn contains(&self, layer: Layer) -> bool {
        self.position(layer).is_some()
    }

    /// Insert at `index` (clamped to the stack length).
    pub fn insert(&mut self, index: usize, layer: Layer) {
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
    }

    /// Remove the first occurrence of `layer`, returning where it was.
    pub fn remove(&mut self, layer: Layer) -> Option<usize> {
        let pos = self.position(layer)?;
        self.layers.remove(pos);
        Some(pos)
    }
}

/// An established transport connection.
///
/// Bytes that arrived together with the proxy's CONNECT response are kept
/// and handed out before anything read from the socket.
pub struct Connection {
    socket: SocketType,
    layers: LayerStack,
    prefix: Bytes,
    established_at: Instant,
}

impl Connection {
    pub fn new(socket: SocketType, layers: LayerStack, prefix: Bytes) -> Self {
        Self { socket, layers, prefix, established_at: Instant::now() }
    }

    pub fn socket(&self) -> &SocketType {
        &self.socket
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    /// Buffered bytes not yet read by the application.
    pub fn buffered(&self) -> usize {
        self.prefix.len()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("tls", &self.socket.is_tls())
            .field("layers", &self.layers.layers())
            .field("buffered", &self.prefix.len())
            .finish()
    }
}

impl Poolable for Connection {
    fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.socket).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.socket).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.socket).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.socket).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_layer_stack_insert_remove() {
        let mut stack = LayerStack::default();
        stack.insert(0, Layer::ProxyResponseDecoder);
        stack.insert(0, Layer::ProxyRequestEncoder);
        assert_eq!(
            stack.layers(),
            &[Layer::ProxyRequestEncoder, Layer::ProxyResponseDecoder, Layer::Application]
        );

        assert_eq!(stack.remove(Layer::ProxyRequestEncoder), Some(0));
        assert_eq!(stack.remove(Layer::ProxyResponseDecoder), Some(0));
        assert_eq!(stack.remove(Layer::ProxyResponseDecoder), None);
        assert_eq!(stack, LayerStack::default());
    }

    #[tokio::test]
    async fn test_prefix_replayed_before_socket_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            peer.write_all(b" world").await.unwrap();
        });

        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::new(
            SocketType::Tcp(tcp),
            LayerStack::default(),
            Bytes::from_static(b"hello"),
        );
        assert_eq!(conn.buffered(), 5);

        let mut out = Vec::new();
        conn.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_liveness_detects_closed_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let tcp = TcpStream::connect(addr).await.unwrap();
        let conn = Connection::new(SocketType::Tcp(tcp), LayerStack::default(), Bytes::new());
        let peer = accept.await.unwrap();
        assert!(conn.is_connected());

        drop(peer);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!conn.is_connected());
    }
}
