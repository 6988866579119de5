//! Connection Pool Tests
//!
//! Covers:
//! - one pool per `EndpointKey`, also under concurrent callers
//! - reuse of released connections over real sockets
//! - open failures and pool lifecycle events
//! - `dispose()` and the cleanup task

use pushnet::base::neterror::NetError;
use pushnet::dispatch::EventDispatcher;
use pushnet::executor::{ExecutorConfig, JoinableWorker};
use pushnet::socket::events::{ListenStart, PoolEvent, PoolListener};
use pushnet::socket::{
    ConnectionPoolManager, EndpointKey, PoolConfig, TcpConnector, TransportKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Accepts connections and echoes whatever they send.
async fn echo_server() -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (port, accepted)
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<PoolEvent>>,
}

impl PoolListener for EventLog {
    fn on_pool_event(&self, event: &PoolEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn pool_events() -> Arc<EventDispatcher<dyn PoolListener>> {
    let worker = JoinableWorker::new(ExecutorConfig::new("pool-events"));
    Arc::new(EventDispatcher::new("pool", Arc::new(worker)))
}

#[test]
fn test_concurrent_get_pool_single_instance() {
    let manager = Arc::new(ConnectionPoolManager::new(TcpConnector::new()));
    let key = EndpointKey::new("push.example.com", 443).with_tls(true);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            std::thread::spawn(move || manager.get_pool(&key).unwrap())
        })
        .collect();
    let pools: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(pools.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(manager.pool_count(), 1);

    let other = manager.get_pool(&EndpointKey::new("push.example.com", 80)).unwrap();
    assert!(!Arc::ptr_eq(&pools[0], &other));
    assert_eq!(manager.pool_count(), 2);
}

#[tokio::test]
async fn test_released_connection_is_reused() {
    let (port, accepted) = echo_server().await;
    let manager = ConnectionPoolManager::new(TcpConnector::new());
    let key = EndpointKey::new("127.0.0.1", port);

    let (pool, mut conn) = manager.acquire(&key).await.unwrap();
    assert!(!conn.is_reused());
    conn.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
    pool.release(conn);

    let (_, mut again) = manager.acquire(&key).await.unwrap();
    assert!(again.is_reused());
    again.write_all(b"pong").await.unwrap();
    again.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(manager.leased_count(), 1);
}

#[tokio::test]
async fn test_closed_peer_not_reused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        // Accept and hang up right away.
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });

    let manager = ConnectionPoolManager::new(TcpConnector::new());
    let key = EndpointKey::new("127.0.0.1", port);

    let (pool, conn) = manager.acquire(&key).await.unwrap();
    let first = conn.id();
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.release(conn);
    assert_eq!(pool.idle_count(), 0);

    let fresh = pool.acquire().await.unwrap();
    assert!(!fresh.is_reused());
    assert_ne!(fresh.id(), first);
}

#[tokio::test]
async fn test_connect_failure_reported() {
    // Grab a free port, then close it so connects are refused.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let events = pool_events();
    let log = Arc::new(EventLog::default());
    events.add_listener(log.clone(), ListenStart);

    let manager = ConnectionPoolManager::new(TcpConnector::new()).with_events(Arc::clone(&events));
    let key = EndpointKey::new("127.0.0.1", port);
    let err = manager.acquire(&key).await.unwrap_err();
    assert!(matches!(err, NetError::ConnectionFailedTo { port: p, .. } if p == port));

    events.join().unwrap();
    let seen = log.events.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], PoolEvent::PoolCreated { key: key.clone() });
    assert!(matches!(&seen[1], PoolEvent::ConnectFailed { error, .. } if *error == err));
    assert_eq!(manager.leased_count(), 0);
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let (port, _) = echo_server().await;
    let events = pool_events();
    let log = Arc::new(EventLog::default());
    events.add_listener(log.clone(), ListenStart);

    let manager = ConnectionPoolManager::new(TcpConnector::new()).with_events(Arc::clone(&events));
    let key = EndpointKey::new("127.0.0.1", port);

    let (pool, conn) = manager.acquire(&key).await.unwrap();
    let id = conn.id();
    pool.release(conn);
    let conn = pool.acquire().await.unwrap();
    pool.discard(conn);
    manager.dispose();

    events.join().unwrap();
    let seen = log.events.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            PoolEvent::PoolCreated { key: key.clone() },
            PoolEvent::ConnectionCreated { key: key.clone(), id },
            PoolEvent::Acquired { key: key.clone(), id, reused: false },
            PoolEvent::Released { key: key.clone(), id, idle: true },
            PoolEvent::Acquired { key: key.clone(), id, reused: true },
            PoolEvent::Discarded { key: key.clone(), id },
            PoolEvent::PoolClosed { key: key.clone(), closed: 0 },
        ]
    );
}

#[tokio::test]
async fn test_dispose_closes_idle_connections() {
    let (port, _) = echo_server().await;
    let manager = ConnectionPoolManager::new(TcpConnector::new());
    let a = EndpointKey::new("127.0.0.1", port);
    let b = EndpointKey::new("127.0.0.1", port).with_transport(TransportKind::WebSocket);

    let (pool_a, conn_a) = manager.acquire(&a).await.unwrap();
    let (pool_b, conn_b) = manager.acquire(&b).await.unwrap();
    pool_a.release(conn_a);
    assert_eq!(manager.idle_count(), 1);

    manager.dispose();
    assert!(manager.is_disposed());
    assert_eq!(manager.pool_count(), 0);
    assert_eq!(pool_a.idle_count(), 0);
    assert_eq!(manager.get_pool(&a).unwrap_err(), NetError::PoolDisposed);

    pool_b.release(conn_b);
    assert_eq!(pool_b.idle_count(), 0);
}

#[tokio::test]
async fn test_cleanup_task_evicts_idle() {
    let (port, _) = echo_server().await;
    let config = PoolConfig::default().with_idle_timeout(Duration::from_millis(30));
    let manager = Arc::new(ConnectionPoolManager::with_config(TcpConnector::new(), config));
    let key = EndpointKey::new("127.0.0.1", port);

    let (pool, conn) = manager.acquire(&key).await.unwrap();
    pool.release(conn);
    assert_eq!(manager.idle_count(), 1);

    let task = manager.start_cleanup_task(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.idle_count(), 0);

    manager.dispose();
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connect_timeout() {
    // Non-routable address: the SYN goes nowhere.
    let manager = ConnectionPoolManager::new(
        TcpConnector::new().with_connect_timeout(Duration::from_millis(100)),
    );
    let key = EndpointKey::new("10.255.255.1", 81);
    let started = std::time::Instant::now();
    let err = manager.acquire(&key).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(err, NetError::ConnectionTimedOut | NetError::ConnectionFailedTo { .. }));
}
