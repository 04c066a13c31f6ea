//! TCP RPC server: accept loop and service registration.

mod buffers;
mod connection;
mod recovery;

pub use buffers::BufferPool;
pub use recovery::invoke_isolated;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::registry::{Registry, RpcService};
use crate::types::{Result, ServerConfig};
use connection::{handle_connection, ConnectionContext};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// RPC server: a bound listener plus the services it exposes.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    buffers: Arc<BufferPool>,
    config: ServerConfig,
    cancel: CancellationToken,
}

impl Server {
    /// Bind the listener at `config.listen_addr`. Invalid limits are an
    /// [`Error::Config`](crate::Error::Config).
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen_addr).await?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            buffers: Arc::new(BufferPool::new(config.buffer_pool_size)),
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Bind with default settings at `host:port`.
    pub async fn bind_host_port(host: &str, port: u16) -> Result<Self> {
        Self::bind(ServerConfig::with_host_port(host, port)).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Register `receiver` under its type name.
    pub fn register<S: RpcService>(&self, receiver: S) -> Result<()> {
        self.registry.register(receiver)
    }

    /// Register `receiver` under an explicit name.
    pub fn register_name<S: RpcService>(&self, name: &str, receiver: S) -> Result<()> {
        self.registry.register_name(name, receiver)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called.
    ///
    /// Accept errors are logged and do not stop the listener.
    pub async fn serve(&self) -> Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        tracing::info!(
            "RPC server listening on {} (max_connections={}, services={:?})",
            self.local_addr()?,
            self.config.max_connections,
            self.registry.service_names(),
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("RPC server shutting down");
                    break;
                }
                accept = self.listener.accept() => {
                    let (stream, peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("rpc: accept failed: {}", e);
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                            continue;
                        }
                    };

                    let permit = match Arc::clone(&conn_semaphore).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "Connection from {} rejected: at max_connections ({})",
                                peer,
                                self.config.max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("set_nodelay failed for {}: {}", peer, e);
                    }
                    tracing::debug!("RPC connection from {} (active={})",
                        peer,
                        self.config.max_connections - conn_semaphore.available_permits(),
                    );

                    let ctx = ConnectionContext {
                        registry: Arc::clone(&self.registry),
                        buffers: Arc::clone(&self.buffers),
                        config: self.config.clone(),
                        cancel: self.cancel.clone(),
                    };
                    tokio::spawn(async move {
                        match handle_connection(stream, ctx, permit).await {
                            Ok(()) => tracing::debug!("Connection from {} closed", peer),
                            Err(e) => tracing::warn!("Connection from {} error: {}", peer, e),
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Request graceful shutdown: `serve` returns and open connections stop
    /// reading. In-flight invocations still answer.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{read_frame, write_frame, Operation};
    use crate::protocol::payload;
    use crate::registry::MethodSet;
    use crate::types::{backend_kind, BackendError};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    struct Sleepy;

    impl RpcService for Sleepy {
        fn methods(set: &mut MethodSet<Self>) {
            set.method("Nap", |_: &Sleepy, ms: u64, reply: &mut u64| {
                std::thread::sleep(Duration::from_millis(ms));
                *reply = ms;
                Ok(())
            })
            .method("Blob", |_: &Sleepy, len: usize, reply: &mut Vec<u8>| {
                *reply = vec![0; len];
                Ok(())
            });
        }
    }

    async fn start(config: ServerConfig) -> (Arc<Server>, SocketAddr) {
        let server = Arc::new(Server::bind(config).await.unwrap());
        server.register(Sleepy).unwrap();
        let addr = server.local_addr().unwrap();
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.serve().await });
        (server, addr)
    }

    fn test_config() -> ServerConfig {
        ServerConfig::with_host_port("127.0.0.1", 0)
    }

    async fn call(stream: &mut TcpStream, method: &str, arg: u64) {
        let body = payload::encode(&arg).unwrap();
        write_frame(stream, Operation::Call, Some(method), &body).await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_later_reads() {
        let (_server, addr) = start(test_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        call(&mut stream, "Sleepy.Nap", 300).await;
        call(&mut stream, "Sleepy.Nap", 1).await;

        // The fast call answers first
        let first = read_frame(&mut stream, 1024).await.unwrap().unwrap();
        assert_eq!(first.operation, Operation::Reply);
        assert_eq!(payload::decode::<u64>(&first.payload).unwrap(), 1);
        let second = read_frame(&mut stream, 1024).await.unwrap().unwrap();
        assert_eq!(payload::decode::<u64>(&second.payload).unwrap(), 300);
    }

    #[tokio::test]
    async fn test_non_call_operation_answered_with_error() {
        let (_server, addr) = start(test_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        write_frame(&mut stream, Operation::Reply, None, &payload::encode(&1u64).unwrap())
            .await
            .unwrap();
        let frame = read_frame(&mut stream, 1024).await.unwrap().unwrap();
        assert_eq!(frame.operation, Operation::Error);
        let err: BackendError = payload::decode(&frame.payload).unwrap();
        assert_eq!(err.kind, backend_kind::INVALID_OPERATION);

        // Connection still serves calls
        call(&mut stream, "Nap", 0).await;
        let frame = read_frame(&mut stream, 1024).await.unwrap().unwrap();
        assert_eq!(frame.operation, Operation::Reply);
    }

    #[tokio::test]
    async fn test_garbled_frame_answered_and_connection_survives() {
        let (_server, addr) = start(test_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        // Well-delimited frame with an unknown operation code
        stream.write_all(&[0, 0, 0, 6, 0x7F, 0x00]).await.unwrap();
        let frame = read_frame(&mut stream, 1024).await.unwrap().unwrap();
        let err: BackendError = payload::decode(&frame.payload).unwrap();
        assert_eq!(err.kind, backend_kind::INVALID_OPERATION);

        // Call frame whose method header overruns the frame
        stream.write_all(&[0, 0, 0, 8, 1, 0, 50, b'x']).await.unwrap();
        let frame = read_frame(&mut stream, 1024).await.unwrap().unwrap();
        let err: BackendError = payload::decode(&frame.payload).unwrap();
        assert_eq!(err.kind, backend_kind::PROTOCOL);

        call(&mut stream, "Sleepy.Nap", 0).await;
        let frame = read_frame(&mut stream, 1024).await.unwrap().unwrap();
        assert_eq!(frame.operation, Operation::Reply);
    }

    #[tokio::test]
    async fn test_invocation_timeout_answers_client() {
        let config = ServerConfig {
            invocation_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let (_server, addr) = start(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        call(&mut stream, "Sleepy.Nap", 1_000).await;
        let frame = read_frame(&mut stream, 1024).await.unwrap().unwrap();
        assert_eq!(frame.operation, Operation::Error);
        let err: BackendError = payload::decode(&frame.payload).unwrap();
        assert_eq!(err.kind, backend_kind::TIMEOUT);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let config = ServerConfig {
            max_frame_bytes: 64,
            ..test_config()
        };
        let (_server, addr) = start(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&[0, 0, 1, 0]).await.unwrap();
        assert!(read_frame(&mut stream, 1024).await.unwrap().is_none());
    }

    /// Open a fresh connection and make one call, retrying while the
    /// server is still turning connections away.
    async fn call_on_new_connection(addr: SocketAddr) -> Option<u64> {
        let body = payload::encode(&7u64).unwrap();
        for _ in 0..50 {
            if let Ok(mut stream) = TcpStream::connect(addr).await {
                // A turned-away connection may already be reset
                if write_frame(&mut stream, Operation::Call, Some("Sleepy.Nap"), &body).await.is_ok() {
                    let answer =
                        tokio::time::timeout(Duration::from_secs(1), read_frame(&mut stream, 1024)).await;
                    if let Ok(Ok(Some(frame))) = answer {
                        return payload::decode(&frame.payload).ok();
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        None
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_limits() {
        let config = ServerConfig {
            max_connections: 0,
            ..test_config()
        };
        assert!(matches!(
            Server::bind(config).await,
            Err(crate::types::Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_connections_over_cap_are_closed() {
        let config = ServerConfig {
            max_connections: 1,
            ..test_config()
        };
        let (_server, addr) = start(config).await;

        // First connection holds the only slot
        let mut held = TcpStream::connect(addr).await.unwrap();
        call(&mut held, "Nap", 0).await;
        assert!(read_frame(&mut held, 1024).await.unwrap().is_some());

        let mut rejected = TcpStream::connect(addr).await.unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut rejected, 1024))
            .await
            .unwrap();
        assert!(matches!(closed, Ok(None)));

        // Releasing the slot lets the next connection in
        drop(held);
        assert_eq!(call_on_new_connection(addr).await, Some(7));
    }

    #[tokio::test]
    async fn test_idle_connection_dropped_and_slot_reused() {
        let config = ServerConfig {
            max_connections: 1,
            idle_timeout: Some(Duration::from_millis(100)),
            ..test_config()
        };
        let (_server, addr) = start(config).await;

        let mut idle = TcpStream::connect(addr).await.unwrap();
        call(&mut idle, "Nap", 0).await;
        assert!(read_frame(&mut idle, 1024).await.unwrap().is_some());

        // Send nothing; the server hangs up after the idle timeout
        let closed = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut idle, 1024))
            .await
            .unwrap();
        assert!(matches!(closed, Ok(None)));

        assert_eq!(call_on_new_connection(addr).await, Some(7));
    }

    #[tokio::test]
    async fn test_write_timeout_drops_stalled_reader() {
        let config = ServerConfig {
            max_connections: 1,
            write_timeout: Duration::from_millis(200),
            ..test_config()
        };
        let (_server, addr) = start(config).await;

        // Ask for far more reply data than the socket buffers hold, never read it
        let mut stalled = TcpStream::connect(addr).await.unwrap();
        for _ in 0..4 {
            let body = payload::encode(&(8usize * 1024 * 1024)).unwrap();
            write_frame(&mut stalled, Operation::Call, Some("Sleepy.Blob"), &body)
                .await
                .unwrap();
        }

        // The blocked write times out, the connection is dropped and its
        // slot serves a new client while the stalled socket is still open
        assert_eq!(call_on_new_connection(addr).await, Some(7));
        drop(stalled);
    }

    #[tokio::test]
    async fn test_shutdown_stops_serving() {
        let (server, addr) = start(test_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        call(&mut stream, "Nap", 0).await;
        read_frame(&mut stream, 1024).await.unwrap().unwrap();
        server.shutdown();

        // Open connections stop reading and close
        let closed = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut stream, 1024))
            .await
            .unwrap();
        assert!(matches!(closed, Ok(None)));
    }
}
