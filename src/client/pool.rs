//! Idle connection pool.
//!
//! The pool bounds how many idle connections are kept, not how many calls
//! run at once: when it is empty, `acquire` dials a fresh connection, and a
//! released connection that does not fit is closed.

use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::protocol::frame::{read_frame, write_frame, Frame, FrameError, Operation};

/// One live TCP connection with buffered read and write halves.
///
/// Dropping it closes the socket.
#[derive(Debug)]
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl Connection {
    pub async fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Write a `Call` frame.
    pub async fn send_call(&mut self, method: &str, payload: &[u8]) -> io::Result<()> {
        write_frame(&mut self.writer, Operation::Call, Some(method), payload).await
    }

    /// Read the next frame. `Ok(None)` means the server closed the connection.
    pub async fn recv(&mut self, max_frame_bytes: u32) -> Result<Option<Frame>, FrameError> {
        read_frame(&mut self.reader, max_frame_bytes).await
    }
}

/// Bounded stack of idle connections to one address.
#[derive(Debug)]
pub struct ConnectionPool {
    addr: String,
    capacity: usize,
    idle: Mutex<Vec<Connection>>,
}

impl ConnectionPool {
    pub fn new(addr: impl Into<String>, capacity: usize) -> Self {
        Self {
            addr: addr.into(),
            capacity,
            idle: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Connections currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Pop an idle connection (most recently released first) or dial a new one.
    pub async fn acquire(&self) -> io::Result<Connection> {
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        match idle {
            Some(conn) => Ok(conn),
            None => {
                tracing::debug!(addr = %self.addr, "dialing new connection");
                Connection::connect(&self.addr).await
            }
        }
    }

    /// Return a connection after a call whose framing completed cleanly.
    ///
    /// Returns `false` if the pool was full and the connection was closed.
    pub fn release(&self, conn: Connection) -> bool {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() >= self.capacity {
            tracing::trace!(peer = %conn.peer, "pool full, closing connection");
            return false;
        }
        idle.push(conn);
        true
    }

    /// Close every idle connection.
    pub fn clear(&self) {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn counting_listener() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });
        (addr, accepted)
    }

    #[tokio::test]
    async fn test_acquire_nonexistent_addr_fails() {
        // Reserve a port, then free it so nothing is listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let pool = ConnectionPool::new(addr, 2);
        assert!(pool.acquire().await.is_err());
    }

    #[tokio::test]
    async fn test_release_beyond_capacity_closes_excess() {
        let (addr, _) = counting_listener().await;
        let pool = ConnectionPool::new(addr, 3);

        let mut conns = Vec::new();
        for _ in 0..5 {
            conns.push(pool.acquire().await.unwrap());
        }
        let kept: Vec<bool> = conns.into_iter().map(|c| pool.release(c)).collect();

        assert_eq!(kept, vec![true, true, true, false, false]);
        assert_eq!(pool.idle_count(), 3);
    }

    #[tokio::test]
    async fn test_acquire_reuses_idle_connection() {
        let (addr, accepted) = counting_listener().await;
        let pool = ConnectionPool::new(addr, 2);

        let conn = pool.acquire().await.unwrap();
        assert!(pool.release(conn));
        let _again = pool.acquire().await.unwrap();

        assert_eq!(pool.idle_count(), 0);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1, "should dial exactly once");
    }

    #[tokio::test]
    async fn test_clear() {
        let (addr, _) = counting_listener().await;
        let pool = ConnectionPool::new(addr, 2);
        let conn = pool.acquire().await.unwrap();
        pool.release(conn);
        pool.clear();
        assert_eq!(pool.idle_count(), 0);
    }
}
