//! RPC client: synchronous call protocol over pooled connections.
//!
//! Each call holds one connection exclusively: write a `Call` frame, read
//! exactly one response frame, then hand the connection back. A connection
//! is only returned to the pool when the response frame was read whole;
//! after any transport failure its framing state is unknown and it is
//! closed instead.

mod pool;

pub use pool::{Connection, ConnectionPool};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::{timeout_at, Instant};

use crate::protocol::frame::{Frame, FrameError, Operation};
use crate::protocol::payload;
use crate::types::{backend_kind, BackendError, ClientConfig, Error, Result};

/// RPC client for one server address.
#[derive(Debug)]
pub struct Client {
    pool: ConnectionPool,
    config: ClientConfig,
}

impl Client {
    /// Client with default settings for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_config(ClientConfig::new(addr))
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            pool: ConnectionPool::new(config.server_addr.clone(), config.pool_capacity),
            config,
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Call `service_method` (`"Service.Method"` or a bare method name).
    ///
    /// Dial failures come back as [`Error::Io`] (or [`Error::Timeout`]);
    /// everything after a connection is held comes back as
    /// [`Error::Backend`].
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let deadline = Instant::now() + self.config.call_timeout;
        let body = payload::encode(args)
            .map_err(|e| BackendError::client(format!("rpc: cannot encode argument: {}", e)))?;

        let mut conn = match timeout_at(deadline, self.pool.acquire()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => {
                return Err(Error::timeout(format!(
                    "rpc: dialing {} timed out after {:?}",
                    self.pool.addr(),
                    self.config.call_timeout
                )))
            }
        };

        let exchange = async {
            conn.send_call(service_method, &body).await?;
            // A close before the response arrives is a truncated exchange
            let frame = conn
                .recv(self.config.max_frame_bytes)
                .await?
                .ok_or(FrameError::UnexpectedEof)?;
            Ok::<_, FrameError>(frame)
        };
        let outcome = timeout_at(deadline, exchange).await;

        let frame = match outcome {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) if !e.is_fatal() => {
                // Whole frame consumed; the connection is still in sync
                self.pool.release(conn);
                let err = match e {
                    FrameError::UnknownOperation(code) => unvalid_operation(code),
                    other => BackendError::client_unmarshal(other.to_string()),
                };
                return Err(err.into());
            }
            Ok(Err(e)) => {
                tracing::debug!(method = service_method, "rpc: call failed: {}", e);
                return Err(BackendError::client(e.to_string()).into());
            }
            Err(_) => {
                tracing::debug!(method = service_method, "rpc: call timed out");
                return Err(BackendError::client(format!(
                    "rpc: call {} timed out after {:?}",
                    service_method, self.config.call_timeout
                ))
                .into());
            }
        };

        self.pool.release(conn);
        parse_reply(frame)
    }

    /// Like [`call`](Self::call), writing the reply into `reply`.
    ///
    /// `reply` is left untouched when the call fails.
    pub async fn call_into<A, R>(&self, service_method: &str, args: &A, reply: &mut R) -> Result<()>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        *reply = self.call(service_method, args).await?;
        Ok(())
    }
}

fn unvalid_operation(code: u8) -> BackendError {
    BackendError::new(
        backend_kind::UNVALID_OPERATION,
        format!("unvalid operation {}, it may be 2 or 3", code),
    )
}

/// Second decode phase: the operation tag picks the payload's type.
fn parse_reply<R: DeserializeOwned>(frame: Frame) -> Result<R> {
    match frame.operation {
        Operation::Reply => payload::decode(&frame.payload)
            .map_err(|e| Error::from(BackendError::client_unmarshal(e.to_string()))),
        Operation::Error => {
            let err = payload::decode::<BackendError>(&frame.payload)
                .unwrap_or_else(|e| BackendError::client_unmarshal(e.to_string()));
            Err(err.into())
        }
        Operation::Call => Err(unvalid_operation(Operation::Call as u8).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(operation: Operation, body: Vec<u8>) -> Frame {
        Frame {
            operation,
            method: None,
            payload: Bytes::from(body),
        }
    }

    #[test]
    fn test_parse_reply_ok() {
        let reply: i64 = parse_reply(frame(Operation::Reply, payload::encode(&15i64).unwrap())).unwrap();
        assert_eq!(reply, 15);
    }

    #[test]
    fn test_parse_reply_error_verbatim() {
        let remote = BackendError::new("ApplicationError", "divide by zero");
        let err = parse_reply::<i64>(frame(Operation::Error, payload::encode(&remote).unwrap())).unwrap_err();
        assert_eq!(err.as_backend(), Some(&remote));
    }

    #[test]
    fn test_parse_reply_undecodable_error() {
        let err = parse_reply::<i64>(frame(Operation::Error, vec![0xC1])).unwrap_err();
        assert_eq!(err.as_backend().unwrap().kind, backend_kind::CLIENT_UNMARSHAL);
    }

    #[test]
    fn test_parse_reply_wrong_reply_type() {
        let err = parse_reply::<i64>(frame(Operation::Reply, payload::encode("text").unwrap())).unwrap_err();
        assert_eq!(err.as_backend().unwrap().kind, backend_kind::CLIENT_UNMARSHAL);
    }

    #[test]
    fn test_parse_reply_call_operation() {
        let err = parse_reply::<i64>(frame(Operation::Call, Vec::new())).unwrap_err();
        assert_eq!(err.as_backend().unwrap().kind, backend_kind::UNVALID_OPERATION);
    }

    #[tokio::test]
    async fn test_dial_failure_is_local_io_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = Client::new(addr);
        let err = client.call::<_, i64>("Arith.Add", &(1, 2)).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got {err:?}");
    }
}
