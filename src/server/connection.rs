//! Per-connection dispatch loop: read frame → resolve → invoke → write.
//!
//! Reads are strictly sequential. Each resolved call is invoked in its own
//! task, so responses can leave in a different order than the requests
//! arrived. All writes go through one lock so frames never interleave.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;

use crate::protocol::frame::{read_frame, write_frame, Frame, FrameError, Operation};
use crate::protocol::payload;
use crate::registry::Registry;
use crate::server::buffers::BufferPool;
use crate::server::recovery::invoke_isolated;
use crate::types::{backend_kind, BackendError, ServerConfig};

type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// State shared by every connection of one server.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionContext {
    pub registry: Arc<Registry>,
    pub buffers: Arc<BufferPool>,
    pub config: ServerConfig,
    pub cancel: CancellationToken,
}

/// Write side of one connection plus what response tasks need.
#[derive(Debug, Clone)]
struct Responder {
    writer: SharedWriter,
    buffers: Arc<BufferPool>,
    write_timeout: Duration,
    cancel: CancellationToken,
}

impl Responder {
    async fn send(&self, operation: Operation, body: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let result = tokio::time::timeout(
            self.write_timeout,
            write_frame(&mut *writer, operation, None, body),
        )
        .await
        .map_err(|_| {
            tracing::warn!("Write timeout ({:?}), dropping connection", self.write_timeout);
            io::Error::new(io::ErrorKind::TimedOut, "write timeout")
        })
        .and_then(|r| r);

        if let Err(e) = &result {
            tracing::warn!("rpc: writing response: {}", e);
            // Stop reading; nothing more can be answered on this socket
            self.cancel.cancel();
        }
        result
    }

    async fn reply(&self, body: Vec<u8>) -> io::Result<()> {
        let result = self.send(Operation::Reply, &body).await;
        self.buffers.release(body);
        result
    }

    async fn error(&self, err: &BackendError) -> io::Result<()> {
        let mut body = self.buffers.acquire();
        if let Err(e) = payload::encode_into(&mut body, err) {
            tracing::error!("cannot encode error response: {}", e);
            self.buffers.release(body);
            return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
        }
        let result = self.send(Operation::Error, &body).await;
        self.buffers.release(body);
        result
    }
}

/// Handle a single TCP connection until the peer closes it, a transport
/// error occurs, or the server shuts down.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    ctx: ConnectionContext,
    _permit: OwnedSemaphorePermit, // held for connection lifetime
) -> Result<(), FrameError> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let responder = Responder {
        writer: Arc::new(Mutex::new(BufWriter::new(writer))),
        buffers: Arc::clone(&ctx.buffers),
        write_timeout: ctx.config.write_timeout,
        cancel: ctx.cancel.child_token(),
    };

    loop {
        let frame = tokio::select! {
            _ = responder.cancel.cancelled() => break,
            result = next_frame(&mut reader, &ctx.config) => match result {
                Ok(Some(frame)) => frame,
                Ok(None) => break, // clean EOF
                Err(e) if !e.is_fatal() => {
                    tracing::debug!("rpc: server cannot decode request: {}", e);
                    let kind = match e {
                        FrameError::UnknownOperation(_) => backend_kind::INVALID_OPERATION,
                        _ => backend_kind::PROTOCOL,
                    };
                    if responder.error(&BackendError::new(kind, e.to_string())).await.is_err() {
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            },
        };

        if dispatch(frame, &ctx.registry, &responder, ctx.config.invocation_timeout)
            .await
            .is_err()
        {
            break;
        }
    }

    Ok(())
}

async fn next_frame(
    reader: &mut BufReader<OwnedReadHalf>,
    config: &ServerConfig,
) -> Result<Option<Frame>, FrameError> {
    match config.idle_timeout {
        None => read_frame(reader, config.max_frame_bytes).await,
        Some(idle) => match tokio::time::timeout(idle, read_frame(reader, config.max_frame_bytes)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::debug!("Idle timeout ({:?}), dropping connection", idle);
                Ok(None)
            }
        },
    }
}

/// Resolve one request and start its invocation. Only fails when an
/// immediate error response could not be written.
async fn dispatch(
    frame: Frame,
    registry: &Registry,
    responder: &Responder,
    invocation_timeout: Duration,
) -> io::Result<()> {
    if frame.operation != Operation::Call {
        let err = BackendError::new(
            backend_kind::INVALID_OPERATION,
            format!("rpc: unexpected operation {:?}, expected Call", frame.operation),
        );
        return responder.error(&err).await;
    }

    let method = frame.method.unwrap_or_default();
    let descriptor = match registry.lookup(&method) {
        Ok(descriptor) => descriptor,
        Err(err) => {
            tracing::debug!(method = %method, "{}", err);
            return responder.error(&err).await;
        }
    };

    let responder = responder.clone();
    let out = responder.buffers.acquire();
    tokio::spawn(async move {
        let result = invoke_isolated(descriptor, frame.payload, out, invocation_timeout).await;
        // Write failures are logged and cancel the connection inside send()
        let _ = match result {
            Ok(body) => responder.reply(body).await,
            Err(err) => responder.error(&err).await,
        };
    });
    Ok(())
}
