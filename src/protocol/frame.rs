//! Frame codec for the RPC wire protocol.
//!
//! Frame format:
//! ```text
//! ┌──────────┬─────────┬──────────────────────────────┬───────────────────┐
//! │ len (4B) │ op (1B) │ method (Call only)           │ payload (msgpack) │
//! │ u32 BE   │ 1/2/3   │ u16 BE length + UTF-8 bytes  │                   │
//! └──────────┴─────────┴──────────────────────────────┴───────────────────┘
//! ```
//! Length = the whole frame, INCLUDING the 4-byte prefix. It is recomputed on
//! every write and only used on read to bound the body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Smallest legal frame: prefix plus operation byte.
pub const MIN_FRAME_BYTES: u32 = 5;

/// Frame operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    /// Request from client; carries a method name.
    Call = 1,
    /// Successful reply.
    Reply = 2,
    /// Error reply carrying a `BackendError`.
    Error = 3,
}

impl TryFrom<u8> for Operation {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, u8> {
        match code {
            1 => Ok(Operation::Call),
            2 => Ok(Operation::Reply),
            3 => Ok(Operation::Error),
            other => Err(other),
        }
    }
}

/// One decoded frame. The payload stays encoded until the reader knows
/// which type to decode it into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub operation: Operation,
    pub method: Option<String>,
    pub payload: Bytes,
}

/// Failure reading a frame.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Peer closed mid-frame (partial prefix or short body).
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Declared length exceeds the configured maximum. The body was not
    /// consumed, so the stream position is unusable.
    #[error("frame too large: {len} bytes (max {max})")]
    TooLarge { len: u32, max: u32 },

    /// Frame fully consumed but its operation code is not 1, 2 or 3.
    #[error("unknown operation code {0}")]
    UnknownOperation(u8),

    /// Frame fully consumed but its content is invalid. The stream is
    /// still positioned at the next frame boundary.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Whether the connection must be abandoned. Only content errors leave
    /// the stream at a trustworthy frame boundary.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::Protocol(_) | FrameError::UnknownOperation(_))
    }
}

/// Total encoded size of a frame, prefix included.
pub fn encoded_len(operation: Operation, method: Option<&str>, payload_len: usize) -> usize {
    let method_len = match operation {
        Operation::Call => 2 + method.map_or(0, str::len),
        _ => 0,
    };
    LENGTH_PREFIX_BYTES + 1 + method_len + payload_len
}

/// Read one frame from the stream.
///
/// Returns `Ok(None)` on a clean EOF before any byte of the next frame.
/// `max_frame_bytes` caps the declared frame length.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> Result<Option<Frame>, FrameError> {
    // Read 4-byte length prefix, distinguishing clean close from truncation
    let mut len_buf = [0u8; LENGTH_PREFIX_BYTES];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_BYTES {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(FrameError::UnexpectedEof)
            };
        }
        filled += n;
    }

    let frame_len = u32::from_be_bytes(len_buf);
    if frame_len > max_frame_bytes {
        return Err(FrameError::TooLarge {
            len: frame_len,
            max: max_frame_bytes,
        });
    }

    let body_len = (frame_len as usize).saturating_sub(LENGTH_PREFIX_BYTES);
    let mut body = BytesMut::zeroed(body_len);
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::UnexpectedEof
        } else {
            FrameError::Io(e)
        }
    })?;

    if frame_len < MIN_FRAME_BYTES {
        return Err(FrameError::Protocol(format!(
            "frame too short: {} bytes",
            frame_len
        )));
    }

    decode_body(body.freeze()).map(Some)
}

fn decode_body(mut body: Bytes) -> Result<Frame, FrameError> {
    let code = body.get_u8();
    let operation = Operation::try_from(code).map_err(FrameError::UnknownOperation)?;

    let method = if operation == Operation::Call {
        if body.remaining() < 2 {
            return Err(FrameError::Protocol("missing method length".to_string()));
        }
        let method_len = body.get_u16() as usize;
        if body.remaining() < method_len {
            return Err(FrameError::Protocol(format!(
                "method length {} exceeds frame",
                method_len
            )));
        }
        let raw = body.split_to(method_len);
        let method = std::str::from_utf8(&raw)
            .map_err(|e| FrameError::Protocol(format!("method is not UTF-8: {}", e)))?;
        Some(method.to_string())
    } else {
        None
    };

    Ok(Frame {
        operation,
        method,
        payload: body,
    })
}

/// Write one frame to the stream and flush it.
///
/// `method` is only written for `Call` frames.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    operation: Operation,
    method: Option<&str>,
    payload: &[u8],
) -> io::Result<()> {
    let total = encoded_len(operation, method, payload.len());
    let frame_len = u32::try_from(total).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds u32 length prefix", total),
        )
    })?;

    let mut header = BytesMut::with_capacity(total - payload.len());
    header.put_u32(frame_len);
    header.put_u8(operation as u8);
    if operation == Operation::Call {
        let name = method.unwrap_or("");
        let name_len = u16::try_from(name.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("method name of {} bytes is too long", name.len()),
            )
        })?;
        header.put_u16(name_len);
        header.put_slice(name.as_bytes());
    }

    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
