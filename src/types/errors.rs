//! Application error types.
//!
//! Two layers: [`BackendError`] is the structured record that crosses the
//! wire inside an `Error` frame, and [`Error`] is what the crate's own APIs
//! return, covering local transport failures that never leave the process.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Well-known `BackendError::kind` values.
pub mod backend_kind {
    /// Fault inside the server: recovered panic, reply encoding failure.
    pub const INTERNAL: &str = "InternalError";
    /// Method string could not be split into a usable `Service.Method`.
    pub const INVALID_METHOD: &str = "InvalidMethod";
    /// No service registered under the requested name.
    pub const SERVICE_NOT_FOUND: &str = "ServiceNotFound";
    /// Service exists but has no such method, or bare name is unknown.
    pub const METHOD_NOT_FOUND: &str = "MethodNotFound";
    /// Call payload could not be decoded into the method's argument type.
    pub const INVALID_ARGUMENT: &str = "InvalidArgument";
    /// Server received a frame whose operation is not `Call`.
    pub const INVALID_OPERATION: &str = "InvalidOperation";
    /// Server received a complete frame it could not parse.
    pub const PROTOCOL: &str = "ProtocolError";
    /// Invocation exceeded the server's execution timeout.
    pub const TIMEOUT: &str = "Timeout";
    /// Default kind for errors returned by service methods.
    pub const APPLICATION: &str = "ApplicationError";
    /// Client-side transport failure after a connection was acquired.
    pub const CLIENT: &str = "ClientError";
    /// Client could not decode a reply or error payload.
    pub const CLIENT_UNMARSHAL: &str = "ClientUnmarshalError";
    /// Client received a frame whose operation is neither `Reply` nor `Error`.
    pub const UNVALID_OPERATION: &str = "UnvalidOperationError";
}

/// Wire-transportable error record carried by `Error` frames.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct BackendError {
    pub kind: String,
    pub detail: String,
}

impl BackendError {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(backend_kind::INTERNAL, detail)
    }

    pub fn client(detail: impl Into<String>) -> Self {
        Self::new(backend_kind::CLIENT, detail)
    }

    pub fn client_unmarshal(detail: impl Into<String>) -> Self {
        Self::new(backend_kind::CLIENT_UNMARSHAL, detail)
    }

    /// Whether this error kind has the given name.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

impl From<&str> for BackendError {
    fn from(detail: &str) -> Self {
        Self::new(backend_kind::APPLICATION, detail)
    }
}

impl From<String> for BackendError {
    fn from(detail: String) -> Self {
        Self::new(backend_kind::APPLICATION, detail)
    }
}

/// Main error enum for the RPC runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Structured error produced remotely or by the client call path.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Service registration rejected.
    #[error("registration error: {0}")]
    Registration(String),

    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Payload encoding/decoding failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// Local deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Transport errors that never cross the wire (dial, bind, accept).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// The structured backend error, if this is one.
    pub fn as_backend(&self) -> Option<&BackendError> {
        match self {
            Error::Backend(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::new("MethodNotFound", "rpc: can not find method Arith.Nope");
        assert_eq!(
            err.to_string(),
            "MethodNotFound: rpc: can not find method Arith.Nope"
        );
    }

    #[test]
    fn test_string_conversion_is_application_kind() {
        let err: BackendError = "divide by zero".into();
        assert_eq!(err.kind, backend_kind::APPLICATION);
        assert_eq!(err.detail, "divide by zero");
    }

    #[test]
    fn test_backend_error_wire_shape() {
        let err = BackendError::internal("boom");
        let bytes = rmp_serde::to_vec_named(&err).unwrap();
        let value: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(value["kind"], "InternalError");
        assert_eq!(value["detail"], "boom");
    }

    #[test]
    fn test_as_backend() {
        let err = Error::from(BackendError::client("broken pipe"));
        assert!(err.as_backend().unwrap().is(backend_kind::CLIENT));
        assert!(Error::registration("x").as_backend().is_none());
    }
}
