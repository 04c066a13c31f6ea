//! Core types for the RPC runtime.
//!
//! - **Errors**: the crate `Error` and the wire-level `BackendError`
//! - **Config**: server, client, and observability settings

mod config;
mod errors;

pub use config::{
    ClientConfig, Config, ObservabilityConfig, ServerConfig, DEFAULT_CALL_TIMEOUT,
    DEFAULT_MAX_FRAME_BYTES, DEFAULT_POOL_CAPACITY,
};
pub use errors::{backend_kind, BackendError, Error, Result};
