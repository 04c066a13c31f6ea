//! # oocrpc - Length-Prefixed RPC over TCP
//!
//! A small request/response RPC runtime:
//! - Explicitly registered services whose methods take one argument and fill one reply
//! - A single length-prefixed binary frame per message, MessagePack payloads
//! - Per-connection dispatch with out-of-order responses and fault isolation
//! - A client with a bounded pool of idle connections
//!
//! ## Architecture
//!
//! ```text
//!   Client::call ──► ConnectionPool ──► [len|op|method|payload] ──┐
//!                                                                 │ TCP
//!   ┌─────────────────────── Server ──────────────────────────────▼─┐
//!   │  accept loop ─► per-connection reader (sequential frames)     │
//!   │                     │                                         │
//!   │                     ├─► Registry::lookup("Service.Method")    │
//!   │                     └─► spawn ─► invoke_isolated ─► writer    │
//!   │                          (panic / timeout → BackendError)     │
//!   └───────────────────────────────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod client;
pub mod demo;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod types;

// Internal utilities
pub mod observability;

pub use client::Client;
pub use registry::{MethodSet, RpcService};
pub use server::Server;
pub use types::{backend_kind, BackendError, ClientConfig, Config, Error, Result, ServerConfig};
