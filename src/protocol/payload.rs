//! MessagePack payload codec using `rmp-serde`.
//!
//! Structs are always written as maps (`to_vec_named`) so field names
//! survive on the wire and non-Rust peers can decode them.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{Error, Result};

/// Encode a value to MessagePack bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| Error::codec(e.to_string()))
}

/// Encode a value, appending to an existing buffer.
pub fn encode_into<T: Serialize + ?Sized>(buf: &mut Vec<u8>, value: &T) -> Result<()> {
    rmp_serde::encode::write_named(buf, value).map_err(|e| Error::codec(e.to_string()))
}

/// Decode MessagePack bytes into a value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::codec(e.to_string()))
}
