//! Wire protocol: length-prefixed frames carrying MessagePack payloads.

pub mod frame;
pub mod payload;

pub use frame::{read_frame, write_frame, Frame, FrameError, Operation};
