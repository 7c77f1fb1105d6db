//! Protocol module - Defines the wire protocol spoken by shuffle clients
//!
//! Every message on the stream is a protobuf-encoded `Packets` envelope
//! followed by a fixed 3-byte delimiter. There is no length prefix:
//! - Variable length envelope body (at most `MAX_MESSAGE_SIZE` bytes)
//! - 3 byte delimiter `0xE2 0x8F 0x8E` (UTF-8 for "⏎")

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// End-of-message marker appended after every serialized envelope
pub const DELIMITER: [u8; 3] = [0xE2, 0x8F, 0x8E];

/// Maximum envelope size in bytes, excluding the delimiter
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default port shuffle clients connect to
pub const DEFAULT_PORT: u16 = 1337;

/// Default number of players needed before a pool starts a round
pub const DEFAULT_POOL_SIZE: usize = 5;
