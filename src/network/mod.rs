//! Network module - Handles TCP communication with shuffle clients
//!
//! Provides:
//! - Server for accepting incoming connections
//! - Per-connection frame readers feeding the dispatch channel
//! - Connection handles and the envelope writer

mod server;
mod connection;
mod reader;
mod writer;

pub use server::*;
pub use connection::*;
pub use reader::*;
pub use writer::*;

use std::time::Duration;

use crate::dispatch::DEFAULT_DISPATCH_CAPACITY;
use crate::protocol::{DEFAULT_PORT, MAX_MESSAGE_SIZE};

/// Default limit on a single outbound envelope write
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5000;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port to listen on
    pub port: u16,
    /// Interface to bind to
    pub bind_address: String,
    /// Maximum envelope size before the delimiter
    pub max_message_size: usize,
    /// Dispatch channel capacity
    pub dispatch_capacity: usize,
    /// Write timeout in milliseconds; a peer slower than this is dropped
    pub write_timeout_ms: u64,
    /// Log every inbound and outbound envelope
    pub debug: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            max_message_size: MAX_MESSAGE_SIZE,
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            debug: false,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The writer every outbound envelope goes through
    pub fn writer(&self) -> Writer {
        Writer::new(self.debug).with_write_timeout(Duration::from_millis(self.write_timeout_ms))
    }
}
