//! Outbound envelope writer
//!
//! Encodes units into a single delimited frame and hands it to the
//! connection in one write. Callers serialize sends per connection; the
//! event processor is the only caller in the relay.

use std::time::Duration;

use super::connection::{ConnectionHandle, ConnectionResult};
use super::DEFAULT_WRITE_TIMEOUT_MS;
use crate::protocol::{encode_envelope, append_delimiter, Signed};

#[derive(Debug, Clone, Copy)]
pub struct Writer {
    /// Log every outbound envelope
    debug: bool,
    /// Longest a single envelope write may take
    write_timeout: Duration,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Writer {
    pub fn new(debug: bool) -> Self {
        Self {
            debug,
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Send units to a connection as one envelope
    pub async fn send(&self, conn: &ConnectionHandle, units: &[Signed]) -> ConnectionResult<()> {
        if self.debug {
            tracing::info!(target: "shuffle_relay::wire", conn = %conn.id(), ?units, "Sent");
        }

        let frame = append_delimiter(encode_envelope(units)?);
        conn.write_frame_timeout(&frame, self.write_timeout).await
    }
}
