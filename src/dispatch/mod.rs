//! Dispatch module - The single ordered conduit from connections to the
//! event processor
//!
//! Every connection's reader task holds a `DispatchSender`; exactly one
//! `DispatchReceiver` exists. Funnelling all units through one consumer is
//! what keeps tracker and pool state free of locks: only one item is ever
//! being acted on at a time.
//!
//! The channel is bounded. A slow processor makes readers wait on `send`
//! instead of buffering without limit.

mod processor;

pub use processor::*;

use tokio::sync::mpsc;

use crate::network::ConnectionHandle;
use crate::protocol::Signed;

/// Default dispatch channel capacity
pub const DEFAULT_DISPATCH_CAPACITY: usize = 1024;

/// One signed unit and the connection it arrived on
#[derive(Debug, Clone)]
pub struct DispatchItem {
    pub unit: Signed,
    pub conn: ConnectionHandle,
}

impl DispatchItem {
    pub fn new(unit: Signed, conn: ConnectionHandle) -> Self {
        Self { unit, conn }
    }
}

/// Events carried by the dispatch channel
#[derive(Debug)]
pub enum Dispatch {
    /// A unit decoded from a connection's frame
    Unit(DispatchItem),
    /// The connection's reader finished; nothing else will follow from it
    Disconnected(ConnectionHandle),
}

/// Producer side, one clone per connection
#[derive(Debug, Clone)]
pub struct DispatchSender {
    tx: mpsc::Sender<Dispatch>,
}

/// Consumer side, owned by the event processor
#[derive(Debug)]
pub struct DispatchReceiver {
    rx: mpsc::Receiver<Dispatch>,
}

/// The processor has gone away
#[derive(Debug, thiserror::Error)]
#[error("Dispatch channel closed")]
pub struct DispatchClosed;

/// Create a bounded dispatch channel
pub fn channel(capacity: usize) -> (DispatchSender, DispatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DispatchSender { tx }, DispatchReceiver { rx })
}

impl DispatchSender {
    /// Enqueue a unit, waiting while the channel is full
    pub async fn send(&self, item: DispatchItem) -> Result<(), DispatchClosed> {
        self.tx
            .send(Dispatch::Unit(item))
            .await
            .map_err(|_| DispatchClosed)
    }

    /// Report that a connection's reader has ended
    pub async fn disconnected(&self, conn: ConnectionHandle) -> Result<(), DispatchClosed> {
        self.tx
            .send(Dispatch::Disconnected(conn))
            .await
            .map_err(|_| DispatchClosed)
    }
}

impl DispatchReceiver {
    /// Next event in delivery order; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Dispatch> {
        self.rx.recv().await
    }
}
