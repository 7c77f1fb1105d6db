//! Shuffle Relay - Coordination server core for coin shuffle pools
//!
//! Clients send delimited protobuf envelopes over TCP. Each connection's
//! reader decodes them into signed units and feeds a single dispatch
//! channel; one event processor registers newcomers into pools and relays
//! registered players' units to the rest of their pool.

pub mod config;
pub mod dispatch;
pub mod network;
pub mod pool;
pub mod protocol;

pub use config::Config;
pub use dispatch::{Dispatch, DispatchItem, EventProcessor};
pub use network::{ConnectionHandle, NetworkConfig, Server, Writer};
pub use pool::{PacketVerifier, PoolTracker, Router, Session, Tracker, Verifier};
