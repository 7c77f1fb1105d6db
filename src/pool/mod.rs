//! Pool module - Collaborators the event processor calls out to
//!
//! The relay core only routes units. Deciding who belongs to which pool,
//! whether a unit is acceptable and who should receive it is delegated to:
//! - `Tracker`: sessions, pool membership and the pool-ready trigger
//! - `Router`: broadcast fan-out targets
//! - `Verifier`: per-unit acceptance checks for registered players
//!
//! Implementations are owned by the event processor and only ever called
//! from its task, so they need no internal locking.

mod tracker;
mod verifier;

pub use tracker::*;
pub use verifier::*;

use thiserror::Error;

use crate::network::{ConnectionHandle, ConnectionId};
use crate::protocol::Signed;

/// Identifier of a pool within a tracker
pub type PoolId = u64;

/// Registration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Registration packet missing")]
    MissingPacket,

    #[error("Registration has no verification key")]
    MissingKey,

    #[error("Registration parameters missing")]
    MissingRegistration,

    #[error("Verification key already registered: {0}")]
    DuplicateKey(String),
}

/// Verification errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Packet missing")]
    MissingPacket,

    #[error("Session id does not match")]
    SessionMismatch,

    #[error("Player number mismatch: expected {expected}, got {actual}")]
    NumberMismatch { expected: u32, actual: u32 },

    #[error("Sender key does not match registered key")]
    KeyMismatch,
}

/// Per-connection state created at registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Pool the connection belongs to
    pub pool: PoolId,
    /// Session id shared by the pool
    pub session_id: Vec<u8>,
    /// Player number within the pool
    pub number: u32,
    /// Key the player registered with
    pub verification_key: String,
}

/// Result of a successful registration
#[derive(Debug, Clone)]
pub struct Registered {
    pub session: Session,
    /// Units to send back to the registrant
    pub reply: Vec<Signed>,
}

/// Units to write to one connection
#[derive(Debug, Clone)]
pub struct Outbound {
    pub conn: ConnectionHandle,
    pub units: Vec<Signed>,
}

/// Session and pool membership tracking
pub trait Tracker: Send {
    /// Session of a registered connection
    fn session_for(&self, conn: ConnectionId) -> Option<Session>;

    /// Register a connection from its first unit
    fn register(
        &mut self,
        conn: &ConnectionHandle,
        unit: &Signed,
    ) -> Result<Registered, RegistrationError>;

    /// Current member count of the session's pool
    fn pool_size(&self, session: &Session) -> usize;

    /// Member count at which a pool starts its round
    fn target_pool_size(&self) -> usize;

    /// Start the session's pool; returns the start-of-round messages
    fn on_pool_ready(&mut self, session: &Session) -> Vec<Outbound>;

    /// Forget a connection that has gone away
    fn remove(&mut self, conn: ConnectionId);
}

/// Broadcast fan-out
pub trait Router: Send {
    /// Connections that should receive `unit` sent by the session's owner
    fn peers_for(&self, session: &Session, unit: &Signed) -> Vec<ConnectionHandle>;
}

/// Acceptance checks for units from registered players
pub trait Verifier: Send {
    fn verify(&self, session: &Session, unit: &Signed) -> Result<(), VerificationError>;
}
