//! Event processor
//!
//! The single consumer of the dispatch channel. Each unit is either a
//! registration (its connection has no session yet) or a registered
//! player's message to verify and broadcast. Any failure closes only the
//! offending connection; the loop always moves on to the next item.

use thiserror::Error;

use super::{Dispatch, DispatchItem, DispatchReceiver};
use crate::network::{ConnectionError, ConnectionHandle, Writer};
use crate::pool::{
    Outbound, RegistrationError, Router, Session, Tracker, VerificationError, Verifier,
};
use crate::protocol::Signed;

/// Errors that end a connection while processing one of its units
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error("Reply failed: {0}")]
    Write(#[from] ConnectionError),
}

pub struct EventProcessor<T, V> {
    tracker: T,
    verifier: V,
    writer: Writer,
}

impl<T, V> EventProcessor<T, V>
where
    T: Tracker + Router,
    V: Verifier,
{
    pub fn new(tracker: T, verifier: V, writer: Writer) -> Self {
        Self {
            tracker,
            verifier,
            writer,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Consume events until every producer has gone away
    pub async fn run(mut self, mut rx: DispatchReceiver) -> Self {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }

        tracing::debug!("Dispatch channel drained, event processor stopping");
        self
    }

    /// Process a single event
    pub async fn handle(&mut self, event: Dispatch) {
        match event {
            Dispatch::Unit(item) => {
                if let Err(e) = self.process(&item).await {
                    tracing::error!(
                        conn = %item.conn.id(),
                        peer = ?item.conn.peer_addr(),
                        error = %e,
                        "Dropping connection"
                    );
                    item.conn.close().await;
                }
            }
            Dispatch::Disconnected(conn) => {
                self.tracker.remove(conn.id());
            }
        }
    }

    async fn process(&mut self, item: &DispatchItem) -> Result<(), ProcessError> {
        // No session yet: the connection must be registering
        let Some(session) = self.tracker.session_for(item.conn.id()) else {
            return self.register(item).await;
        };

        self.verifier.verify(&session, &item.unit)?;
        self.broadcast(&session, item).await;

        Ok(())
    }

    async fn register(&mut self, item: &DispatchItem) -> Result<(), ProcessError> {
        let registered = self.tracker.register(&item.conn, &item.unit)?;
        self.writer.send(&item.conn, &registered.reply).await?;

        let session = registered.session;
        if self.tracker.pool_size(&session) == self.tracker.target_pool_size() {
            let announcements = self.tracker.on_pool_ready(&session);
            self.deliver(announcements).await;
        }

        Ok(())
    }

    async fn broadcast(&mut self, session: &Session, item: &DispatchItem) {
        let peers = self.tracker.peers_for(session, &item.unit);
        let units = std::slice::from_ref(&item.unit);

        for peer in peers {
            send_or_close(self.writer, &peer, units).await;
        }
    }

    async fn deliver(&mut self, outbound: Vec<Outbound>) {
        for out in outbound {
            send_or_close(self.writer, &out.conn, &out.units).await;
        }
    }
}

/// A failed peer is closed without affecting the rest of the fan-out
async fn send_or_close(writer: Writer, conn: &ConnectionHandle, units: &[Signed]) {
    if let Err(e) = writer.send(conn, units).await {
        tracing::error!(
            conn = %conn.id(),
            peer = ?conn.peer_addr(),
            error = %e,
            "Send failed, dropping peer"
        );
        conn.close().await;
    }
}
