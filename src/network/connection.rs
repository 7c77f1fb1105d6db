//! Connection handling for the relay
//!
//! A `ConnectionHandle` is the shared identity of one client connection:
//! - Stable id and peer address for logging and tracker lookups
//! - The outgoing half of the stream
//! - Close signalling for the connection's reader task

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::CodecError;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection closed")]
    Closed,

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Boxed outgoing half of a client stream
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Unique identity of an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Inner {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    writer: Mutex<Option<BoxedWriter>>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

/// A cloneable handle to a client connection
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    pub fn new(writer: BoxedWriter, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                peer_addr,
                writer: Mutex::new(Some(writer)),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Check if the connection is still open
    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    /// Write one complete frame.
    ///
    /// The whole buffer is written and flushed or the call fails; a short
    /// write surfaces as `ConnectionError::Write`.
    pub async fn write_frame(&self, frame: &[u8]) -> ConnectionResult<()> {
        if !self.is_connected() {
            return Err(ConnectionError::Closed);
        }

        let mut writer = self.inner.writer.lock().await;
        let stream = writer.as_mut().ok_or(ConnectionError::Closed)?;

        stream.write_all(frame).await.map_err(ConnectionError::Write)?;
        stream.flush().await.map_err(ConnectionError::Write)?;

        Ok(())
    }

    /// Write one complete frame, giving up after `timeout`.
    ///
    /// A peer that stops reading must not hold the caller forever. After a
    /// timeout the frame may be partly written, so callers close the
    /// connection.
    pub async fn write_frame_timeout(
        &self,
        frame: &[u8],
        timeout: Duration,
    ) -> ConnectionResult<()> {
        match tokio::time::timeout(timeout, self.write_frame(frame)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(timeout)),
        }
    }

    /// Close the connection.
    ///
    /// Stops the reader task and drops the write half. Safe to call more
    /// than once.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.cancel.cancel();
        self.inner.writer.lock().await.take();

        tracing::debug!(conn = %self.id(), peer = ?self.peer_addr(), "Connection closed");
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_frame_delivers_bytes() {
        let (client, server) = tokio::io::duplex(1024);
        let (_read, write) = tokio::io::split(server);
        let handle = ConnectionHandle::new(Box::new(write), None);

        handle.write_frame(b"hello").await.unwrap();

        let mut client = client;
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (_client, server) = tokio::io::duplex(1024);
        let handle = ConnectionHandle::new(Box::new(server), None);

        handle.close().await;
        handle.close().await;

        assert!(!handle.is_connected());
        assert!(matches!(
            handle.write_frame(b"late").await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_write_error_is_reported() {
        let mock = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let handle = ConnectionHandle::new(Box::new(mock), None);

        assert!(matches!(
            handle.write_frame(b"data").await,
            Err(ConnectionError::Write(_))
        ));
    }

    #[tokio::test]
    async fn test_write_to_stalled_reader_times_out() {
        // Nobody reads the client side, so the pipe fills up
        let (_client, server) = tokio::io::duplex(16);
        let handle = ConnectionHandle::new(Box::new(server), None);

        let result = handle
            .write_frame_timeout(&[0u8; 1024], Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ConnectionError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let (_client, server) = tokio::io::duplex(64);
        let handle = ConnectionHandle::new(Box::new(server), None);

        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.closed().await });

        handle.close().await;
        task.await.unwrap();
    }

    #[test]
    fn test_handles_compare_by_id() {
        let (_a, b) = tokio::io::duplex(64);
        let (_c, d) = tokio::io::duplex(64);
        let first = ConnectionHandle::new(Box::new(b), None);
        let second = ConnectionHandle::new(Box::new(d), None);

        assert_eq!(first, first.clone());
        assert_ne!(first, second);
    }
}
