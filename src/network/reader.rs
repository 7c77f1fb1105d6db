//! Per-connection frame reader
//!
//! Reassembles delimited frames from a client's byte stream, decodes each
//! one and enqueues its units on the dispatch channel in arrival order.
//! The task ends, closing the connection, on:
//! - end of stream or a read error (a partial frame is dropped)
//! - a frame growing past the size limit
//! - an empty frame
//! - an envelope that fails to decode
//! - the connection being closed elsewhere

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use super::connection::{ConnectionError, ConnectionHandle, ConnectionResult};
use crate::dispatch::{DispatchItem, DispatchSender};
use crate::protocol::{decode_envelope, FrameScanner};

/// Why a reader stopped
#[derive(Debug)]
pub enum ReadOutcome {
    /// Peer closed the stream
    EndOfStream,
    /// Received a frame with no body
    EmptyFrame,
    /// Connection was closed from the relay side
    Closed,
    /// The event processor is gone
    DispatchClosed,
    /// Stream, size or decode failure
    Failed(ConnectionError),
}

pub struct FrameReader<R> {
    reader: BufReader<R>,
    scanner: FrameScanner,
    conn: ConnectionHandle,
    dispatch: DispatchSender,
    debug: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, conn: ConnectionHandle, dispatch: DispatchSender) -> Self {
        Self {
            reader: BufReader::new(reader),
            scanner: FrameScanner::new(),
            conn,
            dispatch,
            debug: false,
        }
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.scanner = FrameScanner::with_max_message_size(max_message_size);
        self
    }

    /// Log every decoded inbound envelope
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Read frames until the connection ends, then close it and tell the
    /// processor no more units will follow.
    pub async fn run(mut self) -> ReadOutcome {
        let conn = self.conn.clone();
        let outcome = tokio::select! {
            outcome = self.read_loop() => outcome,
            _ = conn.closed() => ReadOutcome::Closed,
        };

        match &outcome {
            ReadOutcome::Failed(e) => {
                tracing::error!(
                    conn = %self.conn.id(),
                    peer = ?self.conn.peer_addr(),
                    error = %e,
                    "Reader failed"
                );
            }
            other => {
                tracing::debug!(
                    conn = %self.conn.id(),
                    peer = ?self.conn.peer_addr(),
                    ?other,
                    "Reader finished"
                );
            }
        }

        self.conn.close().await;
        if self.dispatch.disconnected(self.conn.clone()).await.is_err() {
            tracing::debug!(conn = %self.conn.id(), "Dispatch closed before disconnect notice");
        }

        outcome
    }

    async fn read_loop(&mut self) -> ReadOutcome {
        loop {
            let frame = match self.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return ReadOutcome::EndOfStream,
                Err(e) => return ReadOutcome::Failed(e),
            };

            // We should not receive empty messages
            if frame.is_empty() {
                return ReadOutcome::EmptyFrame;
            }

            let units = match decode_envelope(&frame) {
                Ok(units) => units,
                Err(e) => {
                    if self.debug {
                        tracing::info!(
                            target: "shuffle_relay::wire",
                            conn = %self.conn.id(),
                            ?frame,
                            error = %e,
                            "Undecodable envelope"
                        );
                    }
                    return ReadOutcome::Failed(e.into());
                }
            };

            if self.debug {
                tracing::info!(
                    target: "shuffle_relay::wire",
                    conn = %self.conn.id(),
                    ?units,
                    "Received"
                );
            }

            for unit in units {
                let item = DispatchItem::new(unit, self.conn.clone());
                if self.dispatch.send(item).await.is_err() {
                    return ReadOutcome::DispatchClosed;
                }
            }
        }
    }

    /// Next complete frame body, or `None` at end of stream. Bytes of an
    /// unfinished frame at end of stream are discarded.
    async fn next_frame(&mut self) -> ConnectionResult<Option<Bytes>> {
        loop {
            let byte = match self.reader.read_u8().await {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if !self.scanner.is_empty() {
                        tracing::debug!(
                            conn = %self.conn.id(),
                            pending = self.scanner.len(),
                            "Dropping partial frame"
                        );
                        self.scanner.clear();
                    }
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(frame) = self.scanner.push(byte)? {
                return Ok(Some(frame));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{channel, Dispatch, DispatchReceiver};
    use crate::protocol::{
        encode_envelope, encode_frame, CodecError, Packet, Signed, VerificationKey, DELIMITER,
        MAX_MESSAGE_SIZE,
    };
    use std::io::Cursor;

    fn unit(key: &str, number: u32) -> Signed {
        Signed::from(Packet {
            number,
            from_key: Some(VerificationKey::new(key)),
            message: format!("payload-{number}").into_bytes(),
            ..Default::default()
        })
    }

    fn handle() -> ConnectionHandle {
        let (_client, server) = tokio::io::duplex(64);
        ConnectionHandle::new(Box::new(server), None)
    }

    /// Drain everything the reader enqueued, up to its disconnect notice
    async fn drain(rx: &mut DispatchReceiver) -> Vec<Signed> {
        let mut units = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                Dispatch::Unit(item) => units.push(item.unit),
                Dispatch::Disconnected(_) => break,
            }
        }
        units
    }

    #[tokio::test]
    async fn test_byte_by_byte_frame_yields_units_in_order() {
        let units = vec![unit("a", 1), unit("b", 2)];
        let wire = encode_frame(&units).unwrap();

        let mut builder = tokio_test::io::Builder::new();
        for b in wire.iter() {
            builder.read(std::slice::from_ref(b));
        }

        let (tx, mut rx) = channel(8);
        let conn = handle();
        let outcome = FrameReader::new(builder.build(), conn.clone(), tx).run().await;

        assert!(matches!(outcome, ReadOutcome::EndOfStream));
        assert_eq!(drain(&mut rx).await, units);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_frames_are_enqueued_in_receipt_order() {
        let mut wire = encode_frame(&[unit("a", 1), unit("a", 2)]).unwrap().to_vec();
        wire.extend_from_slice(&encode_frame(&[unit("a", 3)]).unwrap());
        wire.extend_from_slice(&encode_frame(&[unit("a", 4), unit("a", 5)]).unwrap());

        let (tx, mut rx) = channel(2);
        let reader = FrameReader::new(Cursor::new(wire), handle(), tx);
        let task = tokio::spawn(reader.run());

        let numbers: Vec<u32> = drain(&mut rx)
            .await
            .into_iter()
            .map(|u| u.packet.unwrap().number)
            .collect();
        task.await.unwrap();

        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_truncated_envelope_is_rejected() {
        let body = encode_envelope(&[unit("a", 1), unit("b", 2)]).unwrap();
        let mut wire = body[..body.len() - 1].to_vec();
        wire.extend_from_slice(&DELIMITER);

        let (tx, mut rx) = channel(8);
        let conn = handle();
        let outcome = FrameReader::new(Cursor::new(wire), conn.clone(), tx).run().await;

        assert!(matches!(
            outcome,
            ReadOutcome::Failed(ConnectionError::Protocol(CodecError::Decode(_)))
        ));
        assert!(drain(&mut rx).await.is_empty());
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_partial_frame_at_end_of_stream_is_dropped() {
        let mut wire = encode_frame(&[unit("a", 1)]).unwrap().to_vec();
        let partial = encode_frame(&[unit("b", 2)]).unwrap();
        wire.extend_from_slice(&partial[..partial.len() - 1]);

        let (tx, mut rx) = channel(8);
        let outcome = FrameReader::new(Cursor::new(wire), handle(), tx).run().await;

        assert!(matches!(outcome, ReadOutcome::EndOfStream));
        assert_eq!(drain(&mut rx).await, vec![unit("a", 1)]);
    }

    #[tokio::test]
    async fn test_oversized_frame_terminates_connection() {
        // Body one byte over the limit, then a delimiter
        let mut wire = vec![b'x'; MAX_MESSAGE_SIZE + 1];
        wire.extend_from_slice(&DELIMITER);

        let (tx, mut rx) = channel(8);
        let conn = handle();
        let outcome = FrameReader::new(Cursor::new(wire), conn.clone(), tx).run().await;

        assert!(matches!(
            outcome,
            ReadOutcome::Failed(ConnectionError::Protocol(CodecError::FrameTooLarge(..)))
        ));
        assert!(drain(&mut rx).await.is_empty());
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_frame_at_size_limit_is_delivered() {
        let max = encode_envelope(&[unit("a", 1)]).unwrap().len();
        let wire = encode_frame(&[unit("a", 1)]).unwrap().to_vec();

        let (tx, mut rx) = channel(8);
        let outcome = FrameReader::new(Cursor::new(wire), handle(), tx)
            .with_max_message_size(max)
            .run()
            .await;

        assert!(matches!(outcome, ReadOutcome::EndOfStream));
        assert_eq!(drain(&mut rx).await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_frame_stops_reading() {
        let mut wire = DELIMITER.to_vec();
        wire.extend_from_slice(&encode_frame(&[unit("a", 1)]).unwrap());

        let (tx, mut rx) = channel(8);
        let outcome = FrameReader::new(Cursor::new(wire), handle(), tx).run().await;

        assert!(matches!(outcome, ReadOutcome::EmptyFrame));
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_read_error_terminates_connection() {
        let mock = tokio_test::io::Builder::new()
            .read(&encode_frame(&[unit("a", 1)]).unwrap())
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let (tx, mut rx) = channel(8);
        let outcome = FrameReader::new(mock, handle(), tx).run().await;

        assert!(matches!(outcome, ReadOutcome::Failed(ConnectionError::Io(_))));
        assert_eq!(drain(&mut rx).await, vec![unit("a", 1)]);
    }

    #[tokio::test]
    async fn test_close_stops_idle_reader() {
        let (_client, server) = tokio::io::duplex(64);
        let (read, write) = tokio::io::split(server);
        let conn = ConnectionHandle::new(Box::new(write), None);

        let (tx, mut rx) = channel(8);
        let task = tokio::spawn(FrameReader::new(read, conn.clone(), tx).run());

        conn.close().await;
        assert!(matches!(task.await.unwrap(), ReadOutcome::Closed));
        assert!(matches!(rx.recv().await, Some(Dispatch::Disconnected(_))));
    }
}
