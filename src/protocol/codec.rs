//! Protocol codec for encoding/decoding envelopes
//!
//! Handles protobuf serialization of envelopes and delimiter framing.

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use super::{Packets, Signed, DELIMITER, MAX_MESSAGE_SIZE};

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed envelope: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Envelope encoding failed: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("Message too large: more than {1} bytes before delimiter (buffered {0})")]
    FrameTooLarge(usize, usize),
}

/// Decode a frame body into its signed units.
///
/// All-or-nothing: a malformed body yields an error and no units. An empty
/// body decodes to an empty list.
pub fn decode_envelope(bytes: &[u8]) -> Result<Vec<Signed>, CodecError> {
    let packets = Packets::decode(bytes)?;
    Ok(packets.packet)
}

/// Serialize units into an envelope body (without delimiter)
pub fn encode_envelope(units: &[Signed]) -> Result<BytesMut, CodecError> {
    let packets = Packets {
        packet: units.to_vec(),
    };

    let mut buf = BytesMut::with_capacity(packets.encoded_len() + DELIMITER.len());
    packets.encode(&mut buf)?;
    Ok(buf)
}

/// Append the end-of-message marker
pub fn append_delimiter(mut buf: BytesMut) -> BytesMut {
    buf.put_slice(&DELIMITER);
    buf
}

/// Encode units into a complete wire frame, delimiter included
pub fn encode_frame(units: &[Signed]) -> Result<Bytes, CodecError> {
    Ok(append_delimiter(encode_envelope(units)?).freeze())
}

/// Incremental delimiter scanner for one connection.
///
/// Bytes are pushed one at a time; a frame is complete as soon as the
/// buffer ends with `DELIMITER`.
pub struct FrameScanner {
    buffer: BytesMut,
    max_message_size: usize,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }

    /// Push one byte.
    ///
    /// Returns `Ok(Some(body))` when the byte completes a delimiter; the
    /// body excludes the delimiter and the scanner is reset. Fails once no
    /// delimiter can arrive before the body exceeds the maximum size.
    pub fn push(&mut self, byte: u8) -> Result<Option<Bytes>, CodecError> {
        self.buffer.put_u8(byte);

        if self.buffer.ends_with(&DELIMITER) {
            let body_len = self.buffer.len() - DELIMITER.len();
            let mut frame = self.buffer.split();
            frame.truncate(body_len);
            return Ok(Some(frame.freeze()));
        }

        // Anything buffered now leaves at least max + 1 body bytes
        if self.buffer.len() >= self.max_message_size.saturating_add(DELIMITER.len()) {
            let buffered = self.buffer.len();
            self.buffer.clear();
            return Err(CodecError::FrameTooLarge(buffered, self.max_message_size));
        }

        Ok(None)
    }

    /// Number of bytes of the pending, incomplete frame
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}
