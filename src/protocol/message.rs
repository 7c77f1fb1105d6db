//! Envelope message definitions
//!
//! Protobuf types for the envelope shuffle clients exchange with the server.
//! Only the fields needed for routing are modelled. The protocol payload
//! travels as raw bytes and is relayed untouched.

use prost::Message;

/// Top-level wire envelope: an ordered list of signed units
#[derive(Clone, PartialEq, Message)]
pub struct Packets {
    #[prost(message, repeated, tag = "1")]
    pub packet: Vec<Signed>,
}

/// A protocol packet plus the sender's signature over it
#[derive(Clone, PartialEq, Message)]
pub struct Signed {
    #[prost(message, optional, tag = "1")]
    pub packet: Option<Packet>,
    #[prost(message, optional, tag = "2")]
    pub signature: Option<Signature>,
}

/// Routing metadata and opaque payload of a single protocol step
#[derive(Clone, PartialEq, Message)]
pub struct Packet {
    /// Session id assigned by the server at registration
    #[prost(bytes = "vec", tag = "1")]
    pub session: Vec<u8>,
    /// Player number within the pool
    #[prost(uint32, tag = "2")]
    pub number: u32,
    #[prost(message, optional, tag = "3")]
    pub from_key: Option<VerificationKey>,
    /// Set when the packet is addressed to a single player
    #[prost(message, optional, tag = "4")]
    pub to_key: Option<VerificationKey>,
    #[prost(enumeration = "Phase", tag = "5")]
    pub phase: i32,
    /// Protocol payload. Encoded clients send a nested message here;
    /// protobuf lays it out exactly like a bytes field.
    #[prost(bytes = "vec", tag = "6")]
    pub message: Vec<u8>,
    #[prost(message, optional, tag = "7")]
    pub registration: Option<Registration>,
}

#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct VerificationKey {
    #[prost(string, tag = "1")]
    pub key: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Signature {
    #[prost(bytes = "vec", tag = "1")]
    pub signature: Vec<u8>,
}

/// Pool parameters a player asks to join with
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct Registration {
    #[prost(uint64, tag = "1")]
    pub amount: u64,
    #[prost(enumeration = "ShuffleType", tag = "2")]
    pub r#type: i32,
    #[prost(uint32, tag = "3")]
    pub version: u32,
}

/// Shuffle protocol phases
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Phase {
    None = 0,
    Announcement = 1,
    Shuffle = 2,
    Broadcast = 3,
    EquivocationCheck = 4,
    Signing = 5,
    VerificationAndSubmission = 6,
    Blame = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ShuffleType {
    Default = 0,
    Dust = 1,
}

impl VerificationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Signed {
    /// Sender's verification key, if the packet carries a non-empty one
    pub fn from_key(&self) -> Option<&str> {
        self.packet
            .as_ref()
            .and_then(|p| p.from_key.as_ref())
            .map(|k| k.key.as_str())
            .filter(|k| !k.is_empty())
    }

    /// Recipient's verification key for directed packets
    pub fn to_key(&self) -> Option<&str> {
        self.packet
            .as_ref()
            .and_then(|p| p.to_key.as_ref())
            .map(|k| k.key.as_str())
            .filter(|k| !k.is_empty())
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.packet.as_ref().and_then(|p| p.registration.as_ref())
    }
}

impl From<Packet> for Signed {
    fn from(packet: Packet) -> Self {
        Self {
            packet: Some(packet),
            signature: None,
        }
    }
}
