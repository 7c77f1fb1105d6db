//! Default verifier
//!
//! Checks that a unit carries the routing identity its sender registered
//! with. Signature cryptography is left to the clients.

use super::{Session, VerificationError, Verifier};
use crate::protocol::Signed;

#[derive(Debug, Clone, Copy, Default)]
pub struct PacketVerifier;

impl Verifier for PacketVerifier {
    fn verify(&self, session: &Session, unit: &Signed) -> Result<(), VerificationError> {
        let packet = unit.packet.as_ref().ok_or(VerificationError::MissingPacket)?;

        if packet.session != session.session_id {
            return Err(VerificationError::SessionMismatch);
        }

        if packet.number != session.number {
            return Err(VerificationError::NumberMismatch {
                expected: session.number,
                actual: packet.number,
            });
        }

        if unit.from_key() != Some(session.verification_key.as_str()) {
            return Err(VerificationError::KeyMismatch);
        }

        Ok(())
    }
}
