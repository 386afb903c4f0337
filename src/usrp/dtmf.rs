//! DTMF signalling packets.

use super::{
    error::{DecodeError, DecodeResult},
    header::{Header, PacketType},
};
use crate::constants::HEADER_LEN;

/// One keyed DTMF digit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Dtmf {
    /// Packet header; `packet_type` must stay [`PacketType::Dtmf`].
    pub header: Header,
    /// The digit, as its ASCII byte.
    pub digit: u8,
}

impl Dtmf {
    /// Creates a digit packet, validating the digit.
    pub fn new(digit: u8) -> DecodeResult<Self> {
        let out = Self {
            header: Header::new(PacketType::Dtmf),
            digit,
        };
        out.validate()?;
        Ok(out)
    }

    /// Checks the digit against the DTMF alphabet `0-9`, `A-D`, `*`, `#`.
    pub fn validate(&self) -> DecodeResult<()> {
        if is_dtmf_digit(self.digit) {
            Ok(())
        } else {
            Err(DecodeError::InvalidDtmfDigit(self.digit))
        }
    }

    /// Serialises into a fresh 33-byte wire frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 1);
        self.header.write_to(&mut out);
        out.push(self.digit);
        out
    }

    /// Parses a DTMF packet, header included; the digit is validated.
    pub fn decode(bytes: &[u8]) -> DecodeResult<Self> {
        let header = Header::from_bytes(bytes)?;
        let payload = &bytes[HEADER_LEN..];
        if payload.is_empty() {
            return Err(DecodeError::ShortPayload {
                needed: 1,
                found: 0,
            });
        }

        let out = Self {
            header,
            digit: payload[0],
        };
        out.validate()?;
        Ok(out)
    }
}

/// Whether `digit` belongs to the DTMF alphabet.
#[must_use]
pub fn is_dtmf_digit(digit: u8) -> bool {
    matches!(digit, b'0'..=b'9' | b'A'..=b'D' | b'*' | b'#')
}
