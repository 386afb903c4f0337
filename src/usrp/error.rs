//! Errors caused by malformed USRP packets.

use std::{error::Error, fmt};

/// Errors encountered while decoding or validating a USRP packet.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum DecodeError {
    /// Input was shorter than the 32-byte header, or did not start
    /// with the `USRP` magic.
    MalformedHeader,
    /// The header's type field was not one of the seven known packet types.
    InvalidType(u32),
    /// The payload was shorter than the packet type's fixed size.
    ShortPayload {
        /// Number of payload bytes required by the packet type.
        needed: usize,
        /// Number of payload bytes actually present.
        found: usize,
    },
    /// A TLV item declared more value bytes than the packet holds.
    TruncatedTlv,
    /// A DTMF payload byte was outside `0-9`, `A-D`, `*`, `#`.
    InvalidDtmfDigit(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to decode USRP packet: ")?;
        match self {
            DecodeError::MalformedHeader => write!(f, "missing or malformed header."),
            DecodeError::InvalidType(t) => write!(f, "unknown packet type {}.", t),
            DecodeError::ShortPayload { needed, found } =>
                write!(f, "payload too short ({} < {}).", found, needed),
            DecodeError::TruncatedTlv => write!(f, "TLV item ran past the end of the packet."),
            DecodeError::InvalidDtmfDigit(d) =>
                write!(f, "illegal DTMF digit {:#04x}.", d),
        }
    }
}

impl Error for DecodeError {}

/// Convenience type for wire codec results.
pub type DecodeResult<T> = Result<T, DecodeError>;
