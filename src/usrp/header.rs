//! The fixed 32-byte header shared by every USRP packet.
//!
//! Header fields are big-endian on the wire; voice payloads are not.
//! This asymmetry is part of the protocol and must survive any refactor.

use super::error::{DecodeError, DecodeResult};
use crate::constants::HEADER_LEN;
use byteorder::{BigEndian, ByteOrder};

/// The four magic bytes opening every USRP packet.
pub const USRP_MAGIC: [u8; 4] = *b"USRP";

/// Packet type discriminator carried in the header's `type` field.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum PacketType {
    /// 160 signed 16-bit little-endian PCM samples.
    Voice,
    /// A single DTMF digit.
    Dtmf,
    /// Free-form text bytes.
    Text,
    /// Header-only keepalive.
    Ping,
    /// Type-length-value metadata items.
    Tlv,
    /// Variable-length ADPCM voice payload.
    VoiceAdpcm,
    /// 160 µ-law companded voice bytes.
    VoiceUlaw,
}

impl PacketType {
    /// Parses the on-wire `type` field.
    pub fn from_wire(raw: u32) -> DecodeResult<Self> {
        Ok(match raw {
            0 => PacketType::Voice,
            1 => PacketType::Dtmf,
            2 => PacketType::Text,
            3 => PacketType::Ping,
            4 => PacketType::Tlv,
            5 => PacketType::VoiceAdpcm,
            6 => PacketType::VoiceUlaw,
            t => return Err(DecodeError::InvalidType(t)),
        })
    }

    /// The on-wire value of this packet type.
    #[must_use]
    pub fn to_wire(self) -> u32 {
        match self {
            PacketType::Voice => 0,
            PacketType::Dtmf => 1,
            PacketType::Text => 2,
            PacketType::Ping => 3,
            PacketType::Tlv => 4,
            PacketType::VoiceAdpcm => 5,
            PacketType::VoiceUlaw => 6,
        }
    }
}

/// Decoded form of the fixed USRP packet header.
///
/// `memory`, `mpxid` and `reserved` are carried opaquely: senders define
/// their meaning and this hub never interprets them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Header {
    /// Monotonic per-sender sequence counter.
    pub seq: u32,
    /// Sender-defined opaque field.
    pub memory: u32,
    /// Nonzero while the sender's transmitter is keyed.
    keyup: u32,
    /// Talkgroup tag partitioning conversations.
    pub talkgroup: u32,
    /// Packet type of the payload which follows.
    pub packet_type: u32,
    /// Reserved multiplex id.
    pub mpxid: u32,
    /// Reserved.
    pub reserved: u32,
}

impl Header {
    /// Creates a header for the given packet type with all other fields zero.
    #[must_use]
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type: packet_type.to_wire(),
            ..Default::default()
        }
    }

    /// Sets or clears the PTT (`keyup`) flag.
    ///
    /// This is the only interface to the `keyup` field.
    pub fn set_ptt(&mut self, active: bool) {
        self.keyup = u32::from(active);
    }

    /// Whether the sender's transmitter is keyed.
    #[must_use]
    pub fn is_ptt(&self) -> bool {
        self.keyup != 0
    }

    /// Parses the leading 32 bytes of `bytes`.
    ///
    /// Fails if fewer than 32 bytes are present or the magic is wrong;
    /// the type field is *not* range-checked here, so that callers can
    /// peek at headers of unknown packet flavours.
    pub fn from_bytes(bytes: &[u8]) -> DecodeResult<Self> {
        if bytes.len() < HEADER_LEN || bytes[..4] != USRP_MAGIC {
            return Err(DecodeError::MalformedHeader);
        }

        Ok(Self {
            seq: BigEndian::read_u32(&bytes[4..8]),
            memory: BigEndian::read_u32(&bytes[8..12]),
            keyup: BigEndian::read_u32(&bytes[12..16]),
            talkgroup: BigEndian::read_u32(&bytes[16..20]),
            packet_type: BigEndian::read_u32(&bytes[20..24]),
            mpxid: BigEndian::read_u32(&bytes[24..28]),
            reserved: BigEndian::read_u32(&bytes[28..32]),
        })
    }

    /// Writes the 32-byte wire form into `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + HEADER_LEN, 0);
        let buf = &mut out[start..];

        buf[..4].copy_from_slice(&USRP_MAGIC);
        BigEndian::write_u32(&mut buf[4..8], self.seq);
        BigEndian::write_u32(&mut buf[8..12], self.memory);
        BigEndian::write_u32(&mut buf[12..16], self.keyup);
        BigEndian::write_u32(&mut buf[16..20], self.talkgroup);
        BigEndian::write_u32(&mut buf[20..24], self.packet_type);
        BigEndian::write_u32(&mut buf[24..28], self.mpxid);
        BigEndian::write_u32(&mut buf[28..32], self.reserved);
    }

    /// The checked packet type of this header.
    pub fn typed(&self) -> DecodeResult<PacketType> {
        PacketType::from_wire(self.packet_type)
    }
}

/// Returns the packet type of a raw buffer after verifying the magic and
/// the 32-byte minimum, without decoding the payload.
pub fn peek_type(bytes: &[u8]) -> DecodeResult<PacketType> {
    Header::from_bytes(bytes)?.typed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        let mut h = Header::new(PacketType::Voice);
        h.seq = 0x0102_0304;
        h.memory = 7;
        h.talkgroup = 5678;
        h.mpxid = 9;
        h.reserved = 11;
        h.set_ptt(true);
        h
    }

    #[test]
    fn fields_are_big_endian() {
        let mut bytes = vec![];
        sample_header().write_to(&mut bytes);

        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[..4], b"USRP");
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        // keyup is a full-width big-endian bool.
        assert_eq!(&bytes[12..16], &[0, 0, 0, 1]);
        assert_eq!(BigEndian::read_u32(&bytes[16..20]), 5678);
        assert_eq!(BigEndian::read_u32(&bytes[20..24]), 0);
        assert_eq!(BigEndian::read_u32(&bytes[24..28]), 9);
        assert_eq!(BigEndian::read_u32(&bytes[28..32]), 11);
    }

    #[test]
    fn round_trip() {
        let header = sample_header();
        let mut bytes = vec![];
        header.write_to(&mut bytes);

        assert_eq!(Header::from_bytes(&bytes), Ok(header));
    }

    #[test]
    fn short_input_rejected() {
        for len in 0..HEADER_LEN {
            let bytes = vec![0u8; len];
            assert_eq!(Header::from_bytes(&bytes), Err(DecodeError::MalformedHeader));
        }
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = vec![];
        sample_header().write_to(&mut bytes);
        bytes[0] = b'u';

        assert_eq!(Header::from_bytes(&bytes), Err(DecodeError::MalformedHeader));
        assert_eq!(peek_type(&bytes), Err(DecodeError::MalformedHeader));
    }

    #[test]
    fn peek_checks_type_range() {
        let mut h = Header::new(PacketType::Ping);
        h.packet_type = 42;
        let mut bytes = vec![];
        h.write_to(&mut bytes);

        assert_eq!(peek_type(&bytes), Err(DecodeError::InvalidType(42)));
    }

    #[test]
    fn ptt_accessors_cover_keyup() {
        let mut h = Header::new(PacketType::Voice);
        assert!(!h.is_ptt());
        h.set_ptt(true);
        assert!(h.is_ptt());
        h.set_ptt(false);
        assert!(!h.is_ptt());
    }
}
