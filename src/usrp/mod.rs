//! Bit-exact codec for AllStarLink's USRP wire framing.
//!
//! Every packet opens with the same 32-byte [`Header`]; the type field
//! selects one of seven payload flavours. Header fields are big-endian,
//! PCM voice samples little-endian — the codec preserves this asymmetry
//! exactly, as AllStarLink's `chan_usrp` defines it.

mod dtmf;
mod error;
mod header;
mod tlv;
pub mod ulaw;
mod voice;

pub use self::{
    dtmf::{is_dtmf_digit, Dtmf},
    error::{DecodeError, DecodeResult},
    header::{peek_type, Header, PacketType, USRP_MAGIC},
    tlv::{Tlv, TlvItem, TAG_AMBE, TAG_DTMF, TAG_SET_INFO},
    voice::{Voice, VoiceAdpcm, VoiceUlaw},
};

use crate::constants::HEADER_LEN;
use bytes::Bytes;

/// Free-form text bytes.
///
/// The wire places no encoding requirement on the payload; most senders
/// use UTF-8 but the codec passes bytes through untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Text {
    /// Packet header; `packet_type` must stay [`PacketType::Text`].
    pub header: Header,
    /// Raw text bytes.
    pub data: Bytes,
}

impl Text {
    /// Serialises into a fresh wire frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len());
        self.header.write_to(&mut out);
        out.extend_from_slice(&self.data);
        out
    }

    /// Parses a text packet, header included.
    pub fn decode(bytes: &[u8]) -> DecodeResult<Self> {
        let header = Header::from_bytes(bytes)?;
        Ok(Self {
            header,
            data: Bytes::copy_from_slice(&bytes[HEADER_LEN..]),
        })
    }
}

/// A header-only keepalive.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Ping {
    /// Packet header; `packet_type` must stay [`PacketType::Ping`].
    pub header: Header,
}

impl Ping {
    /// Serialises into a fresh 32-byte wire frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        self.header.write_to(&mut out);
        out
    }

    /// Parses a ping packet.
    pub fn decode(bytes: &[u8]) -> DecodeResult<Self> {
        Ok(Self {
            header: Header::from_bytes(bytes)?,
        })
    }
}

/// Any decoded USRP packet.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Packet {
    /// Linear PCM voice.
    Voice(Voice),
    /// A DTMF digit.
    Dtmf(Dtmf),
    /// Free-form text.
    Text(Text),
    /// Keepalive.
    Ping(Ping),
    /// Metadata items.
    Tlv(Tlv),
    /// ADPCM voice.
    VoiceAdpcm(VoiceAdpcm),
    /// µ-law voice.
    VoiceUlaw(VoiceUlaw),
}

impl Packet {
    /// Decodes a raw buffer into the packet named by its type field.
    pub fn decode(bytes: &[u8]) -> DecodeResult<Self> {
        Ok(match peek_type(bytes)? {
            PacketType::Voice => Packet::Voice(Voice::decode(bytes)?),
            PacketType::Dtmf => Packet::Dtmf(Dtmf::decode(bytes)?),
            PacketType::Text => Packet::Text(Text::decode(bytes)?),
            PacketType::Ping => Packet::Ping(Ping::decode(bytes)?),
            PacketType::Tlv => Packet::Tlv(Tlv::decode(bytes)?),
            PacketType::VoiceAdpcm => Packet::VoiceAdpcm(VoiceAdpcm::decode(bytes)?),
            PacketType::VoiceUlaw => Packet::VoiceUlaw(VoiceUlaw::decode(bytes)?),
        })
    }

    /// Serialises into a fresh wire frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Voice(p) => p.encode(),
            Packet::Dtmf(p) => p.encode(),
            Packet::Text(p) => p.encode(),
            Packet::Ping(p) => p.encode(),
            Packet::Tlv(p) => p.encode(),
            Packet::VoiceAdpcm(p) => p.encode(),
            Packet::VoiceUlaw(p) => p.encode(),
        }
    }

    /// The shared packet header.
    #[must_use]
    pub fn header(&self) -> &Header {
        match self {
            Packet::Voice(p) => &p.header,
            Packet::Dtmf(p) => &p.header,
            Packet::Text(p) => &p.header,
            Packet::Ping(p) => &p.header,
            Packet::Tlv(p) => &p.header,
            Packet::VoiceAdpcm(p) => &p.header,
            Packet::VoiceUlaw(p) => &p.header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_flavour_round_trips() {
        let mut voice = Voice::default();
        voice.header.seq = 1;
        voice.samples[0] = -2;

        let mut ulaw = VoiceUlaw::default();
        ulaw.samples[159] = 0x55;

        let mut tlv = Tlv::new();
        tlv.set_callsign("W1AW");

        let packets = [
            Packet::Voice(voice),
            Packet::Dtmf(Dtmf::new(b'#').unwrap()),
            Packet::Text(Text {
                header: Header::new(PacketType::Text),
                data: Bytes::from_static(b"hello"),
            }),
            Packet::Ping(Ping::default()),
            Packet::Tlv(tlv),
            Packet::VoiceAdpcm(VoiceAdpcm {
                header: Header::new(PacketType::VoiceAdpcm),
                data: Bytes::from_static(&[3, 1, 4]),
            }),
            Packet::VoiceUlaw(ulaw),
        ];

        for pkt in packets {
            let wire = pkt.encode();
            assert!(wire.len() >= HEADER_LEN);
            assert_eq!(&wire[..4], b"USRP");
            assert_eq!(Packet::decode(&wire).unwrap(), pkt);
        }
    }

    #[test]
    fn ping_is_header_only() {
        let wire = Ping::default().encode();
        assert_eq!(wire.len(), HEADER_LEN);
        assert_eq!(peek_type(&wire), Ok(PacketType::Ping));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(Packet::decode(b"RTP"), Err(DecodeError::MalformedHeader));
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN]),
            Err(DecodeError::MalformedHeader),
        );
    }
}
