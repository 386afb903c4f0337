//! Type-length-value metadata packets.
//!
//! A TLV payload is a run of items, each a one-byte tag, a big-endian
//! `u16` length, and that many value bytes. Items continue until the
//! packet ends; a trailing fragment shorter than the 3-byte item header
//! terminates the run cleanly rather than erroring.

use super::{
    error::{DecodeError, DecodeResult},
    header::{Header, PacketType},
};
use crate::constants::HEADER_LEN;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

/// AMBE-encoded digital voice metadata.
pub const TAG_AMBE: u8 = 0x01;
/// DTMF metadata carried inside a TLV envelope.
pub const TAG_DTMF: u8 = 0x02;
/// Talker information: callsign and free-form metadata.
pub const TAG_SET_INFO: u8 = 0x08;

/// A single TLV item.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TlvItem {
    /// One-byte item tag.
    pub tag: u8,
    /// Value bytes; at most `u16::MAX` of them.
    pub value: Bytes,
}

/// A metadata packet holding zero or more TLV items.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Tlv {
    /// Packet header; `packet_type` must stay [`PacketType::Tlv`].
    pub header: Header,
    /// Items in wire order.
    pub items: Vec<TlvItem>,
}

impl Tlv {
    /// Creates an empty metadata packet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            header: Header::new(PacketType::Tlv),
            items: vec![],
        }
    }

    /// Appends an item.
    ///
    /// Values longer than `u16::MAX` bytes cannot be framed and are
    /// truncated to that bound.
    pub fn push(&mut self, tag: u8, value: impl Into<Bytes>) {
        let mut value: Bytes = value.into();
        value.truncate(usize::from(u16::MAX));
        self.items.push(TlvItem { tag, value });
    }

    /// The first item carrying `tag`, if any.
    #[must_use]
    pub fn first(&self, tag: u8) -> Option<&TlvItem> {
        self.items.iter().find(|item| item.tag == tag)
    }

    /// Sets the talker callsign, replacing any existing `SET_INFO` item.
    ///
    /// The callsign is length-prefixed by the item length itself; no NUL
    /// terminator is written.
    pub fn set_callsign(&mut self, callsign: &str) {
        self.items.retain(|item| item.tag != TAG_SET_INFO);
        self.push(TAG_SET_INFO, Bytes::copy_from_slice(callsign.as_bytes()));
    }

    /// The talker callsign from the first `SET_INFO` item, if present.
    ///
    /// A trailing NUL is stripped for senders which pad their values.
    #[must_use]
    pub fn callsign(&self) -> Option<String> {
        self.first(TAG_SET_INFO).map(|item| {
            let raw = item.value.as_ref();
            let raw = raw.strip_suffix(&[0]).unwrap_or(raw);
            String::from_utf8_lossy(raw).into_owned()
        })
    }

    /// Serialises into a fresh wire frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let payload: usize = self.items.iter().map(|i| 3 + i.value.len()).sum();
        let mut out = Vec::with_capacity(HEADER_LEN + payload);
        self.header.write_to(&mut out);

        for item in &self.items {
            out.push(item.tag);
            let mut len = [0u8; 2];
            BigEndian::write_u16(&mut len, item.value.len() as u16);
            out.extend_from_slice(&len);
            out.extend_from_slice(&item.value);
        }

        out
    }

    /// Parses a TLV packet, header included.
    pub fn decode(bytes: &[u8]) -> DecodeResult<Self> {
        let header = Header::from_bytes(bytes)?;
        let mut rest = &bytes[HEADER_LEN..];
        let mut items = vec![];

        // Stop cleanly on a trailing fragment shorter than an item header.
        while rest.len() >= 3 {
            let tag = rest[0];
            let len = usize::from(BigEndian::read_u16(&rest[1..3]));
            rest = &rest[3..];

            if len > rest.len() {
                return Err(DecodeError::TruncatedTlv);
            }

            items.push(TlvItem {
                tag,
                value: Bytes::copy_from_slice(&rest[..len]),
            });
            rest = &rest[len..];
        }

        Ok(Self { header, items })
    }
}
