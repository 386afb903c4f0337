//! Voice payload packets: linear PCM, µ-law, and ADPCM.

use super::{
    error::{DecodeError, DecodeResult},
    header::{Header, PacketType},
};
use crate::constants::{HEADER_LEN, VOICE_FRAME_BYTE_SIZE, VOICE_FRAME_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

/// One 20 ms frame of 8 kHz mono voice audio.
///
/// Samples travel little-endian on the wire, unlike every header field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Voice {
    /// Packet header; `packet_type` must stay [`PacketType::Voice`].
    pub header: Header,
    /// The PCM samples of this frame.
    pub samples: [i16; VOICE_FRAME_SIZE],
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            header: Header::new(PacketType::Voice),
            samples: [0; VOICE_FRAME_SIZE],
        }
    }
}

impl Voice {
    /// Serialises into a fresh 352-byte wire frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + VOICE_FRAME_BYTE_SIZE);
        self.encode_into(&mut out);
        out
    }

    /// Serialises into `out`, reusing its allocation.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.clear();
        self.header.write_to(out);
        let start = out.len();
        out.resize(start + VOICE_FRAME_BYTE_SIZE, 0);
        LittleEndian::write_i16_into(&self.samples, &mut out[start..]);
    }

    /// Parses a voice packet, header included.
    pub fn decode(bytes: &[u8]) -> DecodeResult<Self> {
        let header = Header::from_bytes(bytes)?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() < VOICE_FRAME_BYTE_SIZE {
            return Err(DecodeError::ShortPayload {
                needed: VOICE_FRAME_BYTE_SIZE,
                found: payload.len(),
            });
        }

        let mut samples = [0i16; VOICE_FRAME_SIZE];
        LittleEndian::read_i16_into(&payload[..VOICE_FRAME_BYTE_SIZE], &mut samples);

        Ok(Self { header, samples })
    }

    /// Fills the sample buffer from raw little-endian PCM bytes.
    ///
    /// Short input is zero-filled; long input is truncated to one frame.
    pub fn fill_from_le_bytes(&mut self, pcm: &[u8]) {
        let take = pcm.len().min(VOICE_FRAME_BYTE_SIZE) & !1;
        let pairs = take / 2;
        LittleEndian::read_i16_into(&pcm[..take], &mut self.samples[..pairs]);
        for sample in &mut self.samples[pairs..] {
            *sample = 0;
        }
    }

    /// The samples of this frame as little-endian bytes.
    #[must_use]
    pub fn samples_le_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; VOICE_FRAME_BYTE_SIZE];
        LittleEndian::write_i16_into(&self.samples, &mut out);
        out
    }
}

/// One 20 ms frame of µ-law companded voice audio.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VoiceUlaw {
    /// Packet header; `packet_type` must stay [`PacketType::VoiceUlaw`].
    pub header: Header,
    /// µ-law bytes, one per sample.
    pub samples: [u8; VOICE_FRAME_SIZE],
}

impl Default for VoiceUlaw {
    fn default() -> Self {
        Self {
            header: Header::new(PacketType::VoiceUlaw),
            samples: [0; VOICE_FRAME_SIZE],
        }
    }
}

impl VoiceUlaw {
    /// Serialises into a fresh 192-byte wire frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + VOICE_FRAME_SIZE);
        self.header.write_to(&mut out);
        out.extend_from_slice(&self.samples);
        out
    }

    /// Parses a µ-law voice packet, header included.
    pub fn decode(bytes: &[u8]) -> DecodeResult<Self> {
        let header = Header::from_bytes(bytes)?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() < VOICE_FRAME_SIZE {
            return Err(DecodeError::ShortPayload {
                needed: VOICE_FRAME_SIZE,
                found: payload.len(),
            });
        }

        let mut samples = [0u8; VOICE_FRAME_SIZE];
        samples.copy_from_slice(&payload[..VOICE_FRAME_SIZE]);

        Ok(Self { header, samples })
    }

    /// Expands this frame to linear PCM.
    #[must_use]
    pub fn to_linear(&self) -> Voice {
        let mut voice = Voice {
            header: self.header,
            ..Default::default()
        };
        voice.header.packet_type = PacketType::Voice.to_wire();
        for (dst, src) in voice.samples.iter_mut().zip(self.samples.iter()) {
            *dst = super::ulaw::decode(*src);
        }
        voice
    }

    /// Compands a linear PCM frame to µ-law.
    #[must_use]
    pub fn from_linear(voice: &Voice) -> Self {
        let mut out = Self {
            header: voice.header,
            ..Default::default()
        };
        out.header.packet_type = PacketType::VoiceUlaw.to_wire();
        for (dst, src) in out.samples.iter_mut().zip(voice.samples.iter()) {
            *dst = super::ulaw::encode(*src);
        }
        out
    }
}

/// A variable-length ADPCM voice payload.
///
/// The hub frames and forwards these without interpreting the sample data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VoiceAdpcm {
    /// Packet header; `packet_type` must stay [`PacketType::VoiceAdpcm`].
    pub header: Header,
    /// Opaque ADPCM bytes.
    pub data: Bytes,
}

impl VoiceAdpcm {
    /// Serialises into a fresh wire frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len());
        self.header.write_to(&mut out);
        out.extend_from_slice(&self.data);
        out
    }

    /// Parses an ADPCM voice packet, header included.
    pub fn decode(bytes: &[u8]) -> DecodeResult<Self> {
        let header = Header::from_bytes(bytes)?;
        Ok(Self {
            header,
            data: Bytes::copy_from_slice(&bytes[HEADER_LEN..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::VOICE_PACKET_LEN;

    #[test]
    fn voice_round_trip_matches_wire_layout() {
        let mut frame = Voice::default();
        frame.header.seq = 1234;
        frame.header.talkgroup = 5678;
        frame.header.set_ptt(true);
        for (i, s) in frame.samples.iter_mut().enumerate() {
            *s = i as i16;
        }

        let bytes = frame.encode();
        assert_eq!(bytes.len(), VOICE_PACKET_LEN);
        assert_eq!(&bytes[..4], &[0x55, 0x53, 0x52, 0x50]);
        // keyup, big-endian.
        assert_eq!(&bytes[12..16], &[0, 0, 0, 1]);
        // sample 0 = 0, sample 1 = 1: little-endian pairs.
        assert_eq!(&bytes[32..36], &[0x00, 0x00, 0x01, 0x00]);
        // sample 2 sits at offset 36.
        assert_eq!(&bytes[36..38], &[0x02, 0x00]);

        assert_eq!(Voice::decode(&bytes), Ok(frame));
    }

    #[test]
    fn voice_short_payload_rejected() {
        let frame = Voice::default();
        let bytes = frame.encode();

        assert_eq!(
            Voice::decode(&bytes[..VOICE_PACKET_LEN - 1]),
            Err(DecodeError::ShortPayload {
                needed: VOICE_FRAME_BYTE_SIZE,
                found: VOICE_FRAME_BYTE_SIZE - 1,
            }),
        );
    }

    #[test]
    fn fill_zero_pads_and_truncates() {
        let mut frame = Voice::default();
        frame.fill_from_le_bytes(&[0x34, 0x12]);
        assert_eq!(frame.samples[0], 0x1234);
        assert!(frame.samples[1..].iter().all(|&s| s == 0));

        let long = vec![0xff; VOICE_FRAME_BYTE_SIZE + 64];
        frame.fill_from_le_bytes(&long);
        assert!(frame.samples.iter().all(|&s| s == -1));
    }

    #[test]
    fn ulaw_round_trip() {
        let mut frame = VoiceUlaw::default();
        frame.header.seq = 9;
        for (i, s) in frame.samples.iter_mut().enumerate() {
            *s = i as u8;
        }

        let bytes = frame.encode();
        assert_eq!(bytes.len(), crate::constants::ULAW_PACKET_LEN);
        assert_eq!(VoiceUlaw::decode(&bytes), Ok(frame));
    }

    #[test]
    fn adpcm_keeps_variable_payload() {
        let mut pkt = VoiceAdpcm {
            header: Header::new(PacketType::VoiceAdpcm),
            data: Bytes::from_static(&[1, 2, 3, 4, 5]),
        };
        pkt.header.seq = 77;

        let bytes = pkt.encode();
        assert_eq!(VoiceAdpcm::decode(&bytes), Ok(pkt));
    }
}
