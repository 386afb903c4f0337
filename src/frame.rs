//! The internal audio frame exchanged between endpoints and the hub.

use crate::config::ServiceType;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Logical audio encodings a frame payload may carry.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum AudioFormat {
    /// Raw signed 16-bit little-endian PCM.
    Pcm,
    /// Bare Opus frames.
    Opus,
    /// Ogg-encapsulated Opus.
    Ogg,
}

/// One frame of audio (or signalling context) crossing the hub.
///
/// Frames are value-typed: an endpoint builds one, hands it to the hub,
/// and must not touch it again. The payload is a [`Bytes`] handle, so
/// fan-out to several destinations shares one buffer without copying —
/// destinations may read it concurrently but never write.
#[derive(Clone, Debug)]
pub struct AudioFrame {
    /// Id of the endpoint which produced this frame.
    pub source_id: String,
    /// Service flavour of the producing endpoint.
    pub source_type: ServiceType,
    /// Human-readable producer name; the endpoint id unless the service
    /// knows better (e.g. a decoded callsign).
    pub source_name: String,
    /// Encoded audio payload.
    pub payload: Bytes,
    /// Payload encoding.
    pub format: AudioFormat,
    /// Payload sample rate in Hz.
    pub sample_rate: u32,
    /// Payload channel count.
    pub channels: u8,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Producer's sequence counter.
    pub sequence: u32,
    /// Whether the producing transmitter is keyed.
    pub ptt_active: bool,
    /// Talker callsign, when the service carries one.
    pub callsign: Option<String>,
    /// Talkgroup tag.
    pub talkgroup: u32,
    /// Transmission priority, 0–10; inherited from the endpoint config.
    pub priority: u8,
    /// When non-empty, restricts destinations to these service types.
    pub route_to_types: Vec<ServiceType>,
    /// Destination ids this frame must never reach.
    pub exclude_ids: Vec<String>,
}

impl AudioFrame {
    /// Creates a PCM frame with hub defaults for the optional fields.
    #[must_use]
    pub fn pcm(source_id: impl Into<String>, source_type: ServiceType, payload: Bytes) -> Self {
        let source_id = source_id.into();
        Self {
            source_name: source_id.clone(),
            source_id,
            source_type,
            payload,
            format: AudioFormat::Pcm,
            sample_rate: crate::constants::SAMPLE_RATE_RAW as u32,
            channels: 1,
            timestamp_ms: now_ms(),
            sequence: 0,
            ptt_active: false,
            callsign: None,
            talkgroup: 0,
            priority: 0,
            route_to_types: vec![],
            exclude_ids: vec![],
        }
    }

    /// Creates a frame of the given encoding.
    #[must_use]
    pub fn encoded(
        source_id: impl Into<String>,
        source_type: ServiceType,
        format: AudioFormat,
        sample_rate: u32,
        channels: u8,
        payload: Bytes,
    ) -> Self {
        Self {
            format,
            sample_rate,
            channels,
            ..Self::pcm(source_id, source_type, payload)
        }
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Root-mean-square level of interleaved 16-bit PCM.
///
/// Used as the naïve voice-activity gate for services without a keying
/// signal. This is not voice-activity detection; it only separates
/// silence from signal.
#[must_use]
pub fn pcm_rms(samples: &[i16]) -> u32 {
    if samples.is_empty() {
        return 0;
    }

    let sum: u64 = samples
        .iter()
        .map(|&s| {
            let s = i64::from(s);
            (s * s) as u64
        })
        .sum();

    ((sum / samples.len() as u64) as f64).sqrt() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(pcm_rms(&[0; 160]), 0);
        assert_eq!(pcm_rms(&[]), 0);
    }

    #[test]
    fn rms_of_constant_signal_is_its_magnitude() {
        assert_eq!(pcm_rms(&[2000; 160]), 2000);
        assert_eq!(pcm_rms(&[-2000; 160]), 2000);
    }

    #[test]
    fn rms_gate_separates_noise_floor_from_speech() {
        let quiet: Vec<i16> = (0..160).map(|i| if i % 2 == 0 { 40 } else { -40 }).collect();
        let loud: Vec<i16> = (0..160).map(|i| if i % 2 == 0 { 8000 } else { -8000 }).collect();

        assert!(pcm_rms(&quiet) < 1000);
        assert!(pcm_rms(&loud) > 1000);
    }

    #[test]
    fn payload_is_shared_not_copied() {
        let payload = Bytes::from_static(&[1, 2, 3, 4]);
        let frame = AudioFrame::pcm("usrp_0", ServiceType::Usrp, payload.clone());
        let cloned = frame.clone();

        // Both handles view the same buffer.
        assert_eq!(frame.payload.as_ptr(), cloned.payload.as_ptr());
        assert_eq!(payload.as_ptr(), cloned.payload.as_ptr());
    }
}
