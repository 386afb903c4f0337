//! Uniform interface between the hub's native voice frames and the
//! compressed formats spoken by Opus endpoints.
//!
//! Destination workers own one engine each and call it serially, so an
//! engine never needs to be thread-safe. Callers bound every call with
//! [`TRANSCODE_TIMEOUT`]; a timeout skips that destination only.
//!
//! [`TRANSCODE_TIMEOUT`]: crate::constants::TRANSCODE_TIMEOUT

use crate::{
    config::{Config, ServiceConfig},
    constants::{AUDIO_FRAME_RATE, SAMPLE_RATE_RAW, VOICE_FRAME_SIZE},
    frame::AudioFormat,
    resample::{MonoResampler, ResampleError},
    usrp::Voice,
};
use async_trait::async_trait;
use audiopus::{
    coder::{Decoder as OpusDecoder, Encoder as OpusEncoder},
    Application,
    Bitrate,
    Channels,
    SampleRate,
};
use bytes::Bytes;
use std::{error::Error, fmt};
use tracing::warn;

/// Largest encoded frame the engine will emit.
const MAX_ENCODED_LEN: usize = 1500;

/// Largest decode burst: 120 ms at 48 kHz, stereo.
const MAX_DECODE_SAMPLES: usize = 5760 * 2;

/// Errors raised by a transcode engine.
#[derive(Debug)]
#[non_exhaustive]
pub enum TranscodeError {
    /// No engine serves this destination's profile.
    Unavailable,
    /// The engine missed its call deadline.
    Timeout,
    /// The engine's sample rate is not an Opus rate.
    UnsupportedRate(u32),
    /// The underlying codec rejected the call.
    Codec(audiopus::Error),
    /// Rate conversion inside the engine failed.
    Resample(ResampleError),
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to transcode audio: ")?;
        match self {
            TranscodeError::Unavailable => write!(f, "no engine available."),
            TranscodeError::Timeout => write!(f, "call deadline exceeded."),
            TranscodeError::UnsupportedRate(hz) => write!(f, "{} Hz is not an Opus rate.", hz),
            TranscodeError::Codec(e) => write!(f, "codec error {:?}.", e),
            TranscodeError::Resample(e) => write!(f, "{}", e),
        }
    }
}

impl Error for TranscodeError {}

impl From<audiopus::Error> for TranscodeError {
    fn from(e: audiopus::Error) -> Self {
        TranscodeError::Codec(e)
    }
}

impl From<ResampleError> for TranscodeError {
    fn from(e: ResampleError) -> Self {
        TranscodeError::Resample(e)
    }
}

/// Convenience type for transcode results.
pub type TranscodeResult<T> = Result<T, TranscodeError>;

/// A destination-bound codec engine.
///
/// Both directions are streaming: one call may release zero, one, or
/// several frames depending on how the engine's internal buffers fill.
#[async_trait]
pub trait Transcode: Send {
    /// Compresses one native voice frame, returning any encoded frames
    /// which became ready.
    async fn usrp_to_format(&mut self, voice: &Voice) -> TranscodeResult<Vec<Bytes>>;

    /// Decompresses encoded bytes, returning any native voice frames
    /// which became ready.
    async fn format_to_usrp(&mut self, data: &[u8]) -> TranscodeResult<Vec<Voice>>;

    /// The compressed format this engine produces.
    fn format(&self) -> AudioFormat;

    /// Releases the engine; further calls fail with
    /// [`TranscodeError::Unavailable`].
    fn close(&mut self);
}

/// The built-in Opus engine.
///
/// Runs libopus in-process at the peer's rate, resampling to and from
/// the hub's 8 kHz mono as needed. Ogg encapsulation is not provided
/// here; an `ogg`-profiled destination needs an externally supplied
/// engine.
pub struct OpusTranscode {
    encoder: OpusEncoder,
    decoder: OpusDecoder,
    up: MonoResampler,
    down: MonoResampler,
    /// Samples at the peer rate awaiting a full encoder frame.
    enc_pending: Vec<i16>,
    /// 8 kHz samples awaiting a full native frame.
    dec_pending: Vec<i16>,
    /// Samples per channel in one 20 ms frame at the peer rate.
    frame_size: usize,
    stereo: bool,
    closed: bool,
}

impl OpusTranscode {
    /// Builds an engine for a peer speaking Opus at `sample_rate`/`channels`.
    pub fn new(sample_rate: u32, channels: u8, bitrate: Option<u32>) -> TranscodeResult<Self> {
        let rate = match sample_rate {
            8_000 => SampleRate::Hz8000,
            12_000 => SampleRate::Hz12000,
            16_000 => SampleRate::Hz16000,
            24_000 => SampleRate::Hz24000,
            48_000 => SampleRate::Hz48000,
            hz => return Err(TranscodeError::UnsupportedRate(hz)),
        };
        let stereo = channels >= 2;
        let chans = if stereo { Channels::Stereo } else { Channels::Mono };

        let mut encoder = OpusEncoder::new(rate, chans, Application::Voip)?;
        if let Some(bps) = bitrate {
            encoder.set_bitrate(Bitrate::BitsPerSecond(bps as i32))?;
        }
        let decoder = OpusDecoder::new(rate, chans)?;

        Ok(Self {
            encoder,
            decoder,
            up: MonoResampler::new(SAMPLE_RATE_RAW as u32, sample_rate)?,
            down: MonoResampler::new(sample_rate, SAMPLE_RATE_RAW as u32)?,
            enc_pending: vec![],
            dec_pending: vec![],
            frame_size: sample_rate as usize / AUDIO_FRAME_RATE,
            stereo,
            closed: false,
        })
    }

    fn ensure_open(&self) -> TranscodeResult<()> {
        if self.closed {
            Err(TranscodeError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transcode for OpusTranscode {
    async fn usrp_to_format(&mut self, voice: &Voice) -> TranscodeResult<Vec<Bytes>> {
        self.ensure_open()?;

        let converted = self.up.process(&voice.samples)?;
        if self.stereo {
            for sample in converted {
                self.enc_pending.push(sample);
                self.enc_pending.push(sample);
            }
        } else {
            self.enc_pending.extend(converted);
        }

        let chunk_len = self.frame_size * if self.stereo { 2 } else { 1 };
        let mut out = vec![];
        let mut buf = [0u8; MAX_ENCODED_LEN];
        while self.enc_pending.len() >= chunk_len {
            let chunk: Vec<i16> = self.enc_pending.drain(..chunk_len).collect();
            let len = self.encoder.encode(&chunk, &mut buf)?;
            out.push(Bytes::copy_from_slice(&buf[..len]));
        }

        Ok(out)
    }

    async fn format_to_usrp(&mut self, data: &[u8]) -> TranscodeResult<Vec<Voice>> {
        self.ensure_open()?;

        let mut buf = vec![0i16; MAX_DECODE_SAMPLES];
        let per_channel =
            self.decoder
                .decode(Some(data.try_into()?), (&mut buf[..]).try_into()?, false)?;

        let mono: Vec<i16> = if self.stereo {
            buf[..per_channel * 2]
                .chunks_exact(2)
                .map(|pair| ((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16)
                .collect()
        } else {
            buf[..per_channel].to_vec()
        };

        self.dec_pending.extend(self.down.process(&mono)?);

        let mut out = vec![];
        while self.dec_pending.len() >= VOICE_FRAME_SIZE {
            let mut voice = Voice::default();
            for (dst, src) in voice
                .samples
                .iter_mut()
                .zip(self.dec_pending.drain(..VOICE_FRAME_SIZE))
            {
                *dst = src;
            }
            out.push(voice);
        }

        Ok(out)
    }

    fn format(&self) -> AudioFormat {
        AudioFormat::Opus
    }

    fn close(&mut self) {
        self.closed = true;
        self.enc_pending.clear();
        self.dec_pending.clear();
    }
}

/// Builds the engine for one destination, if conversion is enabled and
/// an engine serves its profile.
///
/// Returns `None` (with a log line where it matters) when conversion is
/// off, the destination already speaks PCM, or the profile needs an
/// external engine — in which case format-mismatched frames are simply
/// not delivered there.
pub(crate) fn engine_for(config: &Config, dest: &ServiceConfig) -> Option<Box<dyn Transcode>> {
    if !config.enable_conversion {
        return None;
    }

    match dest.audio_format() {
        AudioFormat::Pcm => None,
        AudioFormat::Opus => match OpusTranscode::new(
            dest.audio_sample_rate(),
            dest.audio_channels(),
            dest.bitrate,
        ) {
            Ok(engine) => Some(Box::new(engine)),
            Err(e) => {
                warn!("No transcode engine for {}: {}", dest.id, e);
                None
            },
        },
        AudioFormat::Ogg => {
            warn!(
                "Destination {} wants ogg; the built-in engine serves opus only.",
                dest.id,
            );
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voiced_frame(step: usize) -> Voice {
        let mut voice = Voice::default();
        for (i, s) in voice.samples.iter_mut().enumerate() {
            // A loud 400 Hz square-ish tone.
            *s = if ((step * VOICE_FRAME_SIZE + i) / 10) % 2 == 0 {
                9000
            } else {
                -9000
            };
        }
        voice
    }

    #[tokio::test]
    async fn opus_round_trip_at_native_rate() {
        let mut engine = OpusTranscode::new(8000, 1, None).unwrap();

        let mut encoded = vec![];
        for step in 0..50 {
            encoded.extend(engine.usrp_to_format(&voiced_frame(step)).await.unwrap());
        }
        assert_eq!(encoded.len(), 50, "one packet per native frame at 8 kHz");

        let mut decoded = vec![];
        for pkt in &encoded {
            decoded.extend(engine.format_to_usrp(pkt).await.unwrap());
        }
        assert_eq!(decoded.len(), 50);

        // The voice survives with real energy; exact samples are lossy.
        let tail = &decoded[25..];
        let energetic = tail
            .iter()
            .filter(|v| crate::frame::pcm_rms(&v.samples) > 2000)
            .count();
        assert!(energetic > tail.len() / 2);
    }

    #[tokio::test]
    async fn opus_round_trip_through_48k_peer() {
        let mut engine = OpusTranscode::new(48_000, 1, Some(32_000)).unwrap();

        let mut encoded = vec![];
        for step in 0..50 {
            encoded.extend(engine.usrp_to_format(&voiced_frame(step)).await.unwrap());
        }
        assert!(!encoded.is_empty());

        let mut decoded = vec![];
        for pkt in &encoded {
            decoded.extend(engine.format_to_usrp(pkt).await.unwrap());
        }
        // Resampler priming trims at most a few frames from each path.
        assert!(decoded.len() > 40);
        assert!(decoded.len() <= 50);
    }

    #[tokio::test]
    async fn closed_engine_refuses_work() {
        let mut engine = OpusTranscode::new(8000, 1, None).unwrap();
        engine.close();

        assert!(matches!(
            engine.usrp_to_format(&Voice::default()).await,
            Err(TranscodeError::Unavailable),
        ));
    }

    #[test]
    fn unsupported_rate_rejected() {
        assert!(matches!(
            OpusTranscode::new(44_100, 1, None),
            Err(TranscodeError::UnsupportedRate(44_100)),
        ));
    }

    #[test]
    fn engine_factory_respects_conversion_flag() {
        let config = Config::default().enable_conversion(false);
        let dest = crate::config::ServiceConfig::new(crate::config::ServiceType::WhoTalkie, "wt");
        assert!(engine_for(&config, &dest).is_none());

        let config = Config::default();
        assert!(engine_for(&config, &dest).is_some());

        let pcm_dest = crate::config::ServiceConfig::new(crate::config::ServiceType::Usrp, "u");
        assert!(engine_for(&config, &pcm_dest).is_none());
    }
}
