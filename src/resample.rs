//! Anti-aliased sample-rate conversion between endpoint audio profiles.
//!
//! The hub's native voice format is 8 kHz mono; Discord's client speaks
//! 48 kHz stereo and Opus peers may run at other rates. All conversion
//! goes through rubato's FFT resamplers so no path ships the aliasing a
//! nearest-neighbour stretch would introduce.

use crate::constants::AUDIO_FRAME_RATE;
use rubato::{FftFixedIn, Resampler};
use std::{error::Error, fmt};

/// Errors raised while building or running a resampler.
#[derive(Debug)]
#[non_exhaustive]
pub enum ResampleError {
    /// The requested rate pair could not be built.
    Construction(rubato::ResamplerConstructionError),
    /// A conversion pass failed.
    Process(rubato::ResampleError),
}

impl fmt::Display for ResampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to resample audio: ")?;
        match self {
            ResampleError::Construction(e) => write!(f, "{}", e),
            ResampleError::Process(e) => write!(f, "{}", e),
        }
    }
}

impl Error for ResampleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ResampleError::Construction(e) => Some(e),
            ResampleError::Process(e) => Some(e),
        }
    }
}

impl From<rubato::ResamplerConstructionError> for ResampleError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        ResampleError::Construction(e)
    }
}

impl From<rubato::ResampleError> for ResampleError {
    fn from(e: rubato::ResampleError) -> Self {
        ResampleError::Process(e)
    }
}

enum Inner {
    /// Rates match; samples pass through untouched.
    Pass,
    Fft(Box<FftFixedIn<f32>>),
}

/// Streaming mono resampler between two fixed rates.
///
/// Input may arrive in any chunk size; whole 20 ms blocks are converted
/// as they fill and the remainder is buffered for the next call.
pub struct MonoResampler {
    inner: Inner,
    pending: Vec<f32>,
}

impl MonoResampler {
    /// Builds a converter from `from` Hz to `to` Hz.
    pub fn new(from: u32, to: u32) -> Result<Self, ResampleError> {
        let inner = if from == to {
            Inner::Pass
        } else {
            let chunk = from as usize / AUDIO_FRAME_RATE;
            Inner::Fft(Box::new(FftFixedIn::new(
                from as usize,
                to as usize,
                chunk,
                2,
                1,
            )?))
        };

        Ok(Self {
            inner,
            pending: vec![],
        })
    }

    /// Converts `input`, returning however many output samples are ready.
    pub fn process(&mut self, input: &[i16]) -> Result<Vec<i16>, ResampleError> {
        let fft = match &mut self.inner {
            Inner::Pass => return Ok(input.to_vec()),
            Inner::Fft(fft) => fft,
        };

        self.pending.extend(input.iter().map(|&s| f32::from(s) / 32_768.0));

        let mut out = vec![];
        loop {
            let needed = fft.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let converted = fft.process(&[chunk], None)?;
            out.extend(converted[0].iter().map(|&s| to_i16(s)));
        }

        Ok(out)
    }
}

/// 8 kHz mono to 48 kHz interleaved stereo, for the Discord client.
pub struct ToStereo48k {
    mono: MonoResampler,
}

impl ToStereo48k {
    /// Builds the upsampler.
    pub fn new() -> Result<Self, ResampleError> {
        Ok(Self {
            mono: MonoResampler::new(
                crate::constants::SAMPLE_RATE_RAW as u32,
                crate::constants::DISCORD_SAMPLE_RATE as u32,
            )?,
        })
    }

    /// Converts 8 kHz mono samples to 48 kHz stereo, duplicating the
    /// single channel into both outputs.
    pub fn process(&mut self, pcm8_mono: &[i16]) -> Result<Vec<i16>, ResampleError> {
        let mono = self.mono.process(pcm8_mono)?;
        let mut out = Vec::with_capacity(mono.len() * 2);
        for sample in mono {
            out.push(sample);
            out.push(sample);
        }
        Ok(out)
    }
}

/// 48 kHz interleaved stereo to 8 kHz mono, for the hub side.
pub struct FromStereo48k {
    mono: MonoResampler,
}

impl FromStereo48k {
    /// Builds the downsampler.
    pub fn new() -> Result<Self, ResampleError> {
        Ok(Self {
            mono: MonoResampler::new(
                crate::constants::DISCORD_SAMPLE_RATE as u32,
                crate::constants::SAMPLE_RATE_RAW as u32,
            )?,
        })
    }

    /// Converts 48 kHz stereo samples to 8 kHz mono, averaging the
    /// channel pair before rate conversion.
    pub fn process(&mut self, pcm48_stereo: &[i16]) -> Result<Vec<i16>, ResampleError> {
        let mono: Vec<i16> = pcm48_stereo
            .chunks_exact(2)
            .map(|pair| ((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16)
            .collect();
        self.mono.process(&mono)
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32_767.0).clamp(-32_768.0, 32_767.0) as i16
}
