//! Hub, codec, and configuration error handling.

pub use crate::{
    config::ConfigError,
    hub::StartError,
    resample::ResampleError,
    transcode::{TranscodeError, TranscodeResult},
    usrp::{DecodeError, DecodeResult},
};
