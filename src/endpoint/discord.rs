//! The Discord voice endpoint.
//!
//! The gateway client is an external collaborator, so this endpoint
//! owns no socket: the client pushes 48 kHz stereo PCM in through a
//! channel handle and consumes upsampled frames from another. An RMS
//! gate stands in for the keying signal Discord doesn't have, and
//! rubato resamplers bridge the rate gap to the hub's 8 kHz mono.

use super::{
    enqueue,
    spawn_egress,
    Delivery,
    Egress,
    Endpoint,
    StartedEndpoint,
    WorkerContext,
};
use crate::{
    constants::{EGRESS_QUEUE_LEN, TRANSCODE_TIMEOUT, VOICE_FRAME_BYTE_SIZE, VOICE_FRAME_SIZE},
    frame::{pcm_rms, AudioFormat, AudioFrame},
    resample::{FromStereo48k, ToStereo48k},
    transcode::{OpusTranscode, Transcode},
};
use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use flume::{Receiver, Sender};
use std::collections::HashMap;
use tokio::time::timeout;
use tracing::{error, trace, warn};

/// The channel pair driven by the external gateway client.
pub struct ClientChannels {
    /// Raw 48 kHz stereo PCM (little-endian bytes) from the client.
    pub ingress: Sender<Bytes>,
    /// Frames routed to this endpoint, upsampled for the client.
    pub egress: Receiver<AudioFrame>,
}

/// Spawns the Discord worker set and its client channel pair.
pub(crate) fn start(ctx: WorkerContext) -> StartedEndpoint {
    let mut handles = vec![];

    let (pcm_tx, pcm_rx) = flume::bounded::<Bytes>(EGRESS_QUEUE_LEN);
    let (frame_tx, frame_rx) = flume::bounded::<AudioFrame>(EGRESS_QUEUE_LEN);

    handles.push(tokio::spawn(ingress_runner(pcm_rx, ctx.clone())));

    let egress_tx = match ToStereo48k::new() {
        Ok(upsampler) => {
            let sink = DiscordEgress {
                client: frame_tx,
                upsampler,
                decoders: HashMap::new(),
            };
            let (tx, handle) = spawn_egress(Box::new(sink), ctx.clone());
            handles.push(handle);
            Some(tx)
        },
        Err(e) => {
            error!("{} has no upsampler: {}", ctx.config.id, e);
            None
        },
    };

    StartedEndpoint {
        endpoint: std::sync::Arc::new(Endpoint {
            config: ctx.config.clone(),
            stats: ctx.stats.clone(),
            egress_tx,
        }),
        handles,
        client: Some(ClientChannels {
            ingress: pcm_tx,
            egress: frame_rx,
        }),
    }
}

/// Drains client PCM, gates it on RMS, downsamples to the hub's native
/// rate, and enqueues whole voice frames.
async fn ingress_runner(pcm_rx: Receiver<Bytes>, ctx: WorkerContext) {
    trace!("Client ingress for {} started.", ctx.config.id);

    let mut downsampler = match FromStereo48k::new() {
        Ok(d) => d,
        Err(e) => {
            error!("{} has no downsampler: {}", ctx.config.id, e);
            return;
        },
    };
    let threshold = ctx.config.ptt_rms_threshold();
    let mut pending: Vec<i16> = vec![];
    let mut sequence = 0u32;

    loop {
        let payload = tokio::select! {
            () = ctx.token.cancelled() => break,
            msg = pcm_rx.recv_async() => match msg {
                Ok(payload) => payload,
                Err(_) => break,
            },
        };

        ctx.stats.add_in(payload.len());

        let mut samples = vec![0i16; payload.len() / 2];
        LittleEndian::read_i16_into(&payload[..samples.len() * 2], &mut samples);

        // Gate on the client-rate signal, before any filtering.
        let ptt_active = pcm_rms(&samples) >= threshold;

        match downsampler.process(&samples) {
            Ok(converted) => pending.extend(converted),
            Err(e) => {
                warn!("{} downsample failed: {}", ctx.config.id, e);
                ctx.stats.add_error();
                continue;
            },
        }

        while pending.len() >= VOICE_FRAME_SIZE {
            let chunk: Vec<i16> = pending.drain(..VOICE_FRAME_SIZE).collect();
            let mut bytes = vec![0u8; VOICE_FRAME_BYTE_SIZE];
            LittleEndian::write_i16_into(&chunk, &mut bytes);

            let mut frame =
                AudioFrame::pcm(ctx.config.id.clone(), ctx.config.kind, Bytes::from(bytes));
            frame.ptt_active = ptt_active;
            frame.priority = ctx.config.priority;
            frame.sequence = sequence;
            sequence = sequence.wrapping_add(1);

            enqueue(frame, &ctx).await;
        }
    }

    trace!("Client ingress for {} stopped.", ctx.config.id);
}

/// Upsampling sink handing frames to the external client.
struct DiscordEgress {
    client: Sender<AudioFrame>,
    upsampler: ToStereo48k,
    /// Lazily built per-profile decoders for compressed sources;
    /// `None` remembers a profile no engine serves.
    decoders: HashMap<(u32, u8), Option<Box<dyn Transcode>>>,
}

#[async_trait]
impl Egress for DiscordEgress {
    async fn deliver(&mut self, frame: AudioFrame, ctx: &WorkerContext) -> Delivery {
        let pcm8: Vec<i16> = match frame.format {
            AudioFormat::Pcm => {
                if frame.sample_rate == crate::constants::DISCORD_SAMPLE_RATE as u32
                    && frame.channels == 2
                {
                    // Already in the client's profile.
                    let sent = frame.payload.len();
                    return match self.client.try_send(frame) {
                        Ok(()) => Delivery::Sent(sent),
                        Err(flume::TrySendError::Full(_)) => Delivery::SendError,
                        Err(flume::TrySendError::Disconnected(_)) => Delivery::Skipped,
                    };
                }

                let len = frame.payload.len() / 2;
                let mut samples = vec![0i16; len];
                LittleEndian::read_i16_into(&frame.payload[..len * 2], &mut samples);
                samples
            },
            AudioFormat::Opus | AudioFormat::Ogg => {
                if !ctx.hub_config.enable_conversion || frame.format != AudioFormat::Opus {
                    return Delivery::Skipped;
                }

                let key = (frame.sample_rate, frame.channels);
                if !self.decoders.contains_key(&key) {
                    let engine = match OpusTranscode::new(frame.sample_rate, frame.channels, None)
                    {
                        Ok(engine) => Some(Box::new(engine) as Box<dyn Transcode>),
                        Err(e) => {
                            warn!("{} cannot decode opus source: {}", ctx.config.id, e);
                            None
                        },
                    };
                    self.decoders.insert(key, engine);
                }

                let Some(Some(engine)) = self.decoders.get_mut(&key) else {
                    return Delivery::Skipped;
                };

                match timeout(TRANSCODE_TIMEOUT, engine.format_to_usrp(&frame.payload)).await {
                    Ok(Ok(voices)) => voices
                        .iter()
                        .flat_map(|v| v.samples.iter().copied())
                        .collect(),
                    Ok(Err(e)) => {
                        trace!("{} transcode failed: {}", ctx.config.id, e);
                        return Delivery::ConversionError;
                    },
                    Err(_) => {
                        warn!("{} transcode deadline exceeded.", ctx.config.id);
                        return Delivery::ConversionError;
                    },
                }
            },
        };

        if pcm8.is_empty() {
            return Delivery::Skipped;
        }

        let stereo = match self.upsampler.process(&pcm8) {
            Ok(stereo) => stereo,
            Err(e) => {
                warn!("{} upsample failed: {}", ctx.config.id, e);
                return Delivery::ConversionError;
            },
        };
        if stereo.is_empty() {
            return Delivery::Skipped;
        }

        let mut bytes = vec![0u8; stereo.len() * 2];
        LittleEndian::write_i16_into(&stereo, &mut bytes);
        let sent = bytes.len();

        let mut out = frame;
        out.payload = Bytes::from(bytes);
        out.format = AudioFormat::Pcm;
        out.sample_rate = crate::constants::DISCORD_SAMPLE_RATE as u32;
        out.channels = 2;

        match self.client.try_send(out) {
            Ok(()) => Delivery::Sent(sent),
            Err(flume::TrySendError::Full(_)) => {
                trace!("{} client queue full.", ctx.config.id);
                Delivery::SendError
            },
            Err(flume::TrySendError::Disconnected(_)) => Delivery::Skipped,
        }
    }
}
