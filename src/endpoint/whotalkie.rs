//! The WhoTalkie-style Opus endpoint.
//!
//! The service sends bare Opus frames over UDP with no keying signal,
//! so every received packet is treated as part of an active
//! transmission. Egress transcodes PCM sources through the façade when
//! an engine exists and passes Opus through untouched.

use super::{
    spawn_egress,
    spawn_ingress,
    Delivery,
    Egress,
    Endpoint,
    IngressCodec,
    StartedEndpoint,
    UdpTarget,
    WorkerContext,
};
use crate::{
    constants::TRANSCODE_TIMEOUT,
    frame::{AudioFormat, AudioFrame},
    transcode::{engine_for, Transcode},
    usrp::Voice,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{io, sync::Arc};
use tokio::time::timeout;
use tracing::{trace, warn};

/// Binds sockets and spawns the WhoTalkie worker set.
pub(crate) async fn start(ctx: WorkerContext) -> io::Result<StartedEndpoint> {
    let mut handles = vec![];

    if let Some(handle) = spawn_ingress(
        ctx.clone(),
        Arc::new(|| Box::new(WhoTalkieCodec) as Box<dyn IngressCodec>),
    )
    .await?
    {
        handles.push(handle);
    }

    let egress_tx = match ctx.config.remote_socket() {
        Some(remote) => {
            let sink = WhoTalkieEgress {
                target: UdpTarget::new(remote).await?,
                engine: engine_for(&ctx.hub_config, &ctx.config),
            };
            let (tx, handle) = spawn_egress(Box::new(sink), ctx.clone());
            handles.push(handle);
            Some(tx)
        },
        None => None,
    };

    Ok(StartedEndpoint {
        endpoint: Arc::new(Endpoint {
            config: ctx.config.clone(),
            stats: ctx.stats.clone(),
            egress_tx,
        }),
        handles,
        client: None,
    })
}

struct WhoTalkieCodec;

impl IngressCodec for WhoTalkieCodec {
    fn decode(&mut self, payload: &[u8], ctx: &WorkerContext) -> Option<AudioFrame> {
        if payload.is_empty() {
            return None;
        }

        let mut frame = AudioFrame::encoded(
            ctx.config.id.clone(),
            ctx.config.kind,
            AudioFormat::Opus,
            ctx.config.audio_sample_rate(),
            ctx.config.audio_channels(),
            Bytes::copy_from_slice(payload),
        );
        // The wire carries no keying signal; receipt means someone is
        // talking.
        frame.ptt_active = true;
        frame.priority = ctx.config.priority;
        Some(frame)
    }
}

/// Opus datagram sender towards the configured remote.
struct WhoTalkieEgress {
    target: UdpTarget,
    engine: Option<Box<dyn Transcode>>,
}

#[async_trait]
impl Egress for WhoTalkieEgress {
    async fn deliver(&mut self, frame: AudioFrame, ctx: &WorkerContext) -> Delivery {
        match frame.format {
            AudioFormat::Opus | AudioFormat::Ogg => match self.target.send(&frame.payload).await {
                Ok(bytes) => Delivery::Sent(bytes),
                Err(e) => {
                    trace!("{} send failed: {:?}.", ctx.config.id, e);
                    Delivery::SendError
                },
            },
            AudioFormat::Pcm => {
                let Some(engine) = self.engine.as_mut() else {
                    return Delivery::Skipped;
                };

                let mut voice = Voice::default();
                voice.fill_from_le_bytes(&frame.payload);

                let encoded = match timeout(TRANSCODE_TIMEOUT, engine.usrp_to_format(&voice)).await {
                    Ok(Ok(packets)) => packets,
                    Ok(Err(e)) => {
                        trace!("{} transcode failed: {}", ctx.config.id, e);
                        return Delivery::ConversionError;
                    },
                    Err(_) => {
                        warn!("{} transcode deadline exceeded.", ctx.config.id);
                        return Delivery::ConversionError;
                    },
                };

                let mut sent = 0usize;
                for packet in encoded {
                    match self.target.send(&packet).await {
                        Ok(bytes) => sent += bytes,
                        Err(e) => {
                            trace!("{} send failed: {:?}.", ctx.config.id, e);
                            return Delivery::SendError;
                        },
                    }
                }

                if sent > 0 {
                    Delivery::Sent(sent)
                } else {
                    // The encoder is still buffering towards a full frame.
                    Delivery::Skipped
                }
            },
        }
    }
}
