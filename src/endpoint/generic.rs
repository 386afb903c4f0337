//! The generic raw-byte endpoint.
//!
//! Payloads pass through untouched in both directions, tagged with the
//! endpoint's configured audio profile so the rest of the hub can route
//! and convert them.

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
    config::Protocol,
    frame::AudioFrame,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{io, sync::Arc};
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::trace;

/// Binds sockets and spawns the generic worker set.
pub(crate) async fn start(ctx: WorkerContext) -> io::Result<StartedEndpoint> {
    let mut handles = vec![];

    if let Some(handle) = spawn_ingress(
        ctx.clone(),
        Arc::new(|| Box::new(GenericCodec) as Box<dyn IngressCodec>),
    )
    .await?
    {
        handles.push(handle);
    }

    let egress_tx = match ctx.config.remote_socket() {
        Some(remote) => {
            let sink: Box<dyn Egress> = match ctx.config.protocol {
                Protocol::Udp => Box::new(GenericUdpEgress {
                    target: UdpTarget::new(remote).await?,
                }),
                Protocol::Tcp => Box::new(GenericTcpEgress {
                    remote,
                    stream: None,
                }),
            };
            let (tx, handle) = spawn_egress(sink, ctx.clone());
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

struct GenericCodec;

impl IngressCodec for GenericCodec {
    fn decode(&mut self, payload: &[u8], ctx: &WorkerContext) -> Option<AudioFrame> {
        if payload.is_empty() {
            return None;
        }

        let mut frame = AudioFrame::encoded(
            ctx.config.id.clone(),
            ctx.config.kind,
            ctx.config.audio_format(),
            ctx.config.audio_sample_rate(),
            ctx.config.audio_channels(),
            Bytes::copy_from_slice(payload),
        );
        frame.ptt_active = true;
        frame.priority = ctx.config.priority;
        Some(frame)
    }
}

struct GenericUdpEgress {
    target: UdpTarget,
}

#[async_trait]
impl Egress for GenericUdpEgress {
    async fn deliver(&mut self, frame: AudioFrame, ctx: &WorkerContext) -> Delivery {
        match self.target.send(&frame.payload).await {
            Ok(bytes) => Delivery::Sent(bytes),
            Err(e) => {
                trace!("{} send failed: {:?}.", ctx.config.id, e);
                Delivery::SendError
            },
        }
    }
}

/// Stream sender; the connection is dialled lazily and re-dialled after
/// any write error.
struct GenericTcpEgress {
    remote: String,
    stream: Option<TcpStream>,
}

#[async_trait]
impl Egress for GenericTcpEgress {
    async fn deliver(&mut self, frame: AudioFrame, ctx: &WorkerContext) -> Delivery {
        if self.stream.is_none() {
            match TcpStream::connect(&self.remote).await {
                Ok(stream) => self.stream = Some(stream),
                Err(e) => {
                    trace!("{} connect failed: {:?}.", ctx.config.id, e);
                    return Delivery::SendError;
                },
            }
        }

        let Some(stream) = self.stream.as_mut() else {
            return Delivery::SendError;
        };
        match stream.write_all(&frame.payload).await {
            Ok(()) => Delivery::Sent(frame.payload.len()),
            Err(e) => {
                trace!("{} write failed: {:?}.", ctx.config.id, e);
                self.stream = None;
                Delivery::SendError
            },
        }
    }
}
