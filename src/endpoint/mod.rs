//! Per-service endpoint workers.
//!
//! Every enabled service gets one worker set: an optional ingress task
//! owning the listen socket, and an optional egress task draining a
//! bounded queue the dispatcher hands frames to. Workers translate
//! between their service's wire format and [`AudioFrame`]s; the hub
//! never sees raw bytes.

pub(crate) mod discord;
pub(crate) mod generic;
mod ingress;
pub(crate) mod usrp;
pub(crate) mod whotalkie;

pub use self::discord::ClientChannels;

use crate::{
    config::{Config, ServiceConfig, ServiceType},
    constants::EGRESS_QUEUE_LEN,
    frame::AudioFrame,
    hub::{
        stats::{EndpointStats, HubStats},
        DtmfEvent,
    },
};
use async_trait::async_trait;
use flume::Sender;
use std::{io, sync::Arc};
use tokio::{net::UdpSocket, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A registered endpoint, as the dispatcher sees it.
#[derive(Debug)]
pub(crate) struct Endpoint {
    /// The endpoint's validated, read-only configuration.
    pub config: Arc<ServiceConfig>,
    /// The endpoint's counters.
    pub stats: Arc<EndpointStats>,
    /// Dispatcher-side handle on the egress queue; `None` when the
    /// endpoint cannot deliver frames anywhere.
    pub egress_tx: Option<Sender<AudioFrame>>,
}

/// Everything a worker task needs, cloned into each spawned task.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub hub_config: Arc<Config>,
    pub config: Arc<ServiceConfig>,
    pub stats: Arc<EndpointStats>,
    pub hub_tx: Sender<AudioFrame>,
    pub hub_stats: Arc<HubStats>,
    pub dtmf_tx: Sender<DtmfEvent>,
    pub token: CancellationToken,
}

/// A started endpoint: its registry entry, its tasks, and (for opaque
/// services) the channel pair its external client drives.
pub(crate) struct StartedEndpoint {
    pub endpoint: Arc<Endpoint>,
    pub handles: Vec<JoinHandle<()>>,
    pub client: Option<ClientChannels>,
}

/// Binds sockets and spawns the worker set for one service.
pub(crate) async fn start(ctx: WorkerContext) -> io::Result<StartedEndpoint> {
    match ctx.config.kind {
        ServiceType::Usrp => usrp::start(ctx).await,
        ServiceType::WhoTalkie => whotalkie::start(ctx).await,
        ServiceType::Discord => Ok(discord::start(ctx)),
        ServiceType::Generic => generic::start(ctx).await,
    }
}

/// Outcome of one egress delivery attempt.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// Bytes left for the destination.
    Sent(usize),
    /// The frame does not fit this destination; not an error.
    Skipped,
    /// Transcoding for this destination failed or timed out.
    ConversionError,
    /// The network refused the send.
    SendError,
}

/// A destination-specific frame sender.
#[async_trait]
pub(crate) trait Egress: Send {
    async fn deliver(&mut self, frame: AudioFrame, ctx: &WorkerContext) -> Delivery;
}

/// Spawns the egress task for `sink`, returning the queue the
/// dispatcher feeds.
///
/// The dispatcher's handoff is `try_send`; this task is the only place
/// allowed to block on the destination.
pub(crate) fn spawn_egress(
    mut sink: Box<dyn Egress>,
    ctx: WorkerContext,
) -> (Sender<AudioFrame>, JoinHandle<()>) {
    let (tx, rx) = flume::bounded::<AudioFrame>(EGRESS_QUEUE_LEN);

    let handle = tokio::spawn(async move {
        trace!("Egress worker for {} started.", ctx.config.id);

        loop {
            tokio::select! {
                () = ctx.token.cancelled() => break,
                msg = rx.recv_async() => {
                    let Ok(frame) = msg else { break };
                    match sink.deliver(frame, &ctx).await {
                        Delivery::Sent(bytes) => ctx.stats.add_out(bytes),
                        Delivery::Skipped => {},
                        Delivery::ConversionError => ctx.hub_stats.add_conversion_error(),
                        Delivery::SendError => ctx.stats.add_error(),
                    }
                },
            }
        }

        trace!("Egress worker for {} stopped.", ctx.config.id);
    });

    (tx, handle)
}

/// A UDP peer written to by egress sinks.
pub(crate) struct UdpTarget {
    socket: UdpSocket,
    remote: String,
}

impl UdpTarget {
    /// Dials out from an ephemeral local port.
    pub async fn new(remote: String) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self { socket, remote })
    }

    /// Sends one datagram to the configured remote.
    pub async fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, &self.remote).await
    }
}

pub(crate) use ingress::{enqueue, spawn_ingress, IngressCodec};
