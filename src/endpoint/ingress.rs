//! Shared socket ingress loops.
//!
//! Reads run with a short deadline and loop back to check cancellation,
//! so a quiet wire never pins a worker past shutdown. Decoded frames
//! are offered to the hub with a bounded grace; a full hub is recorded
//! backpressure, never a blocked socket.

use super::WorkerContext;
use crate::{
    config::Protocol,
    constants::{HUB_ENQUEUE_TIMEOUT, INGRESS_PACKET_MAX, INGRESS_READ_TIMEOUT, TCP_READ_TIMEOUT},
    frame::AudioFrame,
};
use std::{io, sync::Arc};
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, UdpSocket},
    task::JoinHandle,
    time::timeout,
};
use tracing::{info, instrument, trace, warn};

/// Translates one received payload into at most one hub frame.
///
/// Implementations keep per-peer state (sequence counters, callsigns)
/// and account their own decode errors; returning `None` consumes the
/// payload without producing a frame.
pub(crate) trait IngressCodec: Send + 'static {
    fn decode(&mut self, payload: &[u8], ctx: &WorkerContext) -> Option<AudioFrame>;
}

/// A constructor for per-connection codec state.
pub(crate) type CodecFactory = Arc<dyn Fn() -> Box<dyn IngressCodec> + Send + Sync>;

/// Binds the configured listen socket and spawns the ingress task for
/// this endpoint. Returns `None` when no listen binding is configured.
pub(crate) async fn spawn_ingress(
    ctx: WorkerContext,
    factory: CodecFactory,
) -> io::Result<Option<JoinHandle<()>>> {
    let Some(bind) = ctx.config.listen_socket() else {
        return Ok(None);
    };

    let handle = match ctx.config.protocol {
        Protocol::Udp => {
            let socket = UdpSocket::bind(&bind).await?;
            info!("{} listening on udp {}.", ctx.config.id, bind);
            tokio::spawn(run_udp(socket, factory(), ctx))
        },
        Protocol::Tcp => {
            let listener = TcpListener::bind(&bind).await?;
            info!("{} listening on tcp {}.", ctx.config.id, bind);
            tokio::spawn(run_tcp(listener, factory, ctx))
        },
    };

    Ok(Some(handle))
}

/// Offers a decoded frame to the hub within the enqueue deadline.
pub(crate) async fn enqueue(frame: AudioFrame, ctx: &WorkerContext) {
    if !ctx.config.can_send {
        return;
    }

    match timeout(HUB_ENQUEUE_TIMEOUT, ctx.hub_tx.send_async(frame)).await {
        Ok(Ok(())) => {},
        Ok(Err(_)) => {
            // Hub channel closed: shutdown is in progress.
            trace!("{} enqueue after hub closed.", ctx.config.id);
        },
        Err(_) => {
            warn!("{} dropped a frame: hub backpressure.", ctx.config.id);
            ctx.stats.add_error();
            ctx.hub_stats.add_dropped();
        },
    }
}

#[instrument(skip_all, fields(id = %ctx.config.id))]
async fn run_udp(socket: UdpSocket, mut codec: Box<dyn IngressCodec>, ctx: WorkerContext) {
    trace!("UDP ingress started.");
    let mut buf = [0u8; INGRESS_PACKET_MAX];

    loop {
        if ctx.token.is_cancelled() {
            break;
        }

        match timeout(INGRESS_READ_TIMEOUT, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!("UDP read error: {:?}.", e);
                ctx.stats.add_error();
            },
            Ok(Ok((len, _addr))) => {
                ctx.stats.add_in(len);
                if let Some(frame) = codec.decode(&buf[..len], &ctx) {
                    enqueue(frame, &ctx).await;
                }
            },
        }
    }

    trace!("UDP ingress stopped.");
}

#[instrument(skip_all, fields(id = %ctx.config.id))]
async fn run_tcp(listener: TcpListener, factory: CodecFactory, ctx: WorkerContext) {
    trace!("TCP accept loop started.");

    loop {
        if ctx.token.is_cancelled() {
            break;
        }

        match timeout(INGRESS_READ_TIMEOUT, listener.accept()).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!("TCP accept error: {:?}.", e);
                ctx.stats.add_error();
            },
            Ok(Ok((stream, peer))) => {
                trace!("Accepted connection from {}.", peer);
                tokio::spawn(run_tcp_conn(stream, factory(), ctx.clone()));
            },
        }
    }

    trace!("TCP accept loop stopped.");
}

/// One accepted connection; each successful read is one payload.
async fn run_tcp_conn(
    mut stream: tokio::net::TcpStream,
    mut codec: Box<dyn IngressCodec>,
    ctx: WorkerContext,
) {
    let mut buf = [0u8; INGRESS_PACKET_MAX];

    loop {
        if ctx.token.is_cancelled() {
            break;
        }

        match timeout(TCP_READ_TIMEOUT, stream.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => break,
            Ok(Ok(len)) => {
                ctx.stats.add_in(len);
                if let Some(frame) = codec.decode(&buf[..len], &ctx) {
                    enqueue(frame, &ctx).await;
                }
            },
            Ok(Err(e)) => {
                trace!("TCP read error: {:?}.", e);
                ctx.stats.add_error();
                break;
            },
        }
    }
}
