//! The AllStarLink-compatible USRP endpoint.
//!
//! Ingress peeks each datagram's type and feeds voice into the hub as
//! PCM frames; TLV `SET_INFO` updates the talker callsign attached to
//! subsequent frames, and DTMF digits surface as typed control events
//! rather than being conflated with voice. Egress renumbers frames with
//! this worker's own sequence counter and speaks VOICE (or µ-law, when
//! configured) towards the remote node.

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
    hub::DtmfEvent,
    transcode::{OpusTranscode, Transcode},
    usrp::{Header, Packet, PacketType, Voice, VoiceUlaw},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::HashMap, io, sync::Arc};
use tokio::time::timeout;
use tracing::{info, trace, warn};

/// Binds sockets and spawns the USRP worker set.
pub(crate) async fn start(ctx: WorkerContext) -> io::Result<StartedEndpoint> {
    let mut handles = vec![];

    if let Some(handle) = spawn_ingress(
        ctx.clone(),
        Arc::new(|| Box::<UsrpCodec>::default() as Box<dyn IngressCodec>),
    )
    .await?
    {
        handles.push(handle);
    }

    let egress_tx = match ctx.config.remote_socket() {
        Some(remote) => {
            let sink = UsrpEgress {
                target: UdpTarget::new(remote).await?,
                seq: 0,
                scratch: vec![],
                ulaw: ctx.config.setting_bool("ulaw").unwrap_or(false),
                decoders: HashMap::new(),
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

/// Per-socket USRP decode state.
#[derive(Default)]
struct UsrpCodec {
    /// Talker callsign from the most recent `SET_INFO`, attached to
    /// voice frames until replaced.
    callsign: Option<String>,
}

impl IngressCodec for UsrpCodec {
    fn decode(&mut self, payload: &[u8], ctx: &WorkerContext) -> Option<AudioFrame> {
        let packet = match Packet::decode(payload) {
            Ok(packet) => packet,
            Err(e) => {
                info!("{} rejected a packet: {}", ctx.config.id, e);
                ctx.stats.add_error();
                return None;
            },
        };

        match packet {
            Packet::Voice(voice) => Some(self.voice_frame(&voice, ctx)),
            Packet::VoiceUlaw(ulaw) => Some(self.voice_frame(&ulaw.to_linear(), ctx)),
            Packet::Tlv(tlv) => {
                if let Some(callsign) = tlv.callsign() {
                    trace!("{} talker is now {}.", ctx.config.id, callsign);
                    self.callsign = Some(callsign);
                }
                None
            },
            Packet::Dtmf(dtmf) => {
                drop(ctx.dtmf_tx.try_send(DtmfEvent {
                    source_id: ctx.config.id.clone(),
                    digit: char::from(dtmf.digit),
                    talkgroup: dtmf.header.talkgroup,
                    timestamp_ms: crate::frame::now_ms(),
                }));
                None
            },
            Packet::Ping(_) | Packet::Text(_) | Packet::VoiceAdpcm(_) => {
                trace!("{} ignored a non-voice packet.", ctx.config.id);
                None
            },
        }
    }
}

impl UsrpCodec {
    fn voice_frame(&self, voice: &Voice, ctx: &WorkerContext) -> AudioFrame {
        let mut frame = AudioFrame::pcm(
            ctx.config.id.clone(),
            ctx.config.kind,
            Bytes::from(voice.samples_le_bytes()),
        );
        frame.sequence = voice.header.seq;
        frame.ptt_active = voice.header.is_ptt();
        frame.talkgroup = voice.header.talkgroup;
        frame.priority = ctx.config.priority;
        frame.callsign = self.callsign.clone();
        if let Some(callsign) = &self.callsign {
            frame.source_name = callsign.clone();
        }
        frame
    }
}

/// VOICE sender towards the configured AllStarLink remote.
struct UsrpEgress {
    target: UdpTarget,
    seq: u32,
    scratch: Vec<u8>,
    ulaw: bool,
    /// Lazily built per-profile decoders for compressed sources;
    /// `None` remembers a profile no engine serves.
    decoders: HashMap<(u32, u8), Option<Box<dyn Transcode>>>,
}

#[async_trait]
impl Egress for UsrpEgress {
    async fn deliver(&mut self, frame: AudioFrame, ctx: &WorkerContext) -> Delivery {
        match frame.format {
            AudioFormat::Pcm => {
                let mut voice = self.next_voice(&frame);
                voice.fill_from_le_bytes(&frame.payload);
                self.send_voice(&voice).await
            },
            AudioFormat::Opus | AudioFormat::Ogg => {
                let key = (frame.sample_rate, frame.channels);
                if !self.decoders.contains_key(&key) {
                    let engine = build_decoder(&frame, ctx);
                    self.decoders.insert(key, engine);
                }

                let Some(Some(engine)) = self.decoders.get_mut(&key) else {
                    // No transcoder: decline to send.
                    return Delivery::Skipped;
                };

                let decoded = match timeout(TRANSCODE_TIMEOUT, engine.format_to_usrp(&frame.payload)).await {
                    Ok(Ok(voices)) => voices,
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
                for mut voice in decoded {
                    voice.header = self.next_voice(&frame).header;
                    match self.send_voice(&voice).await {
                        Delivery::Sent(bytes) => sent += bytes,
                        other => return other,
                    }
                }

                if sent > 0 {
                    Delivery::Sent(sent)
                } else {
                    Delivery::Skipped
                }
            },
        }
    }
}

impl UsrpEgress {
    /// A fresh VOICE skeleton carrying this worker's next sequence
    /// number and the frame's keying state.
    fn next_voice(&mut self, frame: &AudioFrame) -> Voice {
        let mut header = Header::new(PacketType::Voice);
        header.seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        header.talkgroup = frame.talkgroup;
        header.set_ptt(frame.ptt_active);

        Voice {
            header,
            ..Default::default()
        }
    }

    async fn send_voice(&mut self, voice: &Voice) -> Delivery {
        if self.ulaw {
            self.scratch = VoiceUlaw::from_linear(voice).encode();
        } else {
            let mut out = std::mem::take(&mut self.scratch);
            voice.encode_into(&mut out);
            self.scratch = out;
        }

        match self.target.send(&self.scratch).await {
            Ok(bytes) => Delivery::Sent(bytes),
            Err(e) => {
                trace!("VOICE send failed: {:?}.", e);
                Delivery::SendError
            },
        }
    }
}

fn build_decoder(frame: &AudioFrame, ctx: &WorkerContext) -> Option<Box<dyn Transcode>> {
    if !ctx.hub_config.enable_conversion || frame.format != AudioFormat::Opus {
        return None;
    }

    match OpusTranscode::new(frame.sample_rate, frame.channels, None) {
        Ok(engine) => Some(Box::new(engine)),
        Err(e) => {
            warn!(
                "{} cannot decode {} Hz/{}ch: {}",
                ctx.config.id, frame.sample_rate, frame.channels, e,
            );
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, ServiceConfig, ServiceType},
        hub::stats::{EndpointStats, HubStats},
        usrp::{Dtmf, Tlv},
    };
    use flume::Receiver;
    use tokio_util::sync::CancellationToken;

    fn test_ctx() -> (WorkerContext, Receiver<AudioFrame>, Receiver<DtmfEvent>) {
        let (hub_tx, hub_rx) = flume::bounded(16);
        let (dtmf_tx, dtmf_rx) = flume::unbounded();

        let mut config = ServiceConfig::new(ServiceType::Usrp, "usrp_1");
        config.priority = 4;

        let ctx = WorkerContext {
            hub_config: Arc::new(Config::default()),
            config: Arc::new(config),
            stats: Arc::new(EndpointStats::default()),
            hub_tx,
            hub_stats: Arc::new(HubStats::default()),
            dtmf_tx,
            token: CancellationToken::new(),
        };

        (ctx, hub_rx, dtmf_rx)
    }

    #[test]
    fn voice_becomes_a_pcm_frame() {
        let (ctx, _hub_rx, _dtmf_rx) = test_ctx();
        let mut codec = UsrpCodec::default();

        let mut voice = Voice::default();
        voice.header.seq = 42;
        voice.header.talkgroup = 9;
        voice.header.set_ptt(true);
        voice.samples[0] = 0x1234;

        let frame = codec.decode(&voice.encode(), &ctx).expect("voice routes");
        assert_eq!(frame.source_id, "usrp_1");
        assert_eq!(frame.sequence, 42);
        assert_eq!(frame.talkgroup, 9);
        assert!(frame.ptt_active);
        assert_eq!(frame.priority, 4);
        assert_eq!(&frame.payload[..2], &[0x34, 0x12]);
        assert_eq!(frame.payload.len(), 320);
    }

    #[test]
    fn set_info_attaches_callsign_to_later_voice() {
        let (ctx, _hub_rx, _dtmf_rx) = test_ctx();
        let mut codec = UsrpCodec::default();

        let mut tlv = Tlv::new();
        tlv.set_callsign("W1AW");
        assert!(codec.decode(&tlv.encode(), &ctx).is_none());

        let frame = codec
            .decode(&Voice::default().encode(), &ctx)
            .expect("voice routes");
        assert_eq!(frame.callsign.as_deref(), Some("W1AW"));
        assert_eq!(frame.source_name, "W1AW");
    }

    #[test]
    fn ulaw_voice_is_linearised() {
        let (ctx, _hub_rx, _dtmf_rx) = test_ctx();
        let mut codec = UsrpCodec::default();

        let mut ulaw = VoiceUlaw::default();
        ulaw.samples.fill(0xff);

        let frame = codec.decode(&ulaw.encode(), &ctx).expect("ulaw routes");
        // Silence codewords expand to zero samples.
        assert_eq!(frame.payload.len(), 320);
        assert!(frame.payload.iter().all(|&b| b == 0));
    }

    #[test]
    fn dtmf_surfaces_as_control_event() {
        let (ctx, _hub_rx, dtmf_rx) = test_ctx();
        let mut codec = UsrpCodec::default();

        let mut dtmf = Dtmf::new(b'7').unwrap();
        dtmf.header.talkgroup = 12;

        assert!(codec.decode(&dtmf.encode(), &ctx).is_none());

        let event = dtmf_rx.try_recv().expect("event emitted");
        assert_eq!(event.digit, '7');
        assert_eq!(event.source_id, "usrp_1");
        assert_eq!(event.talkgroup, 12);
    }

    #[test]
    fn garbage_counts_an_error() {
        let (ctx, _hub_rx, _dtmf_rx) = test_ctx();
        let mut codec = UsrpCodec::default();

        assert!(codec.decode(b"not usrp at all", &ctx).is_none());
        assert_eq!(ctx.stats.errors(), 1);
    }
}
