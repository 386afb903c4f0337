//! The routing hub: lifecycle, the public handle, and the dispatcher.
//!
//! A [`Hub`] is built from a validated [`Config`], started once, and
//! driven entirely through channels: endpoint workers feed the bounded
//! hub channel, one dispatcher task routes, and destination workers
//! drain their own egress queues. Shutdown cancels a single token and
//! waits for every task to return.

mod dispatch;
mod router;
pub mod stats;
mod transmissions;

use crate::{
    config::{Config, ConfigError, ServiceConfig},
    constants::HOUSEKEEPING_INTERVAL,
    endpoint::{self, ClientChannels, Endpoint, WorkerContext},
    frame::AudioFrame,
    hub::{
        stats::{EndpointSnapshot, HubStats, StatsSnapshot},
        transmissions::TransmissionTable,
    },
};
use dashmap::DashMap;
use flume::{Receiver, Sender};
use std::{collections::HashMap, error::Error, fmt, io, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, trace};

/// A DTMF digit received by an endpoint, surfaced as a typed control
/// event instead of audio.
#[derive(Clone, Debug)]
pub struct DtmfEvent {
    /// Endpoint which heard the digit.
    pub source_id: String,
    /// The digit.
    pub digit: char,
    /// Talkgroup the digit was keyed on.
    pub talkgroup: u32,
    /// Receipt time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

/// State shared between the dispatcher, workers, and the handle.
pub(crate) struct Shared {
    pub config: Arc<Config>,
    pub endpoints: DashMap<String, Arc<Endpoint>>,
    pub stats: Arc<HubStats>,
    pub transmissions: TransmissionTable,
}

/// Errors fatal to hub startup.
#[derive(Debug)]
#[non_exhaustive]
pub enum StartError {
    /// A listen or egress socket could not be created.
    Io(io::Error),
    /// The hub was started twice.
    AlreadyStarted,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to start hub: ")?;
        match self {
            StartError::Io(e) => write!(f, "{}", e),
            StartError::AlreadyStarted => write!(f, "already started."),
        }
    }
}

impl Error for StartError {}

impl From<io::Error> for StartError {
    fn from(e: io::Error) -> Self {
        StartError::Io(e)
    }
}

/// The audio routing hub.
///
/// External collaborators interact only through this handle: the config
/// loader hands in a [`Config`], the status surface polls
/// [`Hub::snapshot`], and opaque endpoints (Discord) exchange frames
/// through [`Hub::client_channels`].
pub struct Hub {
    shared: Arc<Shared>,
    tx: Option<Sender<AudioFrame>>,
    rx: Option<Receiver<AudioFrame>>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    clients: HashMap<String, ClientChannels>,
    dtmf_tx: Sender<DtmfEvent>,
    dtmf_rx: Receiver<DtmfEvent>,
}

impl Hub {
    /// Validates `config` and builds an unstarted hub.
    pub fn new(mut config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let (tx, rx) = flume::bounded(config.buffer_size);
        let (dtmf_tx, dtmf_rx) = flume::unbounded();
        let transmissions = TransmissionTable::new(&config);

        Ok(Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                endpoints: DashMap::new(),
                stats: Arc::new(HubStats::default()),
                transmissions,
            }),
            tx: Some(tx),
            rx: Some(rx),
            token: CancellationToken::new(),
            handles: vec![],
            clients: HashMap::new(),
            dtmf_tx,
            dtmf_rx,
        })
    }

    /// Binds every enabled endpoint's sockets, then starts the worker
    /// set, the dispatcher, and the housekeeping tick.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<(), StartError> {
        let Some(rx) = self.rx.take() else {
            return Err(StartError::AlreadyStarted);
        };
        let Some(tx) = self.tx.clone() else {
            return Err(StartError::AlreadyStarted);
        };

        let services: Vec<ServiceConfig> = self
            .shared
            .config
            .services
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect();

        for service in services {
            let id = service.id.clone();
            let ctx = WorkerContext {
                hub_config: self.shared.config.clone(),
                config: Arc::new(service),
                stats: Arc::new(stats::EndpointStats::default()),
                hub_tx: tx.clone(),
                hub_stats: self.shared.stats.clone(),
                dtmf_tx: self.dtmf_tx.clone(),
                token: self.token.child_token(),
            };

            let started = endpoint::start(ctx).await?;
            self.shared.endpoints.insert(id.clone(), started.endpoint);
            self.handles.extend(started.handles);
            if let Some(client) = started.client {
                self.clients.insert(id.clone(), client);
            }

            info!("Endpoint {} started.", id);
        }

        self.shared
            .stats
            .set_active_services(self.shared.endpoints.len());

        self.handles
            .push(tokio::spawn(dispatch::runner(rx, self.shared.clone())));
        self.handles.push(tokio::spawn(housekeeping(
            self.shared.clone(),
            self.token.child_token(),
        )));

        info!(
            "Hub started with {} endpoints.",
            self.shared.endpoints.len(),
        );
        Ok(())
    }

    /// Offers a frame to the hub channel on behalf of an external
    /// producer.
    ///
    /// Returns `false` once the hub is shutting down.
    pub async fn inject(&self, frame: AudioFrame) -> bool {
        match &self.tx {
            Some(tx) => tx.send_async(frame).await.is_ok(),
            None => false,
        }
    }

    /// Takes the channel pair an external client drives for an opaque
    /// endpoint (currently Discord). Each pair can be taken once.
    pub fn client_channels(&mut self, id: &str) -> Option<ClientChannels> {
        self.clients.remove(id)
    }

    /// A stream of typed DTMF control events from every endpoint.
    #[must_use]
    pub fn dtmf_events(&self) -> Receiver<DtmfEvent> {
        self.dtmf_rx.clone()
    }

    /// Point-in-time statistics for the status surface.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let stats = &self.shared.stats;
        let mut endpoints: Vec<EndpointSnapshot> = self
            .shared
            .endpoints
            .iter()
            .map(|entry| {
                let ep = entry.value();
                EndpointSnapshot::new(
                    ep.config.id.clone(),
                    ep.config.kind.as_str(),
                    ep.config.enabled,
                    &ep.stats,
                )
            })
            .collect();
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));

        StatsSnapshot {
            uptime_secs: stats.uptime_secs(),
            total_messages: stats.total_messages(),
            routed_messages: stats.routed_messages(),
            dropped_messages: stats.dropped_messages(),
            conversion_errors: stats.conversion_errors(),
            active_services: self.shared.endpoints.len(),
            active_transmissions: self.shared.transmissions.snapshot(),
            endpoints,
        }
    }

    /// Cancels every worker and waits for the hub to drain.
    ///
    /// Workers observe cancellation within one ingress deadline; the
    /// dispatcher exits once the last producer handle is gone and the
    /// channel is empty.
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) {
        info!("Hub shutting down.");
        self.token.cancel();
        self.tx = None;
        self.clients.clear();

        for handle in self.handles.drain(..) {
            drop(handle.await);
        }

        trace!("All workers returned.");
    }
}

/// Periodic sweep of expired transmissions.
async fn housekeeping(shared: Arc<Shared>, token: CancellationToken) {
    let mut tick = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = tick.tick() => {
                let active = shared.transmissions.sweep();
                shared.stats.set_active_transmissions(active);
                trace!("Housekeeping: {} transmissions active.", active);
            },
        }
    }
}
