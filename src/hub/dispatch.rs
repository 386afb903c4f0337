//! The single-consumer routing loop.
//!
//! One task drains the hub channel, so per-source frame order survives
//! end-to-end for every destination. Nothing in this loop blocks:
//! destination handoff is `try_send` onto each endpoint's bounded
//! egress queue, and all transcoding happens on the destination side.

use super::{router, Shared};
use crate::{frame::AudioFrame, hub::transmissions::Admission};
use flume::{Receiver, TrySendError};
use std::sync::Arc;
use tracing::{instrument, trace};

struct Dispatcher {
    rx: Receiver<AudioFrame>,
    shared: Arc<Shared>,
}

impl Dispatcher {
    async fn run(&mut self) {
        while let Ok(frame) = self.rx.recv_async().await {
            self.route(frame);
        }
    }

    fn route(&self, frame: AudioFrame) {
        let stats = &self.shared.stats;
        stats.add_total();

        if self.shared.transmissions.admit(&frame) == Admission::Rejected {
            stats.add_dropped();
            stats.set_active_transmissions(self.shared.transmissions.active());
            return;
        }
        stats.set_active_transmissions(self.shared.transmissions.active());

        let source = self
            .shared
            .endpoints
            .get(&frame.source_id)
            .map(|entry| entry.config.clone());

        let mut accepted = 0usize;
        for entry in self.shared.endpoints.iter() {
            let endpoint = entry.value();
            if !router::eligible(
                &frame,
                self.shared.config.default_routing,
                source.as_deref(),
                &endpoint.config,
            ) {
                continue;
            }

            let Some(egress) = &endpoint.egress_tx else {
                continue;
            };

            match egress.try_send(frame.clone()) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_)) => {
                    trace!("Egress queue for {} full; frame skipped.", endpoint.config.id);
                    endpoint.stats.add_error();
                },
                Err(TrySendError::Disconnected(_)) => {
                    endpoint.stats.add_error();
                },
            }
        }

        if accepted > 0 {
            stats.add_routed();
        } else {
            stats.add_dropped();
        }
    }
}

/// Runs the dispatcher until the hub channel closes and drains.
#[instrument(skip_all)]
pub(crate) async fn runner(rx: Receiver<AudioFrame>, shared: Arc<Shared>) {
    trace!("Hub dispatcher started.");

    let mut dispatcher = Dispatcher { rx, shared };
    dispatcher.run().await;

    trace!("Hub dispatcher stopped.");
}
