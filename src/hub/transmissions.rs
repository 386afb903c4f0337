//! The table of in-flight PTT sessions, and the policy deciding which
//! frames may hold one.

use crate::{config::Config, frame::AudioFrame, hub::stats::TransmissionSnapshot};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::debug;

/// One keyed transmission, tracked by source id.
#[derive(Clone, Debug)]
struct ActiveTransmission {
    priority: u8,
    last_seen: Instant,
}

/// Outcome of offering a frame to the table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    /// The frame may be routed.
    Routed,
    /// The concurrency cap held and the frame must be dropped.
    Rejected,
}

/// Tracks keyed sources and enforces the concurrency cap with optional
/// priority preemption.
///
/// The lock is held only for constant-time map work; nothing here blocks.
#[derive(Debug)]
pub struct TransmissionTable {
    entries: Mutex<HashMap<String, ActiveTransmission>>,
    max_concurrent: usize,
    timeout: Duration,
    priority_rules: bool,
}

impl TransmissionTable {
    /// Builds the table from hub configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_concurrent: config.max_concurrent_tx,
            timeout: config.tx_timeout(),
            priority_rules: config.enable_priority_rules,
        }
    }

    /// Offers a frame to the table, applying expiry, the cap, and
    /// preemption. Called for every frame the dispatcher sees.
    pub fn admit(&self, frame: &AudioFrame) -> Admission {
        self.admit_at(frame, Instant::now())
    }

    fn admit_at(&self, frame: &AudioFrame, now: Instant) -> Admission {
        let mut entries = self.entries.lock();

        // Expiry sweep happens on every call, so a stale entry can never
        // hold a slot against a live talker.
        entries.retain(|_, tx| now.duration_since(tx.last_seen) < self.timeout);

        if !frame.ptt_active {
            // Explicit unkey ends the session; the frame itself routes.
            if entries.remove(&frame.source_id).is_some() {
                debug!("Transmission from {} unkeyed.", frame.source_id);
            }
            return Admission::Routed;
        }

        if let Some(tx) = entries.get_mut(&frame.source_id) {
            // Already keyed: refresh and pass.
            tx.last_seen = now;
            tx.priority = frame.priority;
            return Admission::Routed;
        }

        if entries.len() >= self.max_concurrent {
            // Preemption admits above the cap without evicting: the
            // superseded session ends by unkey or expiry.
            let preempts = self.priority_rules
                && entries.values().any(|tx| tx.priority < frame.priority);

            if !preempts {
                debug!(
                    "Transmission from {} rejected: {} active.",
                    frame.source_id,
                    entries.len(),
                );
                return Admission::Rejected;
            }

            debug!(
                "Transmission from {} preempts at priority {}.",
                frame.source_id, frame.priority,
            );
        }

        entries.insert(
            frame.source_id.clone(),
            ActiveTransmission {
                priority: frame.priority,
                last_seen: now,
            },
        );

        Admission::Routed
    }

    /// Removes entries idle past the timeout; the housekeeping tick.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, tx| now.duration_since(tx.last_seen) < self.timeout);
        entries.len()
    }

    /// Number of currently keyed sources.
    #[must_use]
    pub fn active(&self) -> usize {
        self.entries.lock().len()
    }

    /// Point-in-time view of every keyed source.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TransmissionSnapshot> {
        let now = Instant::now();
        let mut out: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(id, tx)| TransmissionSnapshot {
                source_id: id.clone(),
                age_secs: now.duration_since(tx.last_seen).as_secs(),
                priority: tx.priority,
            })
            .collect();
        out.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceType;
    use bytes::Bytes;

    fn keyed_frame(source: &str, priority: u8) -> AudioFrame {
        let mut frame = AudioFrame::pcm(source, ServiceType::Usrp, Bytes::new());
        frame.ptt_active = true;
        frame.priority = priority;
        frame
    }

    fn table(cap: usize, priorities: bool) -> TransmissionTable {
        let config = Config::default()
            .max_concurrent_tx(cap)
            .enable_priority_rules(priorities);
        TransmissionTable::new(&config)
    }

    #[test]
    fn cap_rejects_overflow() {
        let table = table(2, false);

        assert_eq!(table.admit(&keyed_frame("a", 0)), Admission::Routed);
        assert_eq!(table.admit(&keyed_frame("b", 0)), Admission::Routed);
        assert_eq!(table.admit(&keyed_frame("c", 0)), Admission::Rejected);
        assert_eq!(table.active(), 2);
    }

    #[test]
    fn existing_talker_refreshes_through_cap() {
        let table = table(1, false);

        assert_eq!(table.admit(&keyed_frame("a", 0)), Admission::Routed);
        assert_eq!(table.admit(&keyed_frame("a", 0)), Admission::Routed);
        assert_eq!(table.active(), 1);
    }

    #[test]
    fn preemption_admits_above_cap() {
        let table = table(1, true);

        assert_eq!(table.admit(&keyed_frame("a", 3)), Admission::Routed);
        assert_eq!(table.admit(&keyed_frame("b", 7)), Admission::Routed);
        // Both sessions live through the transient.
        assert_eq!(table.active(), 2);
    }

    #[test]
    fn equal_priority_does_not_preempt() {
        let table = table(1, true);

        assert_eq!(table.admit(&keyed_frame("a", 7)), Admission::Routed);
        assert_eq!(table.admit(&keyed_frame("b", 7)), Admission::Rejected);
    }

    #[test]
    fn preemption_needs_priority_rules() {
        let table = table(1, false);

        assert_eq!(table.admit(&keyed_frame("a", 3)), Admission::Routed);
        assert_eq!(table.admit(&keyed_frame("b", 7)), Admission::Rejected);
    }

    #[test]
    fn unkey_frees_the_slot_and_routes() {
        let table = table(1, false);

        assert_eq!(table.admit(&keyed_frame("a", 0)), Admission::Routed);

        let mut unkey = keyed_frame("a", 0);
        unkey.ptt_active = false;
        assert_eq!(table.admit(&unkey), Admission::Routed);
        assert_eq!(table.active(), 0);

        assert_eq!(table.admit(&keyed_frame("b", 0)), Admission::Routed);
    }

    #[test]
    fn unkeyed_frames_always_route() {
        let table = table(1, false);
        assert_eq!(table.admit(&keyed_frame("a", 0)), Admission::Routed);

        let mut idle = keyed_frame("b", 0);
        idle.ptt_active = false;
        assert_eq!(table.admit(&idle), Admission::Routed);
    }

    #[test]
    fn expiry_sweep_frees_slots() {
        let config = Config::default().max_concurrent_tx(1).tx_timeout_seconds(0);
        let table = TransmissionTable::new(&config);

        // Zero timeout: the entry is stale by the time the next call sweeps.
        assert_eq!(table.admit(&keyed_frame("a", 0)), Admission::Routed);
        assert_eq!(table.admit(&keyed_frame("b", 0)), Admission::Routed);
        assert_eq!(table.sweep(), 0);
    }

    #[test]
    fn snapshot_reports_ages_and_priorities() {
        let table = table(3, true);
        table.admit(&keyed_frame("b", 2));
        table.admit(&keyed_frame("a", 5));

        let snap = table.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].source_id, "a");
        assert_eq!(snap[0].priority, 5);
        assert_eq!(snap[1].source_id, "b");
    }
}
