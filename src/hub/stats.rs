//! Atomic counters sampled by the status surface.
#![allow(missing_docs)]

use crate::frame::now_ms;
use serde::Serialize;
use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Instant,
};

/// Counters shared by the whole hub.
#[derive(Debug)]
pub struct HubStats {
    total: AtomicU64,
    routed: AtomicU64,
    dropped: AtomicU64,
    conversion_errors: AtomicU64,
    active_services: AtomicUsize,
    active_transmissions: AtomicUsize,
    started: Instant,
}

impl Default for HubStats {
    fn default() -> Self {
        Self {
            total: AtomicU64::new(0),
            routed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            conversion_errors: AtomicU64::new(0),
            active_services: AtomicUsize::new(0),
            active_transmissions: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }
}

impl HubStats {
    #[inline]
    pub fn add_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_conversion_error(&self) {
        self.conversion_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_active_services(&self, n: usize) {
        self.active_services.store(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_active_transmissions(&self, n: usize) {
        self.active_transmissions.store(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn total_messages(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn routed_messages(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn conversion_errors(&self) -> u64 {
        self.conversion_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Counters kept per endpoint.
#[derive(Debug, Default)]
pub struct EndpointStats {
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    errors: AtomicU64,
    /// Milliseconds since the Unix epoch; zero until first activity.
    last_activity_ms: AtomicU64,
}

impl EndpointStats {
    #[inline]
    pub fn add_in(&self, bytes: usize) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn add_out(&self, bytes: usize) {
        self.messages_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[inline]
    fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    fn snapshot(&self) -> EndpointCounters {
        EndpointCounters {
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_activity_ms: self.last_activity_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of one endpoint's counters.
#[derive(Clone, Debug, Serialize)]
pub struct EndpointCounters {
    /// Frames accepted from the wire.
    pub messages_in: u64,
    /// Frames delivered to the wire.
    pub messages_out: u64,
    /// Bytes accepted from the wire.
    pub bytes_in: u64,
    /// Bytes delivered to the wire.
    pub bytes_out: u64,
    /// Per-frame errors charged to this endpoint.
    pub errors: u64,
    /// Last traffic, milliseconds since the Unix epoch; zero when idle
    /// since startup.
    pub last_activity_ms: u64,
}

/// Point-in-time view of one endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct EndpointSnapshot {
    /// Endpoint id.
    pub id: String,
    /// Service flavour, as its stable name.
    pub kind: &'static str,
    /// Whether the endpoint is enabled.
    pub enabled: bool,
    /// The endpoint's counters.
    pub counters: EndpointCounters,
}

impl EndpointSnapshot {
    pub(crate) fn new(
        id: String,
        kind: &'static str,
        enabled: bool,
        stats: &EndpointStats,
    ) -> Self {
        Self {
            id,
            kind,
            enabled,
            counters: stats.snapshot(),
        }
    }
}

/// Point-in-time view of one active transmission.
#[derive(Clone, Debug, Serialize)]
pub struct TransmissionSnapshot {
    /// Keyed source id.
    pub source_id: String,
    /// Seconds since the source last refreshed its key-up.
    pub age_secs: u64,
    /// Priority the transmission was admitted with.
    pub priority: u8,
}

/// The read-only view handed to the status surface.
#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    /// Seconds since the hub started.
    pub uptime_secs: u64,
    /// Frames which entered the hub channel.
    pub total_messages: u64,
    /// Frames delivered to at least one destination.
    pub routed_messages: u64,
    /// Frames which reached no destination.
    pub dropped_messages: u64,
    /// Transcode failures and timeouts.
    pub conversion_errors: u64,
    /// Enabled endpoints at startup.
    pub active_services: usize,
    /// Currently keyed transmissions.
    pub active_transmissions: Vec<TransmissionSnapshot>,
    /// Per-endpoint views.
    pub endpoints: Vec<EndpointSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_counters_accumulate() {
        let stats = EndpointStats::default();
        stats.add_in(100);
        stats.add_in(50);
        stats.add_out(352);
        stats.add_error();

        let snap = stats.snapshot();
        assert_eq!(snap.messages_in, 2);
        assert_eq!(snap.bytes_in, 150);
        assert_eq!(snap.messages_out, 1);
        assert_eq!(snap.bytes_out, 352);
        assert_eq!(snap.errors, 1);
        assert!(snap.last_activity_ms > 0);
    }

    #[test]
    fn snapshot_serialises() {
        let snap = StatsSnapshot {
            uptime_secs: 1,
            total_messages: 10,
            routed_messages: 8,
            dropped_messages: 2,
            conversion_errors: 0,
            active_services: 3,
            active_transmissions: vec![TransmissionSnapshot {
                source_id: "usrp_0".into(),
                age_secs: 4,
                priority: 3,
            }],
            endpoints: vec![],
        };

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["routed_messages"], 8);
        assert_eq!(json["active_transmissions"][0]["source_id"], "usrp_0");
    }
}
