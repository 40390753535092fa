//! Running counters for a [`ReflectorNode`][crate::node::ReflectorNode].
//!
//! Updated from the detection task and read from anywhere; every counter is
//! an independent relaxed atomic.

use std::sync::atomic::{AtomicU64, Ordering};

use reflector_types::ScanDiagnostics;
use serde::Serialize;

/// Lock-free counters shared between the node's tasks.
#[derive(Debug, Default)]
pub struct NodeStats {
    scans_received: AtomicU64,
    scans_processed: AtomicU64,
    scans_dropped: AtomicU64,
    malformed_scans: AtomicU64,
    clusters: AtomicU64,
    singletons_discarded: AtomicU64,
    trailing_runs_dropped: AtomicU64,
    nonconverged_fits: AtomicU64,
    reflectors: AtomicU64,
    clouds_sent: AtomicU64,
}

/// Point-in-time copy of [`NodeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub scans_received: u64,
    pub scans_processed: u64,
    /// Scans replaced in the depth-1 queue before the detector reached them.
    pub scans_dropped: u64,
    pub malformed_scans: u64,
    pub clusters: u64,
    pub singletons_discarded: u64,
    /// Scans whose last run touched the final reading and was not emitted.
    pub trailing_runs_dropped: u64,
    pub nonconverged_fits: u64,
    pub reflectors: u64,
    pub clouds_sent: u64,
}

impl NodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.scans_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, n: u64) {
        self.scans_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_cloud_sent(&self) {
        self.clouds_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one scan's diagnostics into the totals.
    pub fn record_detection(&self, diagnostics: &ScanDiagnostics, reflectors: usize) {
        self.scans_processed.fetch_add(1, Ordering::Relaxed);
        if diagnostics.malformed {
            self.malformed_scans.fetch_add(1, Ordering::Relaxed);
        }
        if diagnostics.trailing_run_dropped > 0 {
            self.trailing_runs_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.clusters
            .fetch_add(diagnostics.clusters as u64, Ordering::Relaxed);
        self.singletons_discarded
            .fetch_add(diagnostics.singletons_discarded as u64, Ordering::Relaxed);
        self.nonconverged_fits
            .fetch_add(diagnostics.nonconverged_fits as u64, Ordering::Relaxed);
        self.reflectors
            .fetch_add(reflectors as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            scans_received: load(&self.scans_received),
            scans_processed: load(&self.scans_processed),
            scans_dropped: load(&self.scans_dropped),
            malformed_scans: load(&self.malformed_scans),
            clusters: load(&self.clusters),
            singletons_discarded: load(&self.singletons_discarded),
            trailing_runs_dropped: load(&self.trailing_runs_dropped),
            nonconverged_fits: load(&self.nonconverged_fits),
            reflectors: load(&self.reflectors),
            clouds_sent: load(&self.clouds_sent),
        }
    }
}
