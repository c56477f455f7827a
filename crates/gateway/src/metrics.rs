//! Verify-request counters exposed at `/metrics` (SPEC_FULL §10). Kept
//! separate from [`idg_replicator::DriverMetrics`], which tracks the
//! replication side only.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct VerifyMetrics {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
}

impl VerifyMetrics {
    pub fn record(&self, accepted: bool) {
        if accepted {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }
}
