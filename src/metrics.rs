//! Lightweight atomic counters and gauges for the dispatch loop, scoped to
//! one `Application` instance rather than process-wide statics — exposed as
//! a snapshot struct rather than a push exporter, since shipping to an
//! external metrics backend is outside this crate's concerns.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    faulted: AtomicU64,
    data_item_syncs: AtomicU64,
    messages_delivered: AtomicU64,
    queue_depth_high_watermark: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Counters>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub dispatched: u64,
    pub faulted: u64,
    pub data_item_syncs: u64,
    pub messages_delivered: u64,
    pub queue_depth_high_watermark: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_dispatched(&self) {
        self.inner.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_faulted(&self) {
        self.inner.faulted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_data_item_syncs(&self) {
        self.inner.data_item_syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_messages_delivered_by(&self, n: u64) {
        self.inner.messages_delivered.fetch_add(n, Ordering::Relaxed);
    }

    /// Records an observed unscheduled-queue depth, updating the running
    /// high watermark if it is a new maximum.
    pub fn observe_queue_depth(&self, depth: usize) {
        self.inner.queue_depth_high_watermark.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            faulted: self.inner.faulted.load(Ordering::Relaxed),
            data_item_syncs: self.inner.data_item_syncs.load(Ordering::Relaxed),
            messages_delivered: self.inner.messages_delivered.load(Ordering::Relaxed),
            queue_depth_high_watermark: self.inner.queue_depth_high_watermark.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_clones() {
        let m = Metrics::new();
        let m2 = m.clone();
        m.inc_dispatched();
        m2.inc_dispatched();
        m.inc_faulted();
        assert_eq!(
            m.snapshot(),
            MetricsSnapshot {
                dispatched: 2,
                faulted: 1,
                data_item_syncs: 0,
                messages_delivered: 0,
                queue_depth_high_watermark: 0,
            }
        );
    }

    #[test]
    fn queue_depth_tracks_the_maximum_observed() {
        let m = Metrics::new();
        m.observe_queue_depth(3);
        m.observe_queue_depth(1);
        m.observe_queue_depth(7);
        assert_eq!(m.snapshot().queue_depth_high_watermark, 7);
    }
}
