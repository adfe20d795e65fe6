//! Per-execution KPI sample buffering
//!
//! Buffers time-series KPI samples for in-flight executions so the
//! verification phase can assess impact. Each execution gets a bounded
//! circular buffer; memory stays O(active executions x buffer cap)
//! regardless of how many samples were ever collected.

use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::debug;

use crate::types::{ExecutionId, KpiSnapshot};

/// Buffers KPI samples for in-flight executions
pub struct FeedbackController {
    buffers: DashMap<ExecutionId, VecDeque<KpiSnapshot>>,
    cap: usize,
}

impl FeedbackController {
    /// Create a controller with the given per-execution buffer capacity
    #[inline]
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            cap: cap.max(1),
        }
    }

    /// Open a buffer for the execution; idempotent
    pub fn start_collection(&self, id: ExecutionId) {
        self.buffers.entry(id).or_default();
        debug!(execution = %id, "feedback collection started");
    }

    /// Close the buffer and return everything collected, oldest first
    pub fn stop_collection(&self, id: ExecutionId) -> VecDeque<KpiSnapshot> {
        let samples = self
            .buffers
            .remove(&id)
            .map(|(_, samples)| samples)
            .unwrap_or_default();
        debug!(execution = %id, samples = samples.len(), "feedback collection stopped");
        samples
    }

    /// Append one sample, evicting the oldest at capacity
    ///
    /// Samples for unknown executions are dropped; collection must have
    /// been started during preparation.
    pub fn record(&self, id: ExecutionId, snapshot: KpiSnapshot) {
        if let Some(mut buffer) = self.buffers.get_mut(&id) {
            if buffer.len() == self.cap {
                buffer.pop_front();
            }
            buffer.push_back(snapshot);
        }
    }

    /// Snapshot of the samples collected so far, oldest first
    #[must_use]
    pub fn samples(&self, id: ExecutionId) -> Vec<KpiSnapshot> {
        self.buffers
            .get(&id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of open buffers
    #[inline]
    #[must_use]
    pub fn open_collections(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample(value: f64) -> KpiSnapshot {
        let mut kpis = HashMap::new();
        kpis.insert("throughput_mbps".to_string(), value);
        KpiSnapshot::now(kpis)
    }

    #[test]
    fn records_in_order() {
        let controller = FeedbackController::new(10);
        let id = ExecutionId::new();
        controller.start_collection(id);

        for i in 0..3 {
            controller.record(id, sample(f64::from(i)));
        }

        let samples = controller.samples(id);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].get("throughput_mbps"), Some(0.0));
        assert_eq!(samples[2].get("throughput_mbps"), Some(2.0));
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let controller = FeedbackController::new(5);
        let id = ExecutionId::new();
        controller.start_collection(id);

        for i in 0..12 {
            controller.record(id, sample(f64::from(i)));
        }

        let samples = controller.samples(id);
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0].get("throughput_mbps"), Some(7.0));
        assert_eq!(samples[4].get("throughput_mbps"), Some(11.0));
    }

    #[test]
    fn samples_without_collection_are_dropped() {
        let controller = FeedbackController::new(5);
        let id = ExecutionId::new();

        controller.record(id, sample(1.0));
        assert!(controller.samples(id).is_empty());
        assert_eq!(controller.open_collections(), 0);
    }

    #[test]
    fn stop_drains_the_buffer() {
        let controller = FeedbackController::new(5);
        let id = ExecutionId::new();
        controller.start_collection(id);
        controller.record(id, sample(1.0));

        let drained = controller.stop_collection(id);
        assert_eq!(drained.len(), 1);
        assert_eq!(controller.open_collections(), 0);

        // Stopping again is harmless.
        assert!(controller.stop_collection(id).is_empty());
    }
}
