//! Observability for the streaming pipeline
//!
//! Counts what the pipeline received, admitted, rejected and emitted, and
//! keeps a bounded sample of per-event processing latency.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core metrics for the VWAP pipeline.
pub struct PipelineMetrics {
    pub events_received: AtomicU64,
    pub events_admitted: AtomicU64,
    pub events_rejected: AtomicU64,
    pub results_emitted: AtomicU64,
    pub event_processing_ns: Mutex<LatencyTracker>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_admitted: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            results_emitted: AtomicU64::new(0),
            event_processing_ns: Mutex::new(LatencyTracker::new(1000)),
        }
    }

    pub fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an admitted event and how long the guard + window took.
    pub fn record_admitted(&self, latency_ns: u64) {
        self.events_admitted.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.event_processing_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    pub fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.results_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("events_received".to_string(), self.events_received.load(Ordering::Relaxed));
        m.insert("events_admitted".to_string(), self.events_admitted.load(Ordering::Relaxed));
        m.insert("events_rejected".to_string(), self.events_rejected.load(Ordering::Relaxed));
        m.insert("results_emitted".to_string(), self.results_emitted.load(Ordering::Relaxed));
        let latency = self
            .event_processing_ns
            .lock()
            .ok()
            .and_then(|tracker| tracker.percentiles([50, 99]));
        if let Some([p50, p99]) = latency {
            m.insert("event_processing_p50_ns".to_string(), p50);
            m.insert("event_processing_p99_ns".to_string(), p99);
        }
        m
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded ring of the most recent latency samples.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample, dropping the oldest once full.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Values at each requested percentile (0-100), sorting the samples once.
    pub fn percentiles<const N: usize>(&self, ps: [usize; N]) -> Option<[u64; N]> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let last = sorted.len() - 1;
        Some(ps.map(|p| sorted[p.min(100) * last / 100]))
    }
}
