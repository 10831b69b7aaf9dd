//! Timing histograms and outcome counters for the translation flows.
//! Samples are kept in milliseconds in bounded windows; summaries report p50/p95/p99.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

const WINDOW: usize = 512;

pub mod metric_names {
    pub const TRANSLATE_DONE: &str = "t_translate_done";
    pub const EXPLANATION_FIRST_CHUNK: &str = "t_explanation_first_chunk";
    pub const EXPLANATION_DONE: &str = "t_explanation_done";
    pub const FULL_PARAGRAPH_DONE: &str = "t_full_paragraph_done";
    pub const LEXICAL_DONE: &str = "t_lexical_done";

    pub const CACHE_REUSED: &str = "cache_reused";
    pub const STALE_DROPPED: &str = "stale_dropped";
    pub const REQUEST_FAILED: &str = "request_failed";
}

/// Measures from creation until `finish`; dropping it records nothing.
pub struct TimingSpan {
    name: &'static str,
    started: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    pub fn finish(self) -> f64 {
        let ms = self.elapsed_ms();
        self.registry.record(self.name, ms);
        ms
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

#[derive(Default)]
struct Window {
    samples: VecDeque<f64>,
    total: u64,
}

impl Window {
    fn push(&mut self, value: f64) {
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.total += 1;
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub count: u64,
}

#[derive(Default)]
pub struct MetricsRegistry {
    timings: Mutex<HashMap<&'static str, Window>>,
    counters: Mutex<HashMap<&'static str, u64>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &'static str, ms: f64) {
        self.timings.lock().entry(name).or_default().push(ms);
        debug!(metric = name, ms, "timing recorded");
    }

    pub fn increment(&self, name: &'static str) {
        *self.counters.lock().entry(name).or_insert(0) += 1;
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            started: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        self.timings
            .lock()
            .iter()
            .map(|(name, window)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50_ms: window.percentile(50.0),
                        p95_ms: window.percentile(95.0),
                        p99_ms: window.percentile(99.0),
                        count: window.total,
                    },
                )
            })
            .collect()
    }
}
