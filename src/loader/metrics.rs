//! Prometheus metrics for the content loader

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Gauge,
    HistogramVec,
};

/// Content loader metrics collection
pub struct LoaderMetrics {
    /// Completed fetches by source type and outcome
    pub fetches_total: CounterVec,

    /// Fetch duration in seconds
    pub fetch_duration: HistogramVec,

    /// Sources waiting in the schedule
    pub schedule_size: Gauge,

    /// Fetched items waiting to be saved
    pub pending_items: Gauge,

    /// Saved items by upsert outcome
    pub saved_items_total: CounterVec,
}

impl LoaderMetrics {
    pub fn new() -> Self {
        Self {
            fetches_total: register_counter_vec!(
                "newsdesk_loader_fetches_total",
                "Total number of completed source fetches",
                &["source_type", "outcome"]
            )
            .unwrap(),

            fetch_duration: register_histogram_vec!(
                "newsdesk_loader_fetch_duration_seconds",
                "Source fetch duration in seconds",
                &["source_type"],
                vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
            )
            .unwrap(),

            schedule_size: register_gauge!(
                "newsdesk_loader_schedule_size",
                "Number of sources waiting in the fetch schedule"
            )
            .unwrap(),

            pending_items: register_gauge!(
                "newsdesk_loader_pending_items",
                "Number of fetched items waiting to be saved"
            )
            .unwrap(),

            saved_items_total: register_counter_vec!(
                "newsdesk_loader_saved_items_total",
                "Total number of fetched items handed to the store",
                &["outcome"]
            )
            .unwrap(),
        }
    }

    pub fn record_fetch(&self, source_type: &str, outcome: &str, duration_secs: f64) {
        self.fetches_total
            .with_label_values(&[source_type, outcome])
            .inc();
        self.fetch_duration
            .with_label_values(&[source_type])
            .observe(duration_secs);
    }
}

impl Default for LoaderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// Global loader metrics instance
    pub static ref LOADER_METRICS: LoaderMetrics = LoaderMetrics::new();
}

/// Initialize loader metrics (idempotent)
pub fn init_loader_metrics() {
    lazy_static::initialize(&LOADER_METRICS);
}
