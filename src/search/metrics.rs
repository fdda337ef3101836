//! Prometheus metrics for the search module

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Gauge,
    HistogramVec,
};

/// Indexing and query metrics
pub struct SearchMetrics {
    /// Batches committed or rolled back, by type and outcome
    pub batches_total: CounterVec,

    /// Records applied in committed batches, by type and operation
    pub records_total: CounterVec,

    /// Batches waiting for the indexing thread
    pub queue_depth: Gauge,

    /// Commit duration in seconds
    pub commit_duration: HistogramVec,

    /// Writer rebuilds after the index reported itself closed
    pub recoveries_total: CounterVec,

    /// Executed queries by kind
    pub queries_total: CounterVec,
}

impl SearchMetrics {
    pub fn new() -> Self {
        Self {
            batches_total: register_counter_vec!(
                "newsdesk_index_batches_total",
                "Total number of index batches processed",
                &["type_name", "outcome"]
            )
            .unwrap(),

            records_total: register_counter_vec!(
                "newsdesk_index_records_total",
                "Total number of records applied to the index",
                &["type_name", "operation"]
            )
            .unwrap(),

            queue_depth: register_gauge!(
                "newsdesk_index_queue_depth",
                "Number of batches waiting for the indexing thread"
            )
            .unwrap(),

            commit_duration: register_histogram_vec!(
                "newsdesk_index_commit_duration_seconds",
                "Index commit duration in seconds",
                &["type_name"],
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
            )
            .unwrap(),

            recoveries_total: register_counter_vec!(
                "newsdesk_index_recoveries_total",
                "Total number of index rebuilds after an already-closed failure",
                &["operation"]
            )
            .unwrap(),

            queries_total: register_counter_vec!(
                "newsdesk_search_queries_total",
                "Total number of executed search queries",
                &["kind"]
            )
            .unwrap(),
        }
    }

    pub fn record_batch(&self, type_name: &str, committed: bool) {
        let outcome = if committed { "committed" } else { "rolled_back" };
        self.batches_total
            .with_label_values(&[type_name, outcome])
            .inc();
    }

    pub fn record_commit(&self, type_name: &str, duration_secs: f64) {
        self.commit_duration
            .with_label_values(&[type_name])
            .observe(duration_secs);
    }
}

impl Default for SearchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// Global search metrics instance
    pub static ref SEARCH_METRICS: SearchMetrics = SearchMetrics::new();
}

/// Initialize search metrics (idempotent)
pub fn init_search_metrics() {
    lazy_static::initialize(&SEARCH_METRICS);
}
