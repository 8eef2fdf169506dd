//! Prometheus metrics for the search pipeline.

use std::sync::Arc;

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get or initialize the global metrics instance.
pub fn get_metrics() -> Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new())).clone()
}

/// Latency buckets from 1ms to 30s.
fn latency_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
}

/// All metrics for the search service.
pub struct Metrics {
    pub registry: Registry,

    /// Total number of search requests served.
    pub search_requests_total: IntCounter,
    /// Total number of refine-mode requests served.
    pub refine_requests_total: IntCounter,
    /// Branches that failed and were swallowed to empty.
    pub branch_failures_total: IntCounter,
    /// Embedding cache hits across both tiers.
    pub embedding_cache_hits_total: IntCounter,
    /// Embedding cache misses that reached the back-end.
    pub embedding_cache_misses_total: IntCounter,
    /// Reranker calls that timed out and fell back.
    pub rerank_timeouts_total: IntCounter,

    /// End-to-end search duration in seconds.
    pub search_duration_seconds: Histogram,
    /// Embedding back-end call duration in seconds.
    pub embedding_duration_seconds: Histogram,
    /// Rerank call duration in seconds.
    pub rerank_duration_seconds: Histogram,
    /// Query expansion duration in seconds.
    pub expansion_duration_seconds: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let search_requests_total = IntCounter::new(
            "kashshaf_search_requests_total",
            "Total number of search requests served",
        )
        .expect("failed to create counter");
        let refine_requests_total = IntCounter::new(
            "kashshaf_refine_requests_total",
            "Total number of refine-mode requests served",
        )
        .expect("failed to create counter");
        let branch_failures_total = IntCounter::new(
            "kashshaf_branch_failures_total",
            "Pipeline branches that failed and returned empty",
        )
        .expect("failed to create counter");
        let embedding_cache_hits_total = IntCounter::new(
            "kashshaf_embedding_cache_hits_total",
            "Embedding cache hits across both tiers",
        )
        .expect("failed to create counter");
        let embedding_cache_misses_total = IntCounter::new(
            "kashshaf_embedding_cache_misses_total",
            "Embedding cache misses that reached the back-end",
        )
        .expect("failed to create counter");
        let rerank_timeouts_total = IntCounter::new(
            "kashshaf_rerank_timeouts_total",
            "Reranker calls that timed out and fell back",
        )
        .expect("failed to create counter");

        let search_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "kashshaf_search_duration_seconds",
                "End-to-end search duration",
            )
            .buckets(latency_buckets()),
        )
        .expect("failed to create histogram");
        let embedding_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "kashshaf_embedding_duration_seconds",
                "Embedding back-end call duration",
            )
            .buckets(latency_buckets()),
        )
        .expect("failed to create histogram");
        let rerank_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("kashshaf_rerank_duration_seconds", "Rerank call duration")
                .buckets(latency_buckets()),
        )
        .expect("failed to create histogram");
        let expansion_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "kashshaf_expansion_duration_seconds",
                "Query expansion duration",
            )
            .buckets(latency_buckets()),
        )
        .expect("failed to create histogram");

        for collector in [
            Box::new(search_requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(refine_requests_total.clone()),
            Box::new(branch_failures_total.clone()),
            Box::new(embedding_cache_hits_total.clone()),
            Box::new(embedding_cache_misses_total.clone()),
            Box::new(rerank_timeouts_total.clone()),
            Box::new(search_duration_seconds.clone()),
            Box::new(embedding_duration_seconds.clone()),
            Box::new(rerank_duration_seconds.clone()),
            Box::new(expansion_duration_seconds.clone()),
        ] {
            registry
                .register(collector)
                .expect("failed to register metric");
        }

        Self {
            registry,
            search_requests_total,
            refine_requests_total,
            branch_failures_total,
            embedding_cache_hits_total,
            embedding_cache_misses_total,
            rerank_timeouts_total,
            search_duration_seconds,
            embedding_duration_seconds,
            rerank_duration_seconds,
            expansion_duration_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let metrics = Metrics::new();
        metrics.search_requests_total.inc();
        assert_eq!(metrics.search_requests_total.get(), 1);
    }

    #[test]
    fn test_global_instance_is_shared() {
        let a = get_metrics();
        let b = get_metrics();
        a.branch_failures_total.inc();
        assert!(b.branch_failures_total.get() >= 1);
    }
}
