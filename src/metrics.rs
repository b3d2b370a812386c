/// Metrics Module - Prometheus Instrumentation
///
/// - Store request counters and latency by operation
/// - Reversal outcomes, deleted claims and refunded points
/// - Text exposition for `--print-metrics`

use prometheus::{
    Registry, IntCounter, IntCounterVec, Counter, HistogramVec,
    HistogramOpts, Opts, Encoder, TextEncoder,
};
use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use std::time::Instant;

/// Standard latency buckets for histograms (seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

static REGISTERED: OnceCell<()> = OnceCell::new();

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // 1. STORE REQUESTS
    // ========================================================================

    /// Store requests by operation and result
    /// Labels: op (begin, get, query, commit, rollback, token), result (ok, error)
    pub static ref STORE_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("rewardtools_store_requests_total", "Document store requests by operation"),
        &["op", "result"]
    ).unwrap();

    /// Store request latency
    /// Labels: op
    pub static ref STORE_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("rewardtools_store_request_duration_seconds", "Document store request latency")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["op"]
    ).unwrap();

    // ========================================================================
    // 2. REVERSALS
    // ========================================================================

    /// Reversal attempts by outcome
    /// Labels: outcome (committed, dry_run, not_found, already_unused, owner_unresolved, store_error)
    pub static ref REVERSALS: IntCounterVec = IntCounterVec::new(
        Opts::new("rewardtools_reversals_total", "Reward reversals by outcome"),
        &["outcome"]
    ).unwrap();

    /// Claim records deleted by committed reversals
    pub static ref CLAIMS_DELETED: IntCounter = IntCounter::new(
        "rewardtools_claims_deleted_total",
        "Claim records deleted by committed reversals"
    ).unwrap();

    /// Points refunded by committed reversals
    pub static ref POINTS_REFUNDED: Counter = Counter::new(
        "rewardtools_points_refunded_total",
        "Points refunded to users by committed reversals"
    ).unwrap();
}

/// Registers all metrics with the global registry.
/// Safe to call more than once.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTERED.get_or_try_init(|| {
        REGISTRY.register(Box::new(STORE_REQUESTS.clone()))?;
        REGISTRY.register(Box::new(STORE_REQUEST_DURATION.clone()))?;
        REGISTRY.register(Box::new(REVERSALS.clone()))?;
        REGISTRY.register(Box::new(CLAIMS_DELETED.clone()))?;
        REGISTRY.register(Box::new(POINTS_REFUNDED.clone()))?;
        Ok::<(), prometheus::Error>(())
    })?;
    Ok(())
}

/// Gather metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Timer for measuring durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Record one store request
pub fn record_store_request(op: &str, ok: bool, duration_secs: f64) {
    let result = if ok { "ok" } else { "error" };
    STORE_REQUESTS.with_label_values(&[op, result]).inc();
    STORE_REQUEST_DURATION.with_label_values(&[op]).observe(duration_secs);
}

/// Record the outcome of a reversal attempt
pub fn record_reversal(outcome: &str) {
    REVERSALS.with_label_values(&[outcome]).inc();
}

/// Record what a committed reversal changed
pub fn record_committed_reversal(claims_deleted: usize, points: f64) {
    CLAIMS_DELETED.inc_by(claims_deleted as u64);
    // Counters only go up; negative refunds are not tracked here.
    if points > 0.0 {
        POINTS_REFUNDED.inc_by(points);
    }
}
