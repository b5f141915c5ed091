//! Metrics collection and export module

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Anchor / simulation counters
    pub anchors_fetched: IntCounter,
    pub anchor_fetch_failures: IntCounter,
    pub simulations: IntCounter,
    pub simulation_failures: IntCounter,

    // Broadcast counters
    pub submissions_total: IntCounter,
    pub submission_attempts: IntCounter,
    pub submission_retries: IntCounter,
    pub submission_rejections: IntCounter,
    pub broadcast_exhausted: IntCounter,
    pub dedupe_hits: IntCounter,
    pub expired_before_send: IntCounter,

    // Confirmation counters
    pub confirmations_total: IntCounter,
    pub confirmations_expired: IntCounter,
    pub execution_errors: IntCounter,
    pub confirmation_timeouts: IntCounter,

    // Gauges
    pub pending_confirmations: IntGauge,

    // Histograms
    pub broadcast_latency: Histogram,
    pub confirmation_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let anchors_fetched = IntCounter::with_opts(Opts::new(
            "anchors_fetched_total",
            "Number of anchors fetched from the ledger",
        ))?;

        let anchor_fetch_failures = IntCounter::with_opts(Opts::new(
            "anchor_fetch_failures_total",
            "Number of failed anchor fetches",
        ))?;

        let simulations =
            IntCounter::with_opts(Opts::new("simulations_total", "Number of simulations run"))?;

        let simulation_failures = IntCounter::with_opts(Opts::new(
            "simulation_failures_total",
            "Number of simulations reporting an execution error",
        ))?;

        let submissions_total = IntCounter::with_opts(Opts::new(
            "submissions_total",
            "Number of envelopes handed to the broadcaster",
        ))?;

        let submission_attempts = IntCounter::with_opts(Opts::new(
            "submission_attempts_total",
            "Number of send calls across all tiers",
        ))?;

        let submission_retries = IntCounter::with_opts(Opts::new(
            "submission_retries_total",
            "Number of send retries after transient failures",
        ))?;

        let submission_rejections = IntCounter::with_opts(Opts::new(
            "submission_rejections_total",
            "Number of envelopes rejected by a tier",
        ))?;

        let broadcast_exhausted = IntCounter::with_opts(Opts::new(
            "broadcast_exhausted_total",
            "Number of submissions where every tier ran out of retries",
        ))?;

        let dedupe_hits = IntCounter::with_opts(Opts::new(
            "dedupe_hits_total",
            "Number of re-submissions answered from the dedupe window",
        ))?;

        let expired_before_send = IntCounter::with_opts(Opts::new(
            "expired_before_send_total",
            "Number of submissions refused because the anchor had already expired",
        ))?;

        let confirmations_total = IntCounter::with_opts(Opts::new(
            "confirmations_total",
            "Number of envelopes that reached their target durability",
        ))?;

        let confirmations_expired = IntCounter::with_opts(Opts::new(
            "confirmations_expired_total",
            "Number of envelopes whose anchor expired before inclusion",
        ))?;

        let execution_errors = IntCounter::with_opts(Opts::new(
            "execution_errors_total",
            "Number of included envelopes that failed on-chain",
        ))?;

        let confirmation_timeouts = IntCounter::with_opts(Opts::new(
            "confirmation_timeouts_total",
            "Number of confirmations abandoned on a wall-clock timeout",
        ))?;

        let pending_confirmations = IntGauge::with_opts(Opts::new(
            "pending_confirmations",
            "Number of envelopes currently being tracked",
        ))?;

        let broadcast_latency = Histogram::with_opts(
            HistogramOpts::new("broadcast_latency_seconds", "Time until a tier accepted the envelope")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        )?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from submission until the target durability was observed",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(anchors_fetched.clone()))?;
        registry.register(Box::new(anchor_fetch_failures.clone()))?;
        registry.register(Box::new(simulations.clone()))?;
        registry.register(Box::new(simulation_failures.clone()))?;
        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(submission_attempts.clone()))?;
        registry.register(Box::new(submission_retries.clone()))?;
        registry.register(Box::new(submission_rejections.clone()))?;
        registry.register(Box::new(broadcast_exhausted.clone()))?;
        registry.register(Box::new(dedupe_hits.clone()))?;
        registry.register(Box::new(expired_before_send.clone()))?;
        registry.register(Box::new(confirmations_total.clone()))?;
        registry.register(Box::new(confirmations_expired.clone()))?;
        registry.register(Box::new(execution_errors.clone()))?;
        registry.register(Box::new(confirmation_timeouts.clone()))?;
        registry.register(Box::new(pending_confirmations.clone()))?;
        registry.register(Box::new(broadcast_latency.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;

        Ok(Self {
            registry,
            anchors_fetched,
            anchor_fetch_failures,
            simulations,
            simulation_failures,
            submissions_total,
            submission_attempts,
            submission_retries,
            submission_rejections,
            broadcast_exhausted,
            dedupe_hits,
            expired_before_send,
            confirmations_total,
            confirmations_expired,
            execution_errors,
            confirmation_timeouts,
            pending_confirmations,
            broadcast_latency,
            confirmation_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
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

/// Decrements `pending_confirmations` when dropped, including on cancellation
pub(crate) struct PendingGuard;

impl PendingGuard {
    pub(crate) fn enter() -> Self {
        metrics().pending_confirmations.inc();
        Self
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        metrics().pending_confirmations.dec();
    }
}
