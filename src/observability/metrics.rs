//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `cloudsql_proxy_operator_reconciliations_total` - Total number of reconciliations
//! - `cloudsql_proxy_operator_reconciliation_errors_total` - Total number of reconciliation errors
//! - `cloudsql_proxy_operator_reconciliation_duration_seconds` - Duration of reconciliations
//! - `cloudsql_proxy_operator_requeues_total` - Requeues by reason
//! - `cloudsql_proxy_operator_workload_updates_total` - Workload writes by kind
//! - `cloudsql_proxy_operator_update_conflicts_total` - Workload writes rejected with 409 Conflict
//! - `cloudsql_proxy_operator_matched_workloads` - Workloads selected by the last reconciled
//!   resource
//! - `cloudsql_proxy_operator_admission_reviews_total` - Admission reviews by webhook and outcome
//! - `cloudsql_proxy_operator_admission_duration_seconds` - Duration of admission reviews
//! - `cloudsql_proxy_operator_selector_parse_errors_total` - Label selectors that failed to parse
//! - `cloudsql_proxy_operator_invalid_resources_skipped_total` - Invalid resources left out of a
//!   mutation

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cloudsql_proxy_operator_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cloudsql_proxy_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "cloudsql_proxy_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloudsql_proxy_operator_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static WORKLOAD_UPDATES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloudsql_proxy_operator_workload_updates_total",
            "Total number of workload pod template updates by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create WORKLOAD_UPDATES_TOTAL metric - this should never happen")
});

static UPDATE_CONFLICTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cloudsql_proxy_operator_update_conflicts_total",
        "Total number of workload updates rejected with a resource version conflict",
    )
    .expect("Failed to create UPDATE_CONFLICTS_TOTAL metric - this should never happen")
});

static MATCHED_WORKLOADS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "cloudsql_proxy_operator_matched_workloads",
        "Number of workloads selected by the most recently reconciled resource",
    )
    .expect("Failed to create MATCHED_WORKLOADS metric - this should never happen")
});

static ADMISSION_REVIEWS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloudsql_proxy_operator_admission_reviews_total",
            "Total number of admission reviews by webhook and outcome",
        ),
        &["webhook", "outcome"],
    )
    .expect("Failed to create ADMISSION_REVIEWS_TOTAL metric - this should never happen")
});

static ADMISSION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "cloudsql_proxy_operator_admission_duration_seconds",
            "Duration of admission reviews in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["webhook"],
    )
    .expect("Failed to create ADMISSION_DURATION metric - this should never happen")
});

static SELECTOR_PARSE_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cloudsql_proxy_operator_selector_parse_errors_total",
        "Total number of label selectors that failed to parse during matching",
    )
    .expect("Failed to create SELECTOR_PARSE_ERRORS_TOTAL metric - this should never happen")
});

static INVALID_RESOURCES_SKIPPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cloudsql_proxy_operator_invalid_resources_skipped_total",
        "Total number of selecting resources left out of a mutation because they are invalid",
    )
    .expect("Failed to create INVALID_RESOURCES_SKIPPED_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKLOAD_UPDATES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPDATE_CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MATCHED_WORKLOADS.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_REVIEWS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_DURATION.clone()))?;
    REGISTRY.register(Box::new(SELECTOR_PARSE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_RESOURCES_SKIPPED_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_workload_updates(kind: &str) {
    WORKLOAD_UPDATES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_update_conflicts() {
    UPDATE_CONFLICTS_TOTAL.inc();
}

pub fn set_matched_workloads(count: usize) {
    MATCHED_WORKLOADS.set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn record_admission_review(webhook: &str, outcome: &str, duration: f64) {
    ADMISSION_REVIEWS_TOTAL
        .with_label_values(&[webhook, outcome])
        .inc();
    ADMISSION_DURATION
        .with_label_values(&[webhook])
        .observe(duration);
}

pub fn increment_selector_parse_errors() {
    SELECTOR_PARSE_ERRORS_TOTAL.inc();
}

pub fn increment_invalid_resources_skipped() {
    INVALID_RESOURCES_SKIPPED_TOTAL.inc();
}
