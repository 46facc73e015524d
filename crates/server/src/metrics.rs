//! Prometheus metrics for the depot server.
//!
//! Covers revision lookups, archive downloads, block decisions, served
//! downloads and the tiering sweeps.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Restrict it to the scraper at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Resolution
pub static REVISION_LOOKUPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_revision_lookups_total",
            "Upstream revision lookups by provider and outcome",
        ),
        &["provider", "outcome"],
    )
    .expect("metric creation failed")
});

pub static REVISION_LOOKUP_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "depot_revision_lookup_duration_seconds",
            "Time taken by an upstream revision lookup",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["provider"],
    )
    .expect("metric creation failed")
});

pub static CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_cache_hits_total",
        "Resolutions answered from an already cached revision",
    )
    .expect("metric creation failed")
});

pub static ARCHIVE_DOWNLOADS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_archive_downloads_total",
        "Archives downloaded from upstream providers",
    )
    .expect("metric creation failed")
});

pub static ARCHIVE_DOWNLOAD_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_archive_download_failures_total",
        "Archive downloads that failed",
    )
    .expect("metric creation failed")
});

pub static BLOCKED_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_blocked_requests_total",
        "Resolutions rejected by a block entry or rule",
    )
    .expect("metric creation failed")
});

// Serving
pub static DOWNLOADS_SERVED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_downloads_served_total",
            "Archive downloads served by storage tier",
        ),
        &["tier"],
    )
    .expect("metric creation failed")
});

// Tiering
pub static TIER_UPLOADS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_tier_uploads_total",
        "Revisions moved from the hot tier to the cold tier",
    )
    .expect("metric creation failed")
});

pub static TIER_UPLOAD_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_tier_upload_failures_total",
        "Cold tier uploads that failed and will be retried",
    )
    .expect("metric creation failed")
});

pub static REVISIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_revisions_expired_total",
        "Revisions deleted after the retention window",
    )
    .expect("metric creation failed")
});

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(REVISION_LOOKUPS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REVISION_LOOKUP_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ARCHIVE_DOWNLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ARCHIVE_DOWNLOAD_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOCKED_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DOWNLOADS_SERVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TIER_UPLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TIER_UPLOAD_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REVISIONS_EXPIRED.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record the outcome of one upstream revision lookup.
pub fn record_lookup(provider: &str, outcome: &str) {
    REVISION_LOOKUPS.with_label_values(&[provider, outcome]).inc();
}
