//! Prometheus metrics for the chat relay.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::{BackendError, StreamError};

/// Error reason labels for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    /// Client went away (response body dropped).
    ClientDisconnected,
    /// A write or upstream operation timed out.
    Timeout,
    /// Upstream API answered with an error status.
    Upstream,
    /// Upstream stream broke or sent unparseable data.
    Stream,
    /// Other/unknown error
    Other,
}

impl ErrorReason {
    /// Convert to static string for metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::ClientDisconnected => "client_disconnected",
            ErrorReason::Timeout => "timeout",
            ErrorReason::Upstream => "upstream",
            ErrorReason::Stream => "stream",
            ErrorReason::Other => "other",
        }
    }

    pub fn from_stream_error(err: &StreamError) -> Self {
        match err {
            StreamError::ClientDisconnected => ErrorReason::ClientDisconnected,
            StreamError::Timeout => ErrorReason::Timeout,
        }
    }

    pub fn from_backend_error(err: &BackendError) -> Self {
        match err {
            BackendError::Timeout => ErrorReason::Timeout,
            BackendError::Api { .. } | BackendError::Http(_) => ErrorReason::Upstream,
            BackendError::Stream(_) | BackendError::Parse(_) => ErrorReason::Stream,
            BackendError::Connection(_) | BackendError::Config(_) => ErrorReason::Other,
        }
    }
}

/// Initialize metrics descriptions.
pub fn init_metrics() {
    // Request metrics
    describe_counter!("relay_requests_total", "Chat stream requests received");
    describe_counter!(
        "relay_requests_rejected_total",
        "Requests rejected before streaming (validation, capacity)"
    );
    describe_counter!("relay_flow_misses_total", "Requests naming an unknown flow");

    // Backend metrics
    describe_counter!("relay_backend_requests_total", "Upstream completion requests");
    describe_counter!("relay_backend_errors_total", "Upstream completion errors");
    describe_histogram!(
        "relay_backend_duration_seconds",
        "Upstream stream duration"
    );
    describe_histogram!(
        "relay_backend_ttfb_seconds",
        "Time to first fragment from upstream"
    );

    // Streaming metrics
    describe_gauge!("relay_active_streams", "Streams currently being relayed");
    describe_counter!("relay_bytes_sent_total", "Total bytes relayed to clients");
    describe_counter!("relay_chunks_sent_total", "Total fragments relayed to clients");
    describe_counter!("relay_stream_errors_total", "Relay write errors");
    describe_histogram!(
        "relay_stream_duration_seconds",
        "Total stream duration per request"
    );
}

/// Start the Prometheus metrics HTTP server.
pub fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    // Stream/backend duration: 10ms to ~163s
    let duration_buckets: [f64; 15] = [
        0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.28, 2.56, 5.12, 10.24, 20.48, 40.96, 81.92,
        163.84,
    ];

    // Backend TTFB: 1ms to ~16s
    let ttfb_buckets: [f64; 15] = [
        0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048, 4.096,
        8.192, 16.384,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("relay_stream_duration_seconds".to_string()),
            &duration_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full("relay_backend_duration_seconds".to_string()),
            &duration_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full("relay_backend_ttfb_seconds".to_string()),
            &ttfb_buckets,
        )?
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {}", e))?;

    tracing::info!(%addr, "Metrics server started");
    Ok(())
}

pub fn record_request() {
    counter!("relay_requests_total").increment(1);
}

/// Record a request refused before streaming, labelled by status code.
pub fn record_rejected(status: u16) {
    counter!("relay_requests_rejected_total", "status" => status.to_string()).increment(1);
}

pub fn record_flow_miss() {
    counter!("relay_flow_misses_total").increment(1);
}

pub fn set_active_streams(count: u64) {
    gauge!("relay_active_streams").set(count as f64);
}

pub fn record_backend_request(backend: &'static str) {
    counter!("relay_backend_requests_total", "backend" => backend).increment(1);
}

pub fn record_backend_error(backend: &'static str, reason: ErrorReason) {
    counter!(
        "relay_backend_errors_total",
        "backend" => backend,
        "reason" => reason.as_str()
    )
    .increment(1);
}

pub fn record_backend_duration(backend: &'static str, duration: Duration) {
    histogram!("relay_backend_duration_seconds", "backend" => backend)
        .record(duration.as_secs_f64());
}

pub fn record_backend_ttfb(backend: &'static str, duration: Duration) {
    histogram!("relay_backend_ttfb_seconds", "backend" => backend).record(duration.as_secs_f64());
}

pub fn record_bytes_sent(bytes: u64) {
    counter!("relay_bytes_sent_total").increment(bytes);
}

pub fn record_chunk_sent() {
    counter!("relay_chunks_sent_total").increment(1);
}

pub fn record_stream_error(reason: ErrorReason) {
    counter!("relay_stream_errors_total", "reason" => reason.as_str()).increment(1);
}

pub fn record_stream_duration(duration: Duration) {
    histogram!("relay_stream_duration_seconds").record(duration.as_secs_f64());
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
