//! Shared HTTP client builder for streaming backends.
//!
//! One client is built at startup and shared by every request, so the
//! connection pool and credentials are process-wide and read-only.

use reqwest::Client;
use std::time::Duration;

use crate::config::OpenAIConfig;
use crate::error::BackendError;

/// Build an HTTP client configured for long-lived streamed completions.
///
/// No overall request timeout is set, since reqwest's `timeout()` covers the
/// whole body. `read_timeout` bounds each read instead, so a provider that
/// stops sending mid-reply fails the stream.
pub fn build_streaming_client(
    config: &OpenAIConfig,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, BackendError> {
    let mut builder = Client::builder()
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60));

    // Allow insecure TLS connections (for testing with self-signed certificates)
    if config.insecure_ssl {
        builder = builder.danger_accept_invalid_certs(true);
        tracing::warn!("TLS certificate verification disabled (insecure_ssl=true)");
    }

    tracing::info!(
        api_base = %config.api_base,
        pool_size = config.pool_max_idle_per_host,
        connect_timeout_secs = connect_timeout.as_secs(),
        read_timeout_secs = read_timeout.as_secs(),
        "Streaming HTTP client configured"
    );

    builder
        .build()
        .map_err(|e| BackendError::Connection(e.to_string()))
}
