//! The relay loop: pull upstream fragments, push them to the client.

use std::time::Duration;

use tokio::sync::watch;

use super::framing::MID_STREAM_APOLOGY;
use super::writer::ChunkWriter;
use crate::backend::ChunkStream;
use crate::error::{BackendError, StreamError};
use crate::metrics::{self, ErrorReason, Timer};

/// Per-request lifecycle of the stream producer.
///
/// `Idle -> Validating -> Rejected | Streaming -> EndedOk | EndedWithError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Idle,
    Validating,
    Rejected,
    Streaming,
    EndedOk,
    EndedWithError,
}

impl RelayPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RelayPhase::Rejected | RelayPhase::EndedOk | RelayPhase::EndedWithError
        )
    }

    pub fn can_advance_to(self, next: RelayPhase) -> bool {
        use RelayPhase::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Rejected)
                | (Validating, Streaming)
                | (Streaming, EndedOk)
                | (Streaming, EndedWithError)
        )
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: RelayPhase) -> bool {
        if !self.can_advance_to(next) {
            tracing::error!(from = ?*self, to = ?next, "Illegal relay phase transition");
            return false;
        }
        tracing::trace!(from = ?*self, to = ?next, "Relay phase");
        *self = next;
        true
    }
}

/// How a relay ended.
#[derive(Debug)]
pub enum RelayOutcome {
    /// Upstream finished and every fragment was written.
    Completed,
    /// Upstream failed mid-stream; the apology was attempted.
    UpstreamFailed(BackendError),
    /// The client went away or stopped reading.
    ClientGone(StreamError),
    /// The service is shutting down.
    Shutdown,
}

impl RelayOutcome {
    pub fn final_phase(&self) -> RelayPhase {
        match self {
            RelayOutcome::Completed => RelayPhase::EndedOk,
            _ => RelayPhase::EndedWithError,
        }
    }
}

/// Summary of one relay run.
#[derive(Debug)]
pub struct RelayReport {
    pub outcome: RelayOutcome,
    pub chunks: u64,
    pub bytes: u64,
}

/// Per-request relay settings.
#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Backend name for metrics labels.
    pub backend: &'static str,
    /// Longest wait for the next upstream fragment.
    pub idle_timeout: Duration,
    /// Text written when upstream fails mid-stream.
    pub apology: &'static str,
}

impl RelayOptions {
    pub fn new(backend: &'static str, idle_timeout: Duration) -> Self {
        Self {
            backend,
            idle_timeout,
            apology: MID_STREAM_APOLOGY,
        }
    }

    pub fn with_apology(mut self, apology: &'static str) -> Self {
        self.apology = apology;
        self
    }
}

/// Relay `upstream` into `writer` until one side ends.
///
/// Fragments are written as they arrive, in arrival order. A failed write
/// stops upstream reads immediately; dropping `upstream` releases it. An
/// upstream silent for longer than `idle_timeout` counts as failed.
pub async fn relay_stream(
    mut upstream: ChunkStream,
    writer: &mut ChunkWriter,
    mut shutdown_rx: watch::Receiver<bool>,
    options: RelayOptions,
) -> RelayReport {
    let backend = options.backend;
    let backend_timer = Timer::new();
    let mut ttfb_recorded = false;
    let mut chunks = 0u64;

    let outcome = loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                tracing::info!("Shutdown signaled, closing stream");
                break RelayOutcome::Shutdown;
            }

            _ = writer.closed() => {
                break RelayOutcome::ClientGone(StreamError::ClientDisconnected);
            }

            chunk = tokio::time::timeout(options.idle_timeout, upstream.next()) => {
                match chunk {
                    Err(_) => {
                        tracing::warn!(
                            idle_secs = options.idle_timeout.as_secs_f64(),
                            "Upstream went silent"
                        );
                        break RelayOutcome::UpstreamFailed(BackendError::Timeout);
                    }
                    Ok(Some(Ok(chunk))) => {
                        if !ttfb_recorded {
                            metrics::record_backend_ttfb(backend, backend_timer.elapsed());
                            ttfb_recorded = true;
                        }

                        // Write content first (some providers put text in the final chunk)
                        if !chunk.content.is_empty() {
                            if let Err(e) = writer.send_chunk(&chunk.content).await {
                                break RelayOutcome::ClientGone(e);
                            }
                            chunks += 1;
                            metrics::record_chunk_sent();
                        }

                        if chunk.done {
                            break RelayOutcome::Completed;
                        }
                    }
                    Ok(Some(Err(e))) => {
                        break RelayOutcome::UpstreamFailed(e);
                    }
                    Ok(None) => {
                        break RelayOutcome::Completed;
                    }
                }
            }
        }
    };

    // Release the upstream connection before any final writes.
    drop(upstream);

    match &outcome {
        RelayOutcome::Completed => {
            if let Err(e) = writer.send_done().await {
                tracing::debug!(error = %e, "Client gone before done marker");
            }
        }
        RelayOutcome::UpstreamFailed(e) => {
            metrics::record_backend_error(backend, ErrorReason::from_backend_error(e));
            tracing::error!(error = %e, "Upstream stream error");
            if let Err(write_err) = writer.send_error(options.apology).await {
                tracing::debug!(error = %write_err, "Client gone before apology");
            }
        }
        RelayOutcome::ClientGone(e) => {
            metrics::record_stream_error(ErrorReason::from_stream_error(e));
            tracing::warn!(error = %e, "Client write error, stopping upstream reads");
        }
        RelayOutcome::Shutdown => {}
    }

    metrics::record_backend_duration(backend, backend_timer.elapsed());

    RelayReport {
        outcome,
        chunks,
        bytes: writer.bytes_written(),
    }
}
