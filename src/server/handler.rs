//! Request handlers for the relay endpoints.

use std::panic::AssertUnwindSafe;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::FutureExt;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use super::state::AppState;
use crate::backend::CompletionRequest;
use crate::context::RequestContext;
use crate::error::{BackendError, RequestError};
use crate::flow::apply_flow;
use crate::message::StreamChatRequest;
use crate::metrics::{self, ErrorReason, Timer};
use crate::streaming::{
    encode_error, relay_stream, ChunkWriter, RelayOptions, RelayPhase, FLOW_APOLOGY,
    FLOW_NOT_FOUND,
};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// `POST /api/stream-chat`
///
/// Validates the history, resolves the optional flow, opens the upstream
/// completion and answers with a body that carries each upstream fragment
/// as soon as it arrives.
pub async fn stream_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RequestError> {
    metrics::record_request();

    let guard = state.shutdown.register_stream().ok_or_else(|| {
        if state.shutdown.is_shutdown() {
            return reject(RequestError::ShuttingDown);
        }
        tracing::warn!("Stream capacity reached");
        reject(RequestError::Capacity)
    })?;
    let ctx = RequestContext::from_headers(&headers, guard.id());
    let span = tracing::info_span!(
        "stream_chat",
        session = ctx.session_id,
        request_id = %ctx.request_id
    );

    async move {
        let mut phase = RelayPhase::Idle;
        phase.advance(RelayPhase::Validating);

        let request = match StreamChatRequest::parse(&body) {
            Ok(request) => request,
            Err(e) => {
                phase.advance(RelayPhase::Rejected);
                tracing::warn!(error = %e, "Rejected chat request");
                return Err(reject(e));
            }
        };

        tracing::info!(
            messages = request.messages.len(),
            model = ?request.model,
            flow = ?request.flow_name,
            user_id = ?ctx.user_id,
            "Chat stream requested"
        );

        let stream_timer = Timer::new();
        phase.advance(RelayPhase::Streaming);

        let backend = state.backend.clone();
        let backend_name = backend.name();
        let mut relay_options = RelayOptions::new(backend_name, state.idle_timeout);

        let messages = match request.flow_name.as_deref() {
            None => request.messages,
            Some(name) => match state.flows.get(name).await {
                Ok(Some(flow)) => {
                    relay_options = relay_options.with_apology(FLOW_APOLOGY);
                    apply_flow(&flow, state.flows.fallback_instruction(), request.messages)
                }
                lookup => {
                    if let Err(e) = lookup {
                        tracing::error!(error = %e, "Flow lookup failed");
                    }
                    tracing::warn!(flow = %name, "Flow not found");
                    metrics::record_flow_miss();
                    phase.advance(RelayPhase::EndedWithError);
                    let fragment = encode_error(state.server.framing, FLOW_NOT_FOUND);
                    return Ok(streaming_response(Body::from(fragment)));
                }
            },
        };

        let completion = CompletionRequest::new(messages, request.model, &ctx);

        metrics::record_backend_request(backend_name);
        let opened = tokio::time::timeout(state.backend_timeout, backend.stream(completion))
            .await
            .unwrap_or(Err(BackendError::Timeout));

        let upstream = match opened {
            Ok(upstream) => upstream,
            Err(e) => {
                metrics::record_backend_error(backend_name, ErrorReason::from_backend_error(&e));
                phase.advance(RelayPhase::EndedWithError);
                tracing::error!(error = %e, backend = backend_name, "Failed to open upstream stream");
                return Err(reject(RequestError::Upstream(e)));
            }
        };

        let (mut writer, rx) = ChunkWriter::channel(
            state.server.channel_capacity,
            state.server.framing,
            state.server.write_timeout(),
        );
        let shutdown_rx = guard.subscribe();

        tokio::spawn(
            async move {
                // Holds the stream slot until the relay ends.
                let _guard = guard;

                let result =
                    AssertUnwindSafe(relay_stream(upstream, &mut writer, shutdown_rx, relay_options))
                        .catch_unwind()
                        .await;

                match result {
                    Ok(report) => {
                        phase.advance(report.outcome.final_phase());
                        tracing::info!(
                            chunks = report.chunks,
                            bytes = report.bytes,
                            outcome = ?report.outcome,
                            duration_ms = stream_timer.elapsed().as_millis(),
                            "Stream completed"
                        );
                    }
                    Err(panic) => {
                        phase.advance(RelayPhase::EndedWithError);
                        let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "Unknown panic".to_string()
                        };
                        tracing::error!(panic = %panic_msg, "Relay task panicked");
                    }
                }

                metrics::record_stream_duration(stream_timer.elapsed());
            }
            .in_current_span(),
        );

        Ok(streaming_response(Body::from_stream(ReceiverStream::new(rx))))
    }
    .instrument(span)
    .await
}

/// `GET /api/flows`
pub async fn list_flows(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.flows.list().await)
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    let backend = state.backend.name();
    match state.backend.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "backend": backend,
                "active_streams": state.shutdown.active_streams(),
                "available_streams": state.shutdown.available_streams(),
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, backend, "Backend health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "backend": backend,
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

fn reject(err: RequestError) -> RequestError {
    metrics::record_rejected(err.status().as_u16());
    err
}

/// 200 response with event-stream headers around `body`.
fn streaming_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        body,
    )
        .into_response()
}
