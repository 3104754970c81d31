//! Shared test doubles: scripted backends, a fake OpenAI upstream and
//! helpers to run the relay on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use chat_relay::backend::{
    ChunkStream, ChunkStreamTrait, CompletionRequest, NextChunk, StreamChunk, StreamingBackend,
    VecChunkStream,
};
use chat_relay::config::{Config, FlowEntry};
use chat_relay::error::BackendError;
use chat_relay::flow::ConfigFlowStore;
use chat_relay::server::{self, AppState};
use chat_relay::shutdown::ShutdownCoordinator;

type OpenFn = dyn Fn() -> Result<ChunkStream, BackendError> + Send + Sync;

/// Backend that replays a fixed script and records what it was asked.
pub struct ScriptedBackend {
    open: Box<OpenFn>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    fn from_fn(open: impl Fn() -> Result<ChunkStream, BackendError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            open: Box::new(open),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Streams `parts` then a done marker.
    pub fn chunks(parts: &[&str]) -> Arc<Self> {
        Self::paced(parts, None)
    }

    pub fn paced(parts: &[&str], delay: Option<Duration>) -> Arc<Self> {
        let parts: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
        Self::from_fn(move || {
            let mut chunks: Vec<StreamChunk> =
                parts.iter().map(|p| StreamChunk::content(p.clone())).collect();
            chunks.push(StreamChunk::done());
            Ok(Box::new(VecChunkStream::new(chunks, delay)) as ChunkStream)
        })
    }

    /// Streams `parts`, then fails.
    pub fn failing_after(parts: &[&str]) -> Arc<Self> {
        let parts: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
        Self::from_fn(move || {
            let mut chunks: Vec<Result<StreamChunk, BackendError>> =
                parts.iter().map(|p| Ok(StreamChunk::content(p.clone()))).collect();
            chunks.push(Err(BackendError::Stream("connection reset".to_string())));
            Ok(Box::new(VecChunkStream::from_results(chunks, None)) as ChunkStream)
        })
    }

    /// Streams `parts`, then goes silent without ending.
    pub fn stalling_after(parts: &[&str]) -> Arc<Self> {
        let parts: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
        Self::from_fn(move || {
            Ok(Box::new(StallingStream {
                parts: parts.clone().into(),
            }) as ChunkStream)
        })
    }

    /// Fails before any fragment is produced.
    pub fn failing_to_open() -> Arc<Self> {
        Self::from_fn(|| {
            Err(BackendError::Api {
                status: 401,
                message: "Incorrect API key provided: sk-secret".to_string(),
            })
        })
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamingBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, BackendError> {
        self.calls.lock().unwrap().push(request);
        (self.open)()
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

struct StallingStream {
    parts: std::collections::VecDeque<String>,
}

impl ChunkStreamTrait for StallingStream {
    fn next(&mut self) -> NextChunk<'_> {
        Box::pin(async move {
            match self.parts.pop_front() {
                Some(part) => Some(Ok(StreamChunk::content(part))),
                None => std::future::pending().await,
            }
        })
    }
}

/// Backend that never answers, simulating an unresponsive provider.
pub struct HangingBackend;

#[async_trait]
impl StreamingBackend for HangingBackend {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<ChunkStream, BackendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(BackendError::Timeout)
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Err(BackendError::Connection("unhealthy".to_string()))
    }
}

/// Config with fast timeouts and a strict flow list.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.write_timeout_secs = 5;
    config.backend.timeout_secs = 1;
    config.flows.allow_unknown = false;
    config.flows.entries = vec![
        FlowEntry {
            name: "restaurant_advisor".to_string(),
            description: Some("Menu and pricing advice".to_string()),
            system_prompt: Some("You advise restaurant owners.".to_string()),
        },
        FlowEntry {
            name: "sales_report".to_string(),
            description: None,
            system_prompt: None,
        },
    ];
    config
}

pub fn test_state(config: &Config, backend: Arc<dyn StreamingBackend>) -> AppState {
    let flows = Arc::new(ConfigFlowStore::new(&config.flows));
    let shutdown = ShutdownCoordinator::new(config.server.max_streams);
    AppState::new(config, backend, flows, shutdown)
}

/// Run the relay on an ephemeral port.
pub async fn spawn_relay(state: AppState) -> SocketAddr {
    let listener = server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, state));
    addr
}

/// How the fake upstream answers `POST /v1/chat/completions`.
#[derive(Clone)]
pub enum UpstreamReply {
    /// `chat.completion.chunk` events for each part, a stop chunk and `[DONE]`.
    Chunks(Vec<&'static str>),
    /// Error status with an OpenAI-style JSON body.
    Status(u16),
}

struct FakeUpstreamState {
    reply: UpstreamReply,
    requests: Mutex<Vec<Value>>,
}

/// OpenAI-compatible streaming endpoint on an ephemeral port.
pub struct FakeUpstream {
    pub addr: SocketAddr,
    state: Arc<FakeUpstreamState>,
}

impl FakeUpstream {
    pub async fn spawn(reply: UpstreamReply) -> Self {
        let state = Arc::new(FakeUpstreamState {
            reply,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v1/chat/completions", post(fake_completions))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        Self { addr, state }
    }

    pub fn api_base(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// JSON bodies received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn fake_completions(
    State(state): State<Arc<FakeUpstreamState>>,
    Json(body): Json<Value>,
) -> Response {
    state.requests.lock().unwrap().push(body);

    match &state.reply {
        UpstreamReply::Status(code) => {
            let status = StatusCode::from_u16(*code).unwrap();
            let error = json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
            });
            (status, Json(error)).into_response()
        }
        UpstreamReply::Chunks(parts) => {
            let mut events = String::new();
            let role = json!({
                "id": "chatcmpl-test",
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]
            });
            events.push_str(&format!("data: {}\n\n", role));

            for part in parts {
                let chunk = json!({
                    "id": "chatcmpl-test",
                    "object": "chat.completion.chunk",
                    "choices": [{"index": 0, "delta": {"content": part}, "finish_reason": null}]
                });
                events.push_str(&format!("data: {}\n\n", chunk));
            }

            let stop = json!({
                "id": "chatcmpl-test",
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
            });
            events.push_str(&format!("data: {}\n\n", stop));
            events.push_str("data: [DONE]\n\n");

            (
                [
                    (header::CONTENT_TYPE, "text/event-stream"),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                events,
            )
                .into_response()
        }
    }
}
