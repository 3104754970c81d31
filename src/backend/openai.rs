//! OpenAI streaming backend.
//!
//! Uses the OpenAI Chat Completions API with `stream: true` and parses the
//! SSE `chat.completion.chunk` events.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::{Deserialize, Serialize};

use super::traits::{
    ChunkStream, ChunkStreamTrait, CompletionRequest, NextChunk, StreamChunk, StreamingBackend,
};
use crate::error::BackendError;

/// Upstream error bodies are truncated to this many characters in errors/logs.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// OpenAI streaming backend.
pub struct OpenAIBackend {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenAIBackend {
    /// Create a new OpenAI backend around a shared HTTP client.
    pub fn new(client: Client, api_key: String, api_base: String, default_model: String) -> Self {
        Self {
            client,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            default_model,
        }
    }
}

#[async_trait]
impl StreamingBackend for OpenAIBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, BackendError> {
        let model = request.model.unwrap_or_else(|| self.default_model.clone());

        let messages = request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        let body = ChatRequest {
            model: &model,
            messages,
            stream: true,
            user: request.user_id.as_deref(),
        };

        let url = format!("{}/chat/completions", self.api_base);

        let req = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Request-Id", &request.request_id)
            .json(&body);

        let es = EventSource::new(req).map_err(|e| BackendError::Connection(e.to_string()))?;

        let mut stream = OpenAIChunkStream {
            es,
            pending: None,
            finished: false,
        };
        stream.open().await?;

        tracing::debug!(model = %model, request_id = %request.request_id, "Upstream stream opened");

        Ok(Box::new(stream))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let url = format!("{}/models", self.api_base);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Api {
                status: response.status().as_u16(),
                message: "Health check failed".to_string(),
            });
        }

        Ok(())
    }
}

/// OpenAI streaming chunk stream.
struct OpenAIChunkStream {
    es: EventSource,
    /// Message that arrived while waiting for the open event.
    pending: Option<String>,
    finished: bool,
}

impl OpenAIChunkStream {
    /// Wait until the upstream accepted the request.
    ///
    /// Status and content-type failures surface here, before any byte is
    /// relayed to the client.
    async fn open(&mut self) -> Result<(), BackendError> {
        match self.es.next().await {
            Some(Ok(Event::Open)) => Ok(()),
            Some(Ok(Event::Message(msg))) => {
                self.pending = Some(msg.data);
                Ok(())
            }
            Some(Err(e)) => {
                self.es.close();
                Err(map_event_source_error(e).await)
            }
            None => Err(BackendError::Stream(
                "Upstream closed before the stream opened".to_string(),
            )),
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        // EventSource reconnects on its own unless closed.
        self.es.close();
    }
}

impl ChunkStreamTrait for OpenAIChunkStream {
    fn next(&mut self) -> NextChunk<'_> {
        Box::pin(async move {
            if self.finished {
                return None;
            }

            loop {
                let data = match self.pending.take() {
                    Some(data) => data,
                    None => match self.es.next().await {
                        Some(Ok(Event::Open)) => continue,
                        Some(Ok(Event::Message(msg))) => msg.data,
                        Some(Err(EventSourceError::StreamEnded)) | None => {
                            self.finish();
                            return None;
                        }
                        Some(Err(e)) => {
                            self.finish();
                            return Some(Err(map_event_source_error(e).await));
                        }
                    },
                };

                match parse_chunk(&data) {
                    Ok(Some(chunk)) => {
                        if chunk.done {
                            self.finish();
                        }
                        return Some(Ok(chunk));
                    }
                    // Role-only or empty deltas carry no text.
                    Ok(None) => continue,
                    Err(e) => {
                        self.finish();
                        return Some(Err(e));
                    }
                }
            }
        })
    }
}

impl Drop for OpenAIChunkStream {
    fn drop(&mut self) {
        self.es.close();
    }
}

/// Parse one SSE data payload into a chunk.
fn parse_chunk(data: &str) -> Result<Option<StreamChunk>, BackendError> {
    if data.trim() == "[DONE]" {
        return Ok(Some(StreamChunk::done()));
    }

    let chunk: ChatChunk = serde_json::from_str(data)
        .map_err(|e| BackendError::Parse(format!("Failed to parse chunk: {}", e)))?;

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };

    let content = choice.delta.content.unwrap_or_default();
    match (content.is_empty(), choice.finish_reason) {
        (true, None) => Ok(None),
        (_, reason) => Ok(Some(StreamChunk {
            done: reason.is_some(),
            finish_reason: reason,
            content,
        })),
    }
}

async fn map_event_source_error(err: EventSourceError) -> BackendError {
    match err {
        EventSourceError::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            match status.as_u16() {
                408 | 504 => BackendError::Timeout,
                code => BackendError::Api {
                    status: code,
                    message,
                },
            }
        }
        EventSourceError::InvalidContentType(content_type, _) => {
            BackendError::Http(format!("Unexpected content type: {:?}", content_type))
        }
        EventSourceError::Transport(e) if e.is_timeout() => BackendError::Timeout,
        EventSourceError::Transport(e) => BackendError::Connection(e.to_string()),
        other => BackendError::Stream(other.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}
