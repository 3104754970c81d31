//! Backend trait definitions.

use async_trait::async_trait;
use std::pin::Pin;

use crate::context::RequestContext;
use crate::error::BackendError;
use crate::message::ChatMessage;

/// A completion provider that streams responses.
#[async_trait]
pub trait StreamingBackend: Send + Sync {
    /// Get the backend name for metrics/logging.
    fn name(&self) -> &'static str;

    /// Open a streamed completion for the given request.
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, BackendError>;

    /// Health check for the backend.
    async fn health_check(&self) -> Result<(), BackendError>;
}

/// Request forwarded to the completion provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Conversation, possibly prefixed with a flow's system message.
    pub messages: Vec<ChatMessage>,
    /// Model to use (optional, uses backend default).
    pub model: Option<String>,
    /// Request ID for correlation.
    pub request_id: String,
    /// Caller identity forwarded to providers that accept one.
    pub user_id: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, model: Option<String>, ctx: &RequestContext) -> Self {
        Self {
            messages,
            model,
            request_id: ctx.request_id.clone(),
            user_id: ctx.user_id.clone(),
        }
    }
}

/// A chunk of streamed content.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    /// The content of this chunk.
    pub content: String,
    /// Whether this is the final chunk.
    pub done: bool,
    /// Finish reason reported by the provider, if any.
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    /// Create a content chunk.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
            finish_reason: None,
        }
    }

    /// Create a done marker chunk.
    pub fn done() -> Self {
        Self {
            content: String::new(),
            done: true,
            finish_reason: None,
        }
    }
}

/// Stream of chunks from a backend.
pub type ChunkStream = Box<dyn ChunkStreamTrait>;

/// Future returned by [`ChunkStreamTrait::next`].
pub type NextChunk<'a> =
    Pin<Box<dyn std::future::Future<Output = Option<Result<StreamChunk, BackendError>>> + Send + 'a>>;

/// Trait for chunk streams.
pub trait ChunkStreamTrait: Send {
    /// Get the next chunk. `None` once the stream is exhausted.
    fn next(&mut self) -> NextChunk<'_>;
}

/// Vector-based chunk stream, optionally paced.
pub struct VecChunkStream {
    chunks: std::vec::IntoIter<Result<StreamChunk, BackendError>>,
    delay: Option<std::time::Duration>,
}

impl VecChunkStream {
    pub fn new(chunks: Vec<StreamChunk>, delay: Option<std::time::Duration>) -> Self {
        Self::from_results(chunks.into_iter().map(Ok).collect(), delay)
    }

    /// Stream that may yield errors at given positions.
    pub fn from_results(
        chunks: Vec<Result<StreamChunk, BackendError>>,
        delay: Option<std::time::Duration>,
    ) -> Self {
        Self {
            chunks: chunks.into_iter(),
            delay,
        }
    }
}

impl ChunkStreamTrait for VecChunkStream {
    fn next(&mut self) -> NextChunk<'_> {
        let delay = self.delay;
        let chunk = self.chunks.next();

        Box::pin(async move {
            if chunk.is_some() {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
            }
            chunk
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_vec_stream_yields_in_order() {
        let mut stream = VecChunkStream::from_results(
            vec![
                Ok(StreamChunk::content("a")),
                Err(BackendError::Stream("boom".into())),
            ],
            None,
        );
        assert_eq!(stream.next().await.unwrap().unwrap().content, "a");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
