//! Mock backend for local runs and demos.
//!
//! Simulates LLM streaming by returning a canned response word-by-word.

use async_trait::async_trait;
use std::time::Duration;

use super::traits::{ChunkStream, CompletionRequest, StreamChunk, StreamingBackend, VecChunkStream};
use crate::error::BackendError;
use crate::message::Role;

/// Mock backend that simulates LLM streaming.
pub struct MockBackend {
    /// Delay between tokens.
    token_delay: Duration,
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        Self {
            token_delay: Duration::from_millis(50),
        }
    }

    /// Create with custom token delay.
    pub fn with_delay(token_delay: Duration) -> Self {
        Self { token_delay }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamingBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, BackendError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let prompt_preview: String = if last_user.chars().count() > 100 {
            let cut: String = last_user.chars().take(100).collect();
            format!("{}...", cut)
        } else {
            last_user.to_string()
        };

        let model = request.model.as_deref().unwrap_or("default");
        let response = format!(
            "Hello! I received your message: \"{}\"\n\n\
             This reply is streamed by the chat relay using the mock provider \
             (model {}, {} messages of context). \
             Configure the openai provider to talk to a real model.",
            prompt_preview,
            model,
            request.messages.len()
        );

        // Split into word chunks
        let words: Vec<&str> = response.split_whitespace().collect();
        let mut chunks: Vec<StreamChunk> = Vec::with_capacity(words.len() + 1);

        for (i, word) in words.iter().enumerate() {
            let content = if i == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            };
            chunks.push(StreamChunk::content(content));
        }

        chunks.push(StreamChunk::done());

        Ok(Box::new(VecChunkStream::new(chunks, Some(self.token_delay))))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;

    #[tokio::test]
    async fn test_mock_stream() {
        let backend = MockBackend::with_delay(Duration::from_millis(1));

        let request = CompletionRequest {
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("test")],
            model: None,
            request_id: "test-1".to_string(),
            user_id: None,
        };

        let mut stream = backend.stream(request).await.unwrap();

        let mut chunks = Vec::new();
        while let Some(result) = stream.next().await {
            let chunk = result.unwrap();
            chunks.push(chunk.clone());
            if chunk.done {
                break;
            }
        }

        assert!(chunks.len() > 2);
        assert!(chunks.last().unwrap().done);
        let text: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(text.contains("\"test\""));
    }
}
