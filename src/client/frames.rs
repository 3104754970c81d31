//! Splits a decoded response body into reply text and relay signals.
//!
//! With `plain` framing the body is the reply itself. With `sse` framing
//! each `\n\n`-terminated frame carries either a content fragment, the
//! `[DONE]` marker or an `error` event injected by the relay.

use serde::Deserialize;

use crate::config::Framing;
use crate::error::ClientError;

/// One unit of body content after framing is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BodyEvent {
    Text(String),
    Done,
    RelayError(String),
}

#[derive(Deserialize)]
struct ContentFrame {
    content: String,
}

#[derive(Deserialize)]
struct ErrorFrame {
    error: String,
}

/// Incremental frame reader. Text may be pushed in arbitrary pieces.
pub(crate) struct FrameReader {
    framing: Framing,
    buffer: String,
}

impl FrameReader {
    pub(crate) fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: String::new(),
        }
    }

    /// Feed decoded text and return every event it completes.
    pub(crate) fn push(&mut self, text: &str) -> Result<Vec<BodyEvent>, ClientError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        match self.framing {
            Framing::Plain => Ok(vec![BodyEvent::Text(text.to_string())]),
            Framing::Sse => {
                self.buffer.push_str(text);
                let mut events = Vec::new();
                while let Some(end) = self.buffer.find("\n\n") {
                    let frame: String = self.buffer.drain(..end + 2).collect();
                    if let Some(event) = parse_frame(&frame[..end])? {
                        events.push(event);
                    }
                }
                Ok(events)
            }
        }
    }

    /// The body has ended.
    ///
    /// Plain bodies end by closing, so this is the completion. An `sse` body
    /// must have ended with `[DONE]` before getting here.
    pub(crate) fn finish(&mut self) -> Result<BodyEvent, ClientError> {
        match self.framing {
            Framing::Plain => Ok(BodyEvent::Done),
            Framing::Sse if self.buffer.trim().is_empty() => Err(ClientError::Body(
                "stream ended before [DONE]".to_string(),
            )),
            Framing::Sse => Err(ClientError::Body(
                "stream ended inside a frame".to_string(),
            )),
        }
    }
}

fn parse_frame(frame: &str) -> Result<Option<BodyEvent>, ClientError> {
    let mut event = None;
    let mut data = String::new();

    for line in frame.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.strip_prefix(' ').unwrap_or(value));
        }
        // Comments (`:`) and unknown fields are ignored.
    }

    if data.is_empty() {
        return Ok(None);
    }

    if event == Some("error") {
        let message = serde_json::from_str::<ErrorFrame>(&data)
            .map(|frame| frame.error)
            .unwrap_or(data);
        return Ok(Some(BodyEvent::RelayError(message)));
    }

    if data.trim() == "[DONE]" {
        return Ok(Some(BodyEvent::Done));
    }

    let frame: ContentFrame = serde_json::from_str(&data)
        .map_err(|e| ClientError::Body(format!("Malformed frame: {}", e)))?;
    if frame.content.is_empty() {
        return Ok(None);
    }
    Ok(Some(BodyEvent::Text(frame.content)))
}
