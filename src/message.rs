//! Chat history types and request-body validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RequestError;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Message timestamp as sent by clients: epoch number or formatted string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Epoch(serde_json::Number),
    Text(String),
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            id: None,
            timestamp: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Body of `POST /api/stream-chat`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_name: Option<String>,
}

impl StreamChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            flow_name: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_flow(mut self, flow_name: impl Into<String>) -> Self {
        self.flow_name = Some(flow_name.into());
        self
    }

    /// Parse and validate a raw request body.
    ///
    /// `messages` must be present and an array of well-formed messages.
    /// An empty `flow_name` counts as absent.
    pub fn parse(body: &[u8]) -> Result<Self, RequestError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| RequestError::Validation(format!("Invalid JSON body: {}", e)))?;

        let Value::Object(mut fields) = value else {
            return Err(RequestError::Validation(
                "Request body must be a JSON object".to_string(),
            ));
        };

        let messages = match fields.remove("messages") {
            Some(messages @ Value::Array(_)) => {
                serde_json::from_value::<Vec<ChatMessage>>(messages).map_err(|e| {
                    RequestError::Validation(format!("Invalid message in history: {}", e))
                })?
            }
            _ => {
                return Err(RequestError::Validation(
                    "Messages are required and must be an array".to_string(),
                ))
            }
        };

        let model = optional_string(fields.remove("model"), "model")?;
        let flow_name =
            optional_string(fields.remove("flow_name"), "flow_name")?.filter(|s| !s.is_empty());

        Ok(Self {
            messages,
            model,
            flow_name,
        })
    }
}

fn optional_string(value: Option<Value>, field: &str) -> Result<Option<String>, RequestError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(RequestError::Validation(format!(
            "{} must be a string",
            field
        ))),
    }
}
