//! Error types for the chat relay.

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the relay service.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors from completion backends (OpenAI, etc.).
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Errors from the flow store.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Flow lookup failed for {name}: {reason}")]
    Lookup { name: String, reason: String },
}

/// Errors while relaying to the client.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Write timeout")]
    Timeout,
}

/// Errors surfaced to the HTTP caller before streaming begins.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("{0}")]
    Validation(String),

    #[error("An error occurred while streaming the chat response")]
    Upstream(#[source] BackendError),

    #[error("Too many concurrent streams")]
    Capacity,

    #[error("Server is shutting down")]
    ShuttingDown,
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::Validation(_) => StatusCode::BAD_REQUEST,
            RequestError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RequestError::Capacity | RequestError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Errors reported by the client-side stream consumer.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Chat history must contain at least one message")]
    EmptyHistory,

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Network response was not ok: {status}")]
    Status { status: u16 },

    #[error("Failed to read response body: {0}")]
    Body(String),

    /// Error frame injected by the relay (`sse` framing only).
    #[error("Relay reported an error: {0}")]
    Relay(String),
}
