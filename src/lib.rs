//! Chat streaming relay.
//!
//! The server half accepts a chat history on `POST /api/stream-chat`,
//! applies the optional flow instruction and relays an upstream LLM
//! completion to the caller fragment by fragment. The client half consumes
//! that endpoint with incremental decoding and cancellation.

pub mod backend;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod message;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod streaming;

pub use config::Config;
pub use error::{RelayError, Result};
