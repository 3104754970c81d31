//! Consumer for the relay's streaming endpoint.

mod consumer;
mod decoder;
mod frames;

pub use consumer::{
    callbacks, CancelHandle, ChatEvent, ChatEventStream, FnCallbacks, StreamCallbacks,
    StreamChatClient, STREAM_CHAT_PATH,
};
pub use decoder::Utf8StreamDecoder;
