//! Relay of upstream fragments into streaming HTTP responses.

mod framing;
mod relay;
mod writer;

pub use framing::{
    encode_chunk, encode_done, encode_error, FLOW_APOLOGY, FLOW_NOT_FOUND, MID_STREAM_APOLOGY,
};
pub use relay::{relay_stream, RelayOptions, RelayOutcome, RelayPhase, RelayReport};
pub use writer::{BodyItem, ChunkWriter};
