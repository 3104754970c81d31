//! Body framing for relayed fragments.

use bytes::Bytes;
use serde_json::json;

use crate::config::Framing;

/// Appended when the upstream fails after streaming has begun.
pub const MID_STREAM_APOLOGY: &str = "\n\nAn error occurred while generating the response.";

/// Apology used instead when the request ran under a flow.
pub const FLOW_APOLOGY: &str =
    "\n\nAn error occurred while processing your request with the specified flow.";

/// Sole fragment written when the requested flow cannot be resolved.
pub const FLOW_NOT_FOUND: &str = "Error: Flow not found";

/// Encode a content fragment.
pub fn encode_chunk(framing: Framing, content: &str) -> Bytes {
    match framing {
        Framing::Plain => Bytes::copy_from_slice(content.as_bytes()),
        Framing::Sse => {
            let data = json!({ "content": content });
            format!("data: {}\n\n", data).into()
        }
    }
}

/// Encode the end-of-stream marker. Plain framing ends by closing the body.
pub fn encode_done(framing: Framing) -> Option<Bytes> {
    match framing {
        Framing::Plain => None,
        Framing::Sse => Some(Bytes::from_static(b"data: [DONE]\n\n")),
    }
}

/// Encode a relay-injected error.
///
/// Plain framing writes the text in-band, indistinguishable from model
/// output. SSE framing uses a dedicated `error` event.
pub fn encode_error(framing: Framing, message: &str) -> Bytes {
    match framing {
        Framing::Plain => Bytes::copy_from_slice(message.as_bytes()),
        Framing::Sse => {
            let data = json!({ "error": message.trim() });
            format!("event: error\ndata: {}\n\n", data).into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_chunk_is_raw() {
        assert_eq!(encode_chunk(Framing::Plain, "Hel").as_ref(), b"Hel");
        assert_eq!(encode_done(Framing::Plain), None);
    }

    #[test]
    fn test_sse_chunk() {
        let chunk = encode_chunk(Framing::Sse, "hello");
        assert_eq!(chunk.as_ref(), b"data: {\"content\":\"hello\"}\n\n");
    }

    #[test]
    fn test_sse_done() {
        assert_eq!(
            encode_done(Framing::Sse).unwrap().as_ref(),
            b"data: [DONE]\n\n"
        );
    }

    #[test]
    fn test_plain_error_is_in_band() {
        let bytes = encode_error(Framing::Plain, MID_STREAM_APOLOGY);
        assert_eq!(bytes.as_ref(), MID_STREAM_APOLOGY.as_bytes());
    }

    #[test]
    fn test_sse_error_is_distinct_event() {
        let bytes = encode_error(Framing::Sse, MID_STREAM_APOLOGY);
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("event: error\ndata: "));
        assert!(text.contains("An error occurred while generating the response."));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_sse_chunk_escapes_newlines() {
        let text = String::from_utf8(encode_chunk(Framing::Sse, "a\n\nb").to_vec()).unwrap();
        // Only the frame terminator may contain a blank line.
        assert_eq!(text.matches("\n\n").count(), 1);
    }
}
