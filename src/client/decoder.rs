//! Incremental UTF-8 decoding for streamed response bodies.

/// Decodes a byte stream to text, holding back multi-byte sequences that
/// are split across fragment boundaries.
///
/// Invalid bytes become U+FFFD. A sequence still incomplete when the
/// stream ends is flushed as a single U+FFFD by [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next fragment. Returns only the newly completed text,
    /// which may be empty.
    pub fn decode(&mut self, fragment: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(fragment);

        let mut out = String::with_capacity(buf.len());
        let mut rest = &buf[..];

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        // Truncated sequence at the end, wait for more bytes.
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Flush whatever is still buffered at end of stream.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    /// Bytes held back waiting for the rest of a sequence.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(b"Hel"), "Hel");
        assert_eq!(decoder.decode(b"lo!"), "lo!");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_split_multibyte_sequence() {
        // "é" is 0xC3 0xA9
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(&[b'c', b'a', b'f', 0xC3]), "caf");
        assert_eq!(decoder.pending(), 1);
        assert_eq!(decoder.decode(&[0xA9]), "é");
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_four_byte_sequence_across_three_fragments() {
        let bytes = "🍕".as_bytes();
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.decode(&bytes[1..3]), "");
        assert_eq!(decoder.decode(&bytes[3..]), "🍕");
    }

    #[test]
    fn test_invalid_byte_replaced() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn test_dangling_sequence_flushed_on_finish() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(&[b'x', 0xE2, 0x82]), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }
}
