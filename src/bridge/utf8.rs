//! Incremental UTF-8 decoder for byte-level runtime output
//!
//! The runtime hands over raw bytes per token, and a multi-byte character can
//! straddle two callbacks. Complete characters are released as soon as they
//! arrive; an incomplete trailing sequence is held for the next callback.

/// Holds incomplete UTF-8 sequences across token boundaries.
#[derive(Debug, Clone, Default)]
pub struct IncrementalUtf8Decoder {
    /// Bytes received but not yet released as text
    pending: Vec<u8>,
}

impl IncrementalUtf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bytes from one callback, returning whatever now decodes.
    ///
    /// An incomplete trailing sequence stays pending. Each invalid byte run
    /// becomes one U+FFFD so a corrupt token cannot stall the output.
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        let mut rest = self.pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Sequence cut short at the end: wait for the next callback
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);

        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Whether bytes are waiting for the rest of a character
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drop whatever is pending, returning how many bytes were discarded
    pub fn discard_pending(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_text_passes_through() {
        let mut decoder = IncrementalUtf8Decoder::new();
        assert_eq!(decoder.push(b"Hello").as_deref(), Some("Hello"));
        assert_eq!(decoder.push(b" world").as_deref(), Some(" world"));
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_split_character_is_held() {
        let bytes = "你好".as_bytes();
        let mut decoder = IncrementalUtf8Decoder::new();

        // "你" is three bytes; split after the first
        assert_eq!(decoder.push(&bytes[..1]), None);
        assert!(decoder.has_pending());
        assert_eq!(decoder.push(&bytes[1..4]), None);
        assert_eq!(decoder.push(&bytes[4..]).as_deref(), Some("你好"));
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_text_before_split_released_early() {
        let mut decoder = IncrementalUtf8Decoder::new();
        let euro = "€".as_bytes();

        let mut first = b"cost ".to_vec();
        first.extend_from_slice(&euro[..2]);
        assert_eq!(decoder.push(&first).as_deref(), Some("cost "));
        assert!(decoder.has_pending());
        assert_eq!(decoder.push(&euro[2..]).as_deref(), Some("€"));
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_invalid_byte_then_split_character() {
        let mut decoder = IncrementalUtf8Decoder::new();
        assert_eq!(decoder.push(&[0xff, 0xE2]).as_deref(), Some("\u{fffd}"));
        assert!(decoder.has_pending());
        assert_eq!(decoder.push(&[0x82, 0xAC]).as_deref(), Some("€"));
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_invalid_bytes_do_not_stall() {
        let mut decoder = IncrementalUtf8Decoder::new();
        let out = decoder.push(&[0xff, b'a']).unwrap();
        assert_eq!(out, "\u{fffd}a");
        assert_eq!(decoder.push(b"b").as_deref(), Some("b"));
    }

    #[test]
    fn test_discard_pending() {
        let mut decoder = IncrementalUtf8Decoder::new();
        assert_eq!(decoder.push(&"é".as_bytes()[..1]), None);
        assert_eq!(decoder.discard_pending(), 1);
        assert!(!decoder.has_pending());
    }
}
