//! Incremental UTF-8 decoding across read-buffer boundaries.
//!
//! A pty read can end mid-character: a 4 KiB read boundary has no reason
//! to fall on a character boundary. Decoding each read independently
//! would corrupt every multi-byte character that straddles one, so the
//! trailing bytes of a possibly-incomplete sequence are carried into the
//! next read instead.

/// Reassembles text from a byte stream read in arbitrary chunks.
///
/// Bytes decode up to the last complete character boundary; the trailing
/// 0-3 bytes that could begin a multi-byte character are retained and
/// prepended to the next call. Input that is already invalid decodes to
/// U+FFFD immediately and is never an error.
#[derive(Debug, Default)]
pub struct Utf8ReadBuffer {
    carry: Vec<u8>,
}

impl Utf8ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` together with any carried tail from the previous
    /// call, returning the decoded text.
    pub fn consume(&mut self, bytes: &[u8]) -> String {
        let joined;
        let mut data: &[u8] = if self.carry.is_empty() {
            bytes
        } else {
            let mut buf = std::mem::take(&mut self.carry);
            buf.extend_from_slice(bytes);
            joined = buf;
            &joined
        };

        let mut out = String::with_capacity(data.len());
        loop {
            match std::str::from_utf8(data) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&data[..valid]) {
                        out.push_str(text);
                    }
                    match err.error_len() {
                        // Invalid sequence: replace it and keep scanning.
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            data = &data[valid + bad..];
                        }
                        // Unexpected end of input: the tail could still
                        // become a valid character, so carry it.
                        None => {
                            self.carry = data[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }

        // An incomplete sequence is at most 3 bytes of a 4-byte character.
        debug_assert!(self.carry.len() < 4);
        out
    }

    /// Number of carried bytes awaiting completion.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Discard any carried bytes at end of stream, returning how many
    /// were dropped. A final partial character is deliberately lost
    /// rather than emitted as a replacement character.
    pub fn finish(&mut self) -> usize {
        let dropped = self.carry.len();
        self.carry.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut buf = Utf8ReadBuffer::new();
        assert_eq!(buf.consume(b"hello world"), "hello world");
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_multibyte_split_across_reads() {
        // "世" is E4 B8 96; split after the first byte.
        let mut buf = Utf8ReadBuffer::new();
        assert_eq!(buf.consume(&[0xE4]), "");
        assert_eq!(buf.pending(), 1);
        assert_eq!(buf.consume(&[0xB8, 0x96]), "世");
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_emoji_split_three_ways() {
        // 4-byte scalar split into 2+1+1 bytes.
        let bytes = "🎉".as_bytes();
        let mut buf = Utf8ReadBuffer::new();
        assert_eq!(buf.consume(&bytes[..2]), "");
        assert_eq!(buf.consume(&bytes[2..3]), "");
        assert_eq!(buf.consume(&bytes[3..]), "🎉");
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        let mut buf = Utf8ReadBuffer::new();
        assert_eq!(buf.consume(&[0xFF, b'a']), "\u{FFFD}a");
        // A lead byte followed by a non-continuation is invalid, not pending.
        assert_eq!(buf.consume(&[0xE4, b'x']), "\u{FFFD}x");
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_lone_continuation_byte() {
        let mut buf = Utf8ReadBuffer::new();
        assert_eq!(buf.consume(&[0x80]), "\u{FFFD}");
    }

    #[test]
    fn test_finish_drops_carry() {
        let mut buf = Utf8ReadBuffer::new();
        assert_eq!(buf.consume(&[b'o', b'k', 0xE4, 0xB8]), "ok");
        assert_eq!(buf.pending(), 2);
        assert_eq!(buf.finish(), 2);
        assert_eq!(buf.pending(), 0);
        // After finish the buffer starts clean.
        assert_eq!(buf.consume(b"next"), "next");
    }

    #[test]
    fn test_carry_resolves_to_replacement_when_invalid() {
        let mut buf = Utf8ReadBuffer::new();
        assert_eq!(buf.consume(&[0xE4, 0xB8]), "");
        // The continuation never arrives; the next chunk proves the
        // sequence invalid and it collapses to one replacement char.
        assert_eq!(buf.consume(b" done"), "\u{FFFD} done");
    }

    proptest! {
        /// Splitting a byte stream at an arbitrary point never changes
        /// the decoded output or the carried tail.
        #[test]
        fn prop_single_split_is_invisible(
            bytes in proptest::collection::vec(any::<u8>(), 0..512),
            cut in any::<proptest::sample::Index>(),
        ) {
            let cut = if bytes.is_empty() { 0 } else { cut.index(bytes.len() + 1) };

            let mut whole = Utf8ReadBuffer::new();
            let expected = whole.consume(&bytes);

            let mut split = Utf8ReadBuffer::new();
            let mut got = split.consume(&bytes[..cut]);
            got.push_str(&split.consume(&bytes[cut..]));

            prop_assert_eq!(&got, &expected);
            prop_assert_eq!(split.pending(), whole.pending());
        }

        /// Feeding byte-by-byte (the most hostile split schedule) agrees
        /// with decoding in one call.
        #[test]
        fn prop_byte_at_a_time_agrees(
            bytes in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let mut whole = Utf8ReadBuffer::new();
            let expected = whole.consume(&bytes);

            let mut split = Utf8ReadBuffer::new();
            let mut got = String::new();
            for b in &bytes {
                got.push_str(&split.consume(std::slice::from_ref(b)));
            }

            prop_assert_eq!(&got, &expected);
            prop_assert_eq!(split.pending(), whole.pending());
        }

        /// The carry is always under 4 bytes, whatever the input.
        #[test]
        fn prop_carry_bounded(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut buf = Utf8ReadBuffer::new();
            buf.consume(&bytes);
            prop_assert!(buf.pending() < 4);
        }
    }
}
