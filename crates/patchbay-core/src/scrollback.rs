//! Bounded scrollback of decoded output, replayable to late subscribers.
//!
//! Chunks carry monotonically increasing sequence numbers so a
//! subscriber can stitch a replayed snapshot together with the live
//! stream: anything below the snapshot's `next_seq` is already in the
//! replay and can be discarded from the live side.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct ScrollbackChunk {
    seq: u64,
    text: String,
}

/// A replayed snapshot: the concatenated retained text plus the
/// sequence window it covers. `start_seq` is the first retained chunk;
/// `next_seq` is the sequence the next live chunk will carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayChunk {
    pub start_seq: u64,
    pub next_seq: u64,
    pub text: String,
}

/// Byte-bounded chunk history for one session.
#[derive(Debug)]
pub struct ScrollbackBuffer {
    chunks: VecDeque<ScrollbackChunk>,
    /// Sequence of the oldest retained chunk.
    start_seq: u64,
    /// Sequence the next pushed chunk will be assigned.
    next_seq: u64,
    total_bytes: usize,
    max_bytes: usize,
}

impl ScrollbackBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            start_seq: 0,
            next_seq: 0,
            total_bytes: 0,
            max_bytes,
        }
    }

    /// Append a chunk and return the sequence number it was assigned.
    /// Oldest chunks are evicted once the byte bound is exceeded, but
    /// the newest chunk is always retained even when it alone exceeds
    /// the bound.
    pub fn push(&mut self, text: String) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.total_bytes += text.len();
        self.chunks.push_back(ScrollbackChunk { seq, text });

        while self.total_bytes > self.max_bytes && self.chunks.len() > 1 {
            if let Some(evicted) = self.chunks.pop_front() {
                self.total_bytes -= evicted.text.len();
                self.start_seq = evicted.seq + 1;
            }
        }
        seq
    }

    /// Snapshot the retained history for replay.
    pub fn replay(&self) -> ReplayChunk {
        let mut text = String::with_capacity(self.total_bytes);
        for chunk in &self.chunks {
            text.push_str(&chunk.text);
        }
        ReplayChunk {
            start_seq: self.start_seq,
            next_seq: self.next_seq,
            text,
        }
    }

    pub fn retained_bytes(&self) -> usize {
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_monotonic_from_zero() {
        let mut buffer = ScrollbackBuffer::new(1024);
        assert_eq!(buffer.push("a".to_string()), 0);
        assert_eq!(buffer.push("b".to_string()), 1);
        assert_eq!(buffer.push("c".to_string()), 2);
        let replay = buffer.replay();
        assert_eq!(replay.start_seq, 0);
        assert_eq!(replay.next_seq, 3);
        assert_eq!(replay.text, "abc");
    }

    #[test]
    fn test_eviction_advances_start_seq() {
        let mut buffer = ScrollbackBuffer::new(10);
        buffer.push("aaaa".to_string());
        buffer.push("bbbb".to_string());
        buffer.push("cccc".to_string());

        let replay = buffer.replay();
        assert_eq!(replay.text, "bbbbcccc");
        assert_eq!(replay.start_seq, 1);
        assert_eq!(replay.next_seq, 3);
        assert!(buffer.retained_bytes() <= 10);
    }

    #[test]
    fn test_oversized_chunk_is_still_retained() {
        let mut buffer = ScrollbackBuffer::new(4);
        buffer.push("0123456789".to_string());
        let replay = buffer.replay();
        assert_eq!(replay.text, "0123456789");
        assert_eq!(replay.start_seq, 0);
    }

    #[test]
    fn test_empty_buffer_replay() {
        let buffer = ScrollbackBuffer::new(64);
        let replay = buffer.replay();
        assert_eq!(replay.start_seq, 0);
        assert_eq!(replay.next_seq, 0);
        assert!(replay.text.is_empty());
    }

    #[test]
    fn test_sequence_survives_full_turnover() {
        let mut buffer = ScrollbackBuffer::new(8);
        for i in 0..100 {
            buffer.push(format!("chunk{i:03}"));
        }
        let replay = buffer.replay();
        assert_eq!(replay.next_seq, 100);
        assert_eq!(replay.start_seq, 99);
        assert_eq!(replay.text, "chunk099");
    }
}
