//! Chunked multi-frame payload transfer bookkeeping, shared by the
//! Session/Connection/Parameter states in both [`crate::master`] and
//! [`crate::slave`].
//!
//! A payload larger than the configured per-frame data size (the
//! `SafePara` block in particular) is walked one `data_size`-sized chunk
//! per cycle. `ChunkCursor` is the `BytesToBeSent`-style remainder
//! counter from §4.5/§4.6, factored out so master and slave don't each
//! reimplement the same offset arithmetic.

/// Tracks progress of one direction (send or receive) of a chunked
/// transfer against a fixed total length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCursor {
    offset: usize,
    total: usize,
}

impl ChunkCursor {
    pub const fn new(total: usize) -> Self {
        ChunkCursor { offset: 0, total }
    }

    pub const fn offset(&self) -> usize {
        self.offset
    }

    pub const fn total(&self) -> usize {
        self.total
    }

    /// Bytes not yet accounted for (`BytesToBeSent`).
    pub const fn remaining(&self) -> usize {
        self.total - self.offset
    }

    pub const fn done(&self) -> bool {
        self.offset >= self.total
    }

    /// Length of the next chunk to send/expect, bounded by both the
    /// remaining total and the configured per-frame data size.
    pub const fn next_chunk_len(&self, data_size: usize) -> usize {
        let remaining = self.remaining();
        if data_size < remaining {
            data_size
        } else {
            remaining
        }
    }

    pub fn advance(&mut self, n: usize) {
        self.offset = (self.offset + n).min(self.total);
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_to_completion_in_even_chunks() {
        let mut c = ChunkCursor::new(6);
        assert_eq!(c.next_chunk_len(4), 4);
        c.advance(4);
        assert!(!c.done());
        assert_eq!(c.next_chunk_len(4), 2);
        c.advance(2);
        assert!(c.done());
    }

    #[test]
    fn single_byte_chunks_need_two_steps_for_a_two_byte_total() {
        let mut c = ChunkCursor::new(2);
        assert_eq!(c.next_chunk_len(1), 1);
        c.advance(1);
        assert!(!c.done());
        assert_eq!(c.next_chunk_len(1), 1);
        c.advance(1);
        assert!(c.done());
    }
}
