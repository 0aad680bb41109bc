//! Reassembly buffer for one fragmented inbound message.
//!
//! A [`ChunkedMessage`] collects the fragments of a single logical message,
//! keyed by chunk index, and concatenates them in ascending index order once
//! every fragment has arrived. Fragments may arrive in any order and from
//! multiple transport threads; an internal lock serializes insertion. The
//! buffer is single-use: [`reassemble`](ChunkedMessage::reassemble) empties it.

use std::collections::BTreeMap;
use std::sync::Mutex;

struct Fragments {
    /// Chunk index to fragment bytes. BTreeMap keeps ascending order for free.
    chunks: BTreeMap<usize, Vec<u8>>,
    /// Running total of fragment bytes, so reassembly allocates once.
    total_len: usize,
}

/// Partial state of one fragmented inbound message.
pub struct ChunkedMessage {
    num_chunks: usize,
    inner: Mutex<Fragments>,
}

impl ChunkedMessage {
    /// Create an empty buffer expecting `num_chunks` fragments.
    pub fn new(num_chunks: usize) -> Self {
        Self {
            num_chunks,
            inner: Mutex::new(Fragments {
                chunks: BTreeMap::new(),
                total_len: 0,
            }),
        }
    }

    /// Insert the fragment at `index`.
    ///
    /// Index uniqueness is the caller's concern: the owning channel keeps one
    /// buffer per key, and a transport that redelivers a fragment overwrites
    /// the identical bytes.
    pub fn add_chunk(&self, index: usize, data: Vec<u8>) {
        let mut inner = lock(&self.inner);
        inner.total_len += data.len();
        if let Some(prev) = inner.chunks.insert(index, data) {
            inner.total_len -= prev.len();
            tracing::warn!(index, "duplicate fragment overwritten");
        }
    }

    /// Expected fragment count.
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Number of fragments received so far.
    pub fn num_filled(&self) -> usize {
        lock(&self.inner).chunks.len()
    }

    /// Whether every expected fragment has arrived.
    pub fn is_full(&self) -> bool {
        lock(&self.inner).chunks.len() == self.num_chunks
    }

    /// Concatenate all fragments in ascending index order, emptying the buffer.
    pub fn reassemble(&self) -> Vec<u8> {
        let mut inner = lock(&self.inner);
        let mut out = Vec::with_capacity(inner.total_len);
        for (_, chunk) in std::mem::take(&mut inner.chunks) {
            out.extend_from_slice(&chunk);
        }
        inner.total_len = 0;
        out
    }
}

fn lock(m: &Mutex<Fragments>) -> std::sync::MutexGuard<'_, Fragments> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fills_and_reassembles_in_index_order() {
        let msg = ChunkedMessage::new(3);
        assert_eq!(msg.num_chunks(), 3);
        assert!(!msg.is_full());

        msg.add_chunk(2, vec![5, 6]);
        msg.add_chunk(0, vec![1, 2]);
        assert_eq!(msg.num_filled(), 2);
        assert!(!msg.is_full());

        msg.add_chunk(1, vec![3, 4]);
        assert!(msg.is_full());
        assert_eq!(msg.reassemble(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn reassemble_empties_the_buffer() {
        let msg = ChunkedMessage::new(1);
        msg.add_chunk(0, vec![9]);
        assert_eq!(msg.reassemble(), vec![9]);
        assert_eq!(msg.num_filled(), 0);
        assert!(msg.reassemble().is_empty());
    }

    #[test]
    fn empty_fragments_are_counted() {
        let msg = ChunkedMessage::new(2);
        msg.add_chunk(0, vec![]);
        msg.add_chunk(1, vec![7]);
        assert!(msg.is_full());
        assert_eq!(msg.reassemble(), vec![7]);
    }

    #[test]
    fn redelivered_fragment_does_not_inflate_totals() {
        let msg = ChunkedMessage::new(2);
        msg.add_chunk(0, vec![1, 2, 3]);
        msg.add_chunk(0, vec![1, 2, 3]);
        assert_eq!(msg.num_filled(), 1);
        msg.add_chunk(1, vec![4]);
        assert_eq!(msg.reassemble(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn concurrent_insertion_from_many_threads() {
        let msg = Arc::new(ChunkedMessage::new(64));
        std::thread::scope(|s| {
            for i in 0..64usize {
                let msg = Arc::clone(&msg);
                s.spawn(move || msg.add_chunk(i, vec![i as u8]));
            }
        });
        assert!(msg.is_full());
        let out = msg.reassemble();
        let expected: Vec<u8> = (0..64).map(|i| i as u8).collect();
        assert_eq!(out, expected);
    }
}
