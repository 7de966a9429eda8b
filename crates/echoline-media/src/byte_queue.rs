//! A byte-level FIFO used to accumulate raw utterance audio as it streams in.

use std::collections::VecDeque;

/// Append-and-pop byte buffer backed by a `VecDeque`.
#[derive(Debug, Default)]
pub struct ByteQueue {
    buf: VecDeque<u8>,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend(data.iter().copied());
    }

    /// Remove and return up to `n` bytes from the front.
    pub fn pop(&mut self, n: usize) -> Vec<u8> {
        let take = n.min(self.buf.len());
        self.buf.drain(..take).collect()
    }

    /// Return up to `n` bytes from the front without removing them.
    pub fn peek(&self, n: usize) -> Vec<u8> {
        let take = n.min(self.buf.len());
        self.buf.iter().take(take).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_pop_preserves_order() {
        let mut q = ByteQueue::new();
        q.append(&[1, 2, 3]);
        q.append(&[4, 5]);
        assert_eq!(q.len(), 5);
        assert_eq!(q.pop(3), vec![1, 2, 3]);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(10), vec![4, 5]);
        assert!(q.is_empty());
    }

    #[test]
    fn peek_does_not_consume() {
        let mut q = ByteQueue::new();
        q.append(&[9, 8, 7]);
        assert_eq!(q.peek(2), vec![9, 8]);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn clear_empties_queue() {
        let mut q = ByteQueue::new();
        q.append(&[1, 2, 3]);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.to_bytes(), Vec::<u8>::new());
    }
}
