//! Bounded FIFO of outbound frames per connection.
//!
//! `RingBuffer` holds already-serialized frames (raw bytes) so the write
//! pump never has to touch application types. Writes copy the caller's
//! slice in, so the caller is free to reuse its own scratch buffer
//! immediately after the call returns.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Presence, typing, read-receipt — fine to drop under backpressure.
    NonCritical,
    /// New messages, call signaling — backpressure closes the connection
    /// instead of silently dropping.
    Durable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    Full,
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buffer full")
    }
}

impl std::error::Error for BufferError {}

/// Bounded FIFO of outbound byte frames.
pub struct RingBuffer {
    frames: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Push a copy of `data` onto the back of the queue. Fails without
    /// mutating state if the buffer is already at capacity.
    pub fn write(&mut self, data: &[u8]) -> Result<(), BufferError> {
        if self.frames.len() >= self.capacity {
            return Err(BufferError::Full);
        }
        self.frames.push_back(data.to_vec());
        Ok(())
    }

    /// Pop the oldest frame without checking capacity (used to implement
    /// drop-oldest policy for non-critical frames).
    pub fn pop_oldest(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    /// Remove the oldest frame, then push `data`. Used for the
    /// drop-oldest-and-count-as-dropped backpressure policy.
    pub fn write_dropping_oldest(&mut self, data: &[u8]) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(data.to_vec());
    }

    pub fn read(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_is_exact() {
        let mut buf = RingBuffer::new(4);
        buf.write(b"hello").unwrap();
        assert_eq!(buf.read().unwrap(), b"hello".to_vec());
    }

    #[test]
    fn len_tracks_writes_up_to_capacity() {
        let mut buf = RingBuffer::new(4);
        for i in 0..4u8 {
            buf.write(&[i]).unwrap();
        }
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn capacity_exceeding_write_fails_without_mutation() {
        let mut buf = RingBuffer::new(2);
        buf.write(b"a").unwrap();
        buf.write(b"b").unwrap();
        let before = buf.len();
        assert_eq!(buf.write(b"c"), Err(BufferError::Full));
        assert_eq!(buf.len(), before);
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut buf = RingBuffer::new(8);
        for i in 0..5u8 {
            buf.write(&[i]).unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(buf.read().unwrap(), vec![i]);
        }
    }

    #[test]
    fn drop_oldest_evicts_front() {
        let mut buf = RingBuffer::new(2);
        buf.write(b"a").unwrap();
        buf.write(b"b").unwrap();
        buf.write_dropping_oldest(b"c");
        assert_eq!(buf.read().unwrap(), b"b".to_vec());
        assert_eq!(buf.read().unwrap(), b"c".to_vec());
    }
}
