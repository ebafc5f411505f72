//! Reusable byte-buffer pool for the read pump.
//!
//! Grounded on the shrink/reuse discipline of
//! [`crate::utils::adaptive_buffer`]: rather than allocate a fresh `Vec<u8>`
//! for every inbound frame, the read pump checks out a buffer here and
//! returns it when done. Buffers that don't match the pool's fixed size are
//! dropped instead of reinserted — no partial reuse.

use std::sync::Mutex;

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
const DEFAULT_POOL_CAPACITY: usize = 64;

pub struct BufferPool {
    buffer_size: usize,
    max_pooled: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            buffer_size,
            max_pooled,
            free: Mutex::new(Vec::with_capacity(max_pooled)),
        }
    }

    /// Check out a buffer, allocating a new one if the pool is empty.
    pub fn acquire(&self) -> Vec<u8> {
        let mut free = self.free.lock().expect("pool mutex poisoned");
        free.pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_size))
    }

    /// Return a buffer to the pool. Buffers whose capacity doesn't match
    /// this pool's fixed size are dropped rather than reinserted.
    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        if buf.capacity() != self.buffer_size {
            return;
        }
        let mut free = self.free.lock().expect("pool mutex poisoned");
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    pub fn pooled_count(&self) -> usize {
        self.free.lock().expect("pool mutex poisoned").len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffer_is_reused() {
        let pool = BufferPool::new(1024, 4);
        let buf = pool.acquire();
        assert_eq!(buf.capacity(), 1024);
        pool.release(buf);
        assert_eq!(pool.pooled_count(), 1);
        let buf2 = pool.acquire();
        assert_eq!(pool.pooled_count(), 0);
        assert_eq!(buf2.capacity(), 1024);
    }

    #[test]
    fn out_of_size_buffer_is_dropped_not_pooled() {
        let pool = BufferPool::new(1024, 4);
        let odd = Vec::with_capacity(32);
        pool.release(odd);
        assert_eq!(pool.pooled_count(), 0);
    }

    #[test]
    fn pool_respects_max_capacity() {
        let pool = BufferPool::new(64, 2);
        for _ in 0..5 {
            pool.release(Vec::with_capacity(64));
        }
        assert_eq!(pool.pooled_count(), 2);
    }
}
