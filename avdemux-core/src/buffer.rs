//! # Buffer Pool
//!
//! Scratch buffers for box downloads and access unit payloads. The pool is
//! created by the caller and handed to the demuxer, so its lifetime and
//! allocation limit are owned by whoever builds the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{DemuxError, Result};

pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_buffer_bytes: usize,
    allocated: AtomicU64,
    recycled: AtomicU64,
}

impl BufferPool {
    /// Create a pool seeded with `initial_buffers` empty buffers.
    pub fn new(max_buffer_bytes: usize, initial_buffers: usize) -> Self {
        let buffers = (0..initial_buffers).map(|_| Vec::new()).collect();
        Self {
            buffers: Mutex::new(buffers),
            max_buffer_bytes,
            allocated: AtomicU64::new(initial_buffers as u64),
            recycled: AtomicU64::new(0),
        }
    }

    /// Get a zeroed buffer of exactly `len` bytes.
    pub fn acquire(&self, len: usize) -> Result<Vec<u8>> {
        if len > self.max_buffer_bytes {
            return Err(DemuxError::Allocation {
                requested: len,
                limit: self.max_buffer_bytes,
            });
        }

        let mut pool = self.buffers.lock();
        // Prefer a buffer that can hold `len` without growing.
        let pick = pool
            .iter()
            .position(|b| b.capacity() >= len)
            .or_else(|| if pool.is_empty() { None } else { Some(pool.len() - 1) });

        match pick {
            Some(index) => {
                let mut buffer = pool.swap_remove(index);
                drop(pool);
                self.recycled.fetch_add(1, Ordering::Relaxed);
                buffer.clear();
                buffer.resize(len, 0);
                Ok(buffer)
            }
            None => {
                drop(pool);
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Ok(vec![0u8; len])
            }
        }
    }

    /// Return a buffer to the pool.
    pub fn release(&self, buffer: Vec<u8>) {
        if buffer.capacity() <= self.max_buffer_bytes {
            self.buffers.lock().push(buffer);
        }
    }

    pub fn max_buffer_bytes(&self) -> usize {
        self.max_buffer_bytes
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.buffers.lock().len(),
            total_allocated: self.allocated.load(Ordering::Relaxed),
            total_recycled: self.recycled.load(Ordering::Relaxed),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub available: usize,
    pub total_allocated: u64,
    pub total_recycled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_reuse() {
        let pool = BufferPool::new(1024, 0);

        let b1 = pool.acquire(100).unwrap();
        assert_eq!(b1.len(), 100);
        let ptr = b1.as_ptr();
        pool.release(b1);

        let b2 = pool.acquire(50).unwrap();
        assert_eq!(b2.len(), 50);
        assert_eq!(b2.as_ptr(), ptr);
        assert!(b2.iter().all(|&b| b == 0));

        let stats = pool.stats();
        assert_eq!(stats.total_allocated, 1);
        assert_eq!(stats.total_recycled, 1);
    }

    #[test]
    fn test_refuses_oversized_request() {
        let pool = BufferPool::new(16, 2);
        let err = pool.acquire(17).unwrap_err();
        assert!(matches!(err, DemuxError::Allocation { requested: 17, limit: 16 }));
        assert_eq!(pool.stats().available, 2);
    }
}
