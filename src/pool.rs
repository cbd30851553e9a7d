// src/pool.rs

//! Chunk buffer pool.
//!
//! Upload sessions lease one fixed-size buffer at a time, fill it, freeze it,
//! and hand it to a part-upload task. The pool keeps returned buffers around
//! so steady-state uploads do not allocate per chunk. The pool is passed
//! explicitly (`Arc<BufferPool>`) by whichever scope constructs the sessions;
//! there is no process-wide instance.

use std::sync::Mutex;

use bytes::{Bytes, BytesMut};

/// Lease/return pool of fixed-size chunk buffers.
pub struct BufferPool {
    chunk_size: usize,
    capacity: usize,
    free: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    /// Creates a pool for buffers of `chunk_size` bytes, keeping at most
    /// `capacity` free buffers for reuse.
    pub fn new(chunk_size: usize, capacity: usize) -> Self {
        Self {
            chunk_size,
            capacity,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Pool sized from the object store configuration.
    pub fn from_config(config: &crate::config::ObjectStoreConfig) -> Self {
        Self::new(config.part_size, config.pool_capacity)
    }

    /// Size of every buffer handed out by this pool.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Takes a cleared buffer with `chunk_size` capacity, allocating only
    /// when the free list is empty.
    pub fn lease(&self) -> BytesMut {
        let reused = self.free.lock().expect("buffer pool lock poisoned").pop();
        match reused {
            Some(buf) => buf,
            None => BytesMut::with_capacity(self.chunk_size),
        }
    }

    /// Returns a leased buffer to the pool. Buffers beyond `capacity` or of
    /// the wrong size are dropped.
    pub fn give(&self, mut buf: BytesMut) {
        if buf.capacity() < self.chunk_size {
            return;
        }
        buf.clear();
        let mut free = self.free.lock().expect("buffer pool lock poisoned");
        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    /// Reclaims a frozen chunk after its part upload completed.
    ///
    /// Succeeds only when the caller holds the last reference to the bytes;
    /// otherwise the memory is released normally and the pool refills by
    /// allocation on the next lease.
    pub fn recycle(&self, payload: Bytes) {
        if let Ok(buf) = payload.try_into_mut() {
            self.give(buf);
        }
    }

    /// Number of free buffers currently held.
    pub fn available(&self) -> usize {
        self.free.lock().expect("buffer pool lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_allocates_when_empty() {
        let pool = BufferPool::new(64, 2);
        let buf = pool.lease();
        assert_eq!(buf.capacity(), 64);
        assert!(buf.is_empty());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_give_and_reuse() {
        let pool = BufferPool::new(64, 2);
        let mut buf = pool.lease();
        buf.extend_from_slice(b"data");
        pool.give(buf);
        assert_eq!(pool.available(), 1);

        let buf = pool.lease();
        // Returned cleared, same backing capacity
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 64);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_capacity_bound() {
        let pool = BufferPool::new(8, 1);
        pool.give(BytesMut::with_capacity(8));
        pool.give(BytesMut::with_capacity(8));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_undersized_buffer_dropped() {
        let pool = BufferPool::new(64, 2);
        pool.give(BytesMut::with_capacity(8));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_recycle_sole_reference() {
        let pool = BufferPool::new(16, 2);
        let mut buf = pool.lease();
        buf.extend_from_slice(b"0123456789abcdef");
        let payload = buf.freeze();
        pool.recycle(payload);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_recycle_shared_reference_drops() {
        let pool = BufferPool::new(16, 2);
        let mut buf = pool.lease();
        buf.extend_from_slice(b"0123456789abcdef");
        let payload = buf.freeze();
        let held = payload.clone();
        pool.recycle(payload);
        assert_eq!(pool.available(), 0);
        drop(held);
    }
}
