//! # Block Buffer Pool
//!
//! Pre-allocated pool of block-sized buffers backing the allocator contract's
//! buffer lease operations.
//!
//! ## Purpose
//!
//! Tree descent holds one block buffer per level; without pooling, every
//! recursion level would heap-allocate a fresh block copy. The pool hands out
//! reusable buffers and takes them back when they are dropped, so steady-state
//! operation performs no buffer allocation at all.
//!
//! ## Usage
//!
//! ```ignore
//! let pool = BufferPool::new(4096, 16); // 16 pre-allocated 4KiB buffers
//!
//! let mut buf = pool.acquire();
//! allocator.read(index, &mut buf)?;
//!
//! // Buffer automatically returns to the pool when dropped
//! drop(buf);
//! ```
//!
//! ## Design
//!
//! The pool uses lock sharding (16 shards) to reduce contention when several
//! trees backed by the same allocator operate concurrently. Buffer size is a
//! runtime value because the block size is decided by the allocator, not at
//! compile time.
//!
//! `PooledBuffer` uses `ManuallyDrop` instead of `Option` so that a leased
//! buffer is valid for its entire lifetime with no unwrap points.

use parking_lot::Mutex;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of shards for the buffer pool to reduce lock contention.
const BUFFER_POOL_SHARD_COUNT: usize = 16;

/// A pool of reusable block-sized buffers.
///
/// Buffers are returned to the pool when dropped. Cloning the pool yields a
/// handle to the same shared buffers.
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    shards: [Mutex<Vec<Box<[u8]>>>; BUFFER_POOL_SHARD_COUNT],
    /// Round-robin counter for distributing acquire requests across shards
    next_shard: AtomicUsize,
    buf_size: usize,
}

impl BufferPool {
    /// Create a new pool of `buf_size`-byte buffers with `initial_capacity`
    /// of them pre-allocated, distributed evenly across shards.
    pub fn new(buf_size: usize, initial_capacity: usize) -> Self {
        let shards: [Mutex<Vec<Box<[u8]>>>; BUFFER_POOL_SHARD_COUNT] =
            std::array::from_fn(|_| Mutex::new(Vec::new()));

        let per_shard = initial_capacity / BUFFER_POOL_SHARD_COUNT;
        let remainder = initial_capacity % BUFFER_POOL_SHARD_COUNT;

        for (i, shard) in shards.iter().enumerate() {
            let count = per_shard + usize::from(i < remainder);
            let mut guard = shard.lock();
            for _ in 0..count {
                guard.push(vec![0u8; buf_size].into_boxed_slice());
            }
        }

        Self {
            inner: Arc::new(BufferPoolInner {
                shards,
                next_shard: AtomicUsize::new(0),
                buf_size,
            }),
        }
    }

    /// Acquire a buffer from the pool.
    ///
    /// Uses round-robin shard selection. If the selected shard is empty, a
    /// new buffer is allocated. The buffer is returned to its shard when
    /// dropped. Contents are whatever the previous user left behind; callers
    /// overwrite before reading.
    pub fn acquire(&self) -> PooledBuffer {
        let shard_idx =
            self.inner.next_shard.fetch_add(1, Ordering::Relaxed) % BUFFER_POOL_SHARD_COUNT;

        let buffer = {
            let mut shard = self.inner.shards[shard_idx].lock();
            shard.pop()
        };

        let buffer =
            buffer.unwrap_or_else(|| vec![0u8; self.inner.buf_size].into_boxed_slice());

        PooledBuffer {
            buffer: ManuallyDrop::new(buffer),
            pool: Arc::clone(&self.inner),
            shard_idx,
        }
    }

    /// Size in bytes of every buffer handed out by this pool.
    pub fn buf_size(&self) -> usize {
        self.inner.buf_size
    }

    /// Current number of idle buffers across all shards.
    pub fn available(&self) -> usize {
        self.inner.shards.iter().map(|s| s.lock().len()).sum()
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buf_size", &self.inner.buf_size)
            .field("available", &self.available())
            .finish()
    }
}

/// A block buffer that returns to its pool when dropped.
///
/// Provides `Deref` and `DerefMut` to the underlying `[u8]`.
pub struct PooledBuffer {
    /// Always valid until Drop; ManuallyDrop lets Drop take ownership
    /// without moving out of self.
    buffer: ManuallyDrop<Box<[u8]>>,
    pool: Arc<BufferPoolInner>,
    /// The shard this buffer returns to
    shard_idx: usize,
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buffer.len())
            .field("shard_idx", &self.shard_idx)
            .finish()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        // SAFETY: called exactly once; self.buffer is never touched again.
        let buffer = unsafe { ManuallyDrop::take(&mut self.buffer) };
        self.pool.shards[self.shard_idx].lock().push(buffer);
    }
}
