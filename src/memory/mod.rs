//! # Memory Utilities
//!
//! Reusable buffer management for the block engine.
//!
//! Every tree operation leases one block-sized scratch buffer per tree level
//! from a [`BufferPool`]; the pool keeps those allocations out of the hot
//! path. Buffers return to the pool automatically when dropped, on every
//! exit path including errors and early scan aborts.

mod pool;

pub use pool::{BufferPool, PooledBuffer};
