// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Discardable memory: buffers the allocator may reclaim while unlocked.
//!
//! A [`DiscardableChunk`] is created locked. Unlocking it tells the
//! allocator the contents can be regenerated if needed; relocking returns
//! `false` when they were purged in the meantime.
//!
//! ```
//! use cadence_discardable::{DiscardableConfig, DiscardableMemoryAllocator};
//!
//! let allocator = DiscardableMemoryAllocator::new(DiscardableConfig::default());
//! let mut chunk = allocator.allocate_locked(4096)?;
//! chunk.data_mut()[0] = 7;
//! chunk.unlock();
//!
//! if chunk.lock() {
//!     assert_eq!(chunk.data()[0], 7, "nothing forced a purge");
//! } else {
//!     // Purged: drop the chunk and regenerate the contents.
//! }
//! # Ok::<(), cadence_discardable::AllocError>(())
//! ```
//!
//! The allocator keeps resident bytes near [`DiscardableConfig::budget_bytes`]
//! by purging unlocked chunks, oldest unlock first, on every allocation and
//! unlock. Chunks are sub-allocated by a [`DiscardableMemoryHeap`] from
//! segments granted by a [`SegmentProvider`].

mod allocator;
mod error;
mod heap;
mod segment;

pub use allocator::{
    AllocatorStats, ChunkData, ChunkDataMut, DiscardableChunk, DiscardableConfig,
    DiscardableMemoryAllocator,
};
pub use error::AllocError;
pub use heap::{DiscardableMemoryHeap, HeapSpan};
pub use segment::{LocalSegmentProvider, Segment, SegmentId, SegmentProvider};
