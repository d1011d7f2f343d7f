// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The shared allocator and its chunk handles.
//!
//! All bookkeeping and every chunk's bytes live behind one `Mutex`. A chunk
//! is a [`HeapSpan`] inside a segment granted by the provider; its bytes are
//! reached through [`ChunkData`] and [`ChunkDataMut`], which hold that lock.
//! Purging a chunk returns its span to the heap, and a later
//! [`DiscardableChunk::lock`] reports that the contents are gone.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::AllocError;
use crate::heap::{DiscardableMemoryHeap, HeapSpan};
use crate::segment::{LocalSegmentProvider, SegmentProvider};

/// Allocator configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscardableConfig {
    /// Resident-byte goal. Locked chunks may push usage above it.
    pub budget_bytes: usize,
    /// Heap block granularity.
    pub block_size: usize,
    /// Smallest segment requested from the provider.
    pub min_segment_size: usize,
}

impl Default for DiscardableConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 128 * 1024 * 1024,
            block_size: 4096,
            min_segment_size: 4 * 1024 * 1024,
        }
    }
}

/// A snapshot of allocator bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Bytes of chunks whose storage has not been purged.
    pub total_resident_bytes: usize,
    /// Bytes of currently locked chunks.
    pub locked_bytes: usize,
    /// Unlocked chunks that still hold their storage.
    pub unlocked_chunk_count: usize,
    /// Live chunk handles, purged or not.
    pub chunk_count: usize,
    /// Chunks purged since creation.
    pub purge_count: u64,
    /// Bytes held from the segment provider.
    pub reserved_bytes: usize,
    /// Current budget.
    pub budget_bytes: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChunkState {
    Locked,
    Unlocked { seq: u64 },
    Purged,
}

struct ChunkEntry {
    size: usize,
    /// `None` once purged.
    span: Option<HeapSpan>,
    state: ChunkState,
}

struct State {
    heap: DiscardableMemoryHeap,
    chunks: HashMap<u64, ChunkEntry>,
    /// Unlocked chunks, oldest unlock first.
    lru: BTreeMap<u64, u64>,
    next_id: u64,
    next_seq: u64,
    budget: usize,
    resident: usize,
    locked: usize,
    purge_count: u64,
}

impl State {
    /// Purges the chunk that was unlocked longest ago.
    fn purge_oldest(&mut self) -> bool {
        let Some((_, id)) = self.lru.pop_first() else {
            return false;
        };
        let Some(entry) = self.chunks.get_mut(&id) else {
            return false;
        };
        debug_assert!(
            matches!(entry.state, ChunkState::Unlocked { .. }),
            "only unlocked chunks are in the LRU"
        );
        entry.state = ChunkState::Purged;
        if let Some(span) = entry.span.take() {
            self.heap.release(span);
        }
        self.resident -= entry.size;
        self.purge_count += 1;
        tracing::trace!(chunk = id, bytes = entry.size, "purged discardable chunk");
        true
    }

    /// Purges oldest-first until `resident + incoming` fits the budget.
    fn enforce_budget(&mut self, incoming: usize) {
        let before = self.purge_count;
        while self.resident + incoming > self.budget {
            if !self.purge_oldest() {
                break;
            }
        }
        let purged = self.purge_count - before;
        if purged > 0 {
            tracing::debug!(
                purged,
                resident = self.resident,
                budget = self.budget,
                "discardable budget enforced"
            );
        }
    }

    /// The first `size` bytes of `id`'s span.
    fn chunk_bytes(&self, id: u64, size: usize) -> &[u8] {
        let span = self.chunks.get(&id).and_then(|entry| entry.span);
        span.and_then(|span| self.heap.bytes(&span))
            .and_then(|bytes| bytes.get(..size))
            .unwrap_or_default()
    }

    fn chunk_bytes_mut(&mut self, id: u64, size: usize) -> &mut [u8] {
        let span = self.chunks.get(&id).and_then(|entry| entry.span);
        span.and_then(|span| self.heap.bytes_mut(&span))
            .and_then(|bytes| bytes.get_mut(..size))
            .unwrap_or_default()
    }

    fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            total_resident_bytes: self.resident,
            locked_bytes: self.locked,
            unlocked_chunk_count: self.lru.len(),
            chunk_count: self.chunks.len(),
            purge_count: self.purge_count,
            reserved_bytes: self.heap.reserved_bytes(),
            budget_bytes: self.budget,
        }
    }
}

fn lock_state(shared: &Mutex<State>) -> MutexGuard<'_, State> {
    // Bookkeeping is updated before any call that can panic.
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hands out locked [`DiscardableChunk`]s under a resident-byte budget.
///
/// Safe to share across threads by reference; chunks may be moved to other
/// threads. Dropping the allocator while a chunk is still locked is a
/// contract violation.
pub struct DiscardableMemoryAllocator {
    shared: Arc<Mutex<State>>,
}

impl fmt::Debug for DiscardableMemoryAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscardableMemoryAllocator")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl DiscardableMemoryAllocator {
    /// Creates an allocator backed by an uncapped [`LocalSegmentProvider`].
    #[must_use]
    pub fn new(config: DiscardableConfig) -> Self {
        Self::with_provider(config, Box::new(LocalSegmentProvider::new()))
    }

    /// Creates an allocator backed by `provider`.
    #[must_use]
    pub fn with_provider(config: DiscardableConfig, provider: Box<dyn SegmentProvider>) -> Self {
        let heap =
            DiscardableMemoryHeap::new(config.block_size, config.min_segment_size, provider);
        Self {
            shared: Arc::new(Mutex::new(State {
                heap,
                chunks: HashMap::new(),
                lru: BTreeMap::new(),
                next_id: 0,
                next_seq: 0,
                budget: config.budget_bytes,
                resident: 0,
                locked: 0,
                purge_count: 0,
            })),
        }
    }

    /// Allocates a chunk of `size` zeroed bytes, returned locked.
    ///
    /// Purges unlocked chunks, oldest unlock first, while the new chunk
    /// would push resident bytes over budget. Locked chunks are never
    /// purged.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ZeroSize`] for `size == 0`.
    /// - [`AllocError::OutOfMemory`] when backing storage cannot be created.
    /// - [`AllocError::SegmentProviderRejected`] when the host refuses.
    pub fn allocate_locked(&self, size: usize) -> Result<DiscardableChunk, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let mut state = lock_state(&self.shared);
        state.enforce_budget(size);

        let span = state.heap.allocate(size)?;
        // Reused spans still hold a purged chunk's bytes.
        if let Some(bytes) = state.heap.bytes_mut(&span) {
            bytes.fill(0);
        }

        state.next_id += 1;
        let id = state.next_id;
        state.chunks.insert(
            id,
            ChunkEntry {
                size,
                span: Some(span),
                state: ChunkState::Locked,
            },
        );
        state.resident += size;
        state.locked += size;
        drop(state);

        Ok(DiscardableChunk {
            id,
            size,
            locked: true,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Changes the budget and purges down to it.
    pub fn set_budget(&self, budget_bytes: usize) {
        let mut state = lock_state(&self.shared);
        state.budget = budget_bytes;
        state.enforce_budget(0);
    }

    /// Purges every unlocked chunk, for memory-pressure notifications.
    ///
    /// Returns the number of chunks purged.
    pub fn purge_all_unlocked(&self) -> usize {
        let mut state = lock_state(&self.shared);
        let mut purged = 0;
        while state.purge_oldest() {
            purged += 1;
        }
        if purged > 0 {
            tracing::debug!(purged, "purged all unlocked discardable chunks");
        }
        purged
    }

    /// Current bookkeeping.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        lock_state(&self.shared).stats()
    }
}

impl Drop for DiscardableMemoryAllocator {
    fn drop(&mut self) {
        let state = lock_state(&self.shared);
        debug_assert!(
            state.locked == 0,
            "discardable allocator dropped with {} locked bytes",
            state.locked
        );
    }
}

/// A fixed-size buffer that may be purged while unlocked.
///
/// Created locked. [`data`](Self::data) is only valid while locked. When
/// [`lock`](Self::lock) returns `false` the contents are gone for good and
/// the chunk should be dropped and a new one allocated.
pub struct DiscardableChunk {
    id: u64,
    size: usize,
    locked: bool,
    shared: Arc<Mutex<State>>,
}

impl fmt::Debug for DiscardableChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscardableChunk")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

impl DiscardableChunk {
    /// Size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether the chunk is locked.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Re-locks the chunk.
    ///
    /// Returns `false` if the contents were purged since the last unlock.
    ///
    /// # Panics
    ///
    /// Panics if the chunk is already locked.
    pub fn lock(&mut self) -> bool {
        assert!(!self.is_locked(), "discardable chunk locked twice");
        let mut state = lock_state(&self.shared);
        let Some(entry) = state.chunks.get_mut(&self.id) else {
            return false;
        };
        let ChunkState::Unlocked { seq } = entry.state else {
            return false;
        };
        entry.state = ChunkState::Locked;
        let size = entry.size;
        state.lru.remove(&seq);
        state.locked += size;
        self.locked = true;
        true
    }

    /// Marks the chunk reclaimable and enforces the budget.
    ///
    /// # Panics
    ///
    /// Panics if the chunk is not locked.
    pub fn unlock(&mut self) {
        assert!(self.locked, "unlocked a discardable chunk that is not locked");
        self.locked = false;
        let mut state = lock_state(&self.shared);
        let seq = state.next_seq;
        state.next_seq += 1;
        if let Some(entry) = state.chunks.get_mut(&self.id) {
            entry.state = ChunkState::Unlocked { seq };
            let size = entry.size;
            state.lru.insert(seq, self.id);
            state.locked -= size;
        }
        state.enforce_budget(0);
    }

    /// The chunk's bytes.
    ///
    /// The view holds the allocator lock: drop it before calling into the
    /// allocator or another chunk from the same thread.
    ///
    /// # Panics
    ///
    /// Panics if the chunk is not locked.
    #[must_use]
    pub fn data(&self) -> ChunkData<'_> {
        assert!(self.locked, "discardable chunk data read while unlocked");
        ChunkData {
            state: lock_state(&self.shared),
            id: self.id,
            size: self.size,
        }
    }

    /// The chunk's bytes, mutably. Holds the allocator lock like
    /// [`data`](Self::data).
    ///
    /// # Panics
    ///
    /// Panics if the chunk is not locked.
    pub fn data_mut(&mut self) -> ChunkDataMut<'_> {
        assert!(self.locked, "discardable chunk data written while unlocked");
        ChunkDataMut {
            state: lock_state(&self.shared),
            id: self.id,
            size: self.size,
        }
    }
}

/// Read access to a locked chunk's bytes.
pub struct ChunkData<'a> {
    state: MutexGuard<'a, State>,
    id: u64,
    size: usize,
}

impl fmt::Debug for ChunkData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkData")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl Deref for ChunkData<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.state.chunk_bytes(self.id, self.size)
    }
}

/// Write access to a locked chunk's bytes.
pub struct ChunkDataMut<'a> {
    state: MutexGuard<'a, State>,
    id: u64,
    size: usize,
}

impl fmt::Debug for ChunkDataMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkDataMut")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl Deref for ChunkDataMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.state.chunk_bytes(self.id, self.size)
    }
}

impl DerefMut for ChunkDataMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.state.chunk_bytes_mut(self.id, self.size)
    }
}

impl Drop for DiscardableChunk {
    fn drop(&mut self) {
        let mut state = lock_state(&self.shared);
        let Some(entry) = state.chunks.remove(&self.id) else {
            return;
        };
        match entry.state {
            ChunkState::Locked => {
                state.locked -= entry.size;
                state.resident -= entry.size;
            }
            ChunkState::Unlocked { seq } => {
                state.lru.remove(&seq);
                state.resident -= entry.size;
            }
            ChunkState::Purged => {}
        }
        if let Some(span) = entry.span {
            state.heap.release(span);
        }
    }
}
