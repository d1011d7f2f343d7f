// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Block-granular span allocator over host-granted segments.
//!
//! The heap hands out [`HeapSpan`]s, which are block ranges inside a
//! segment's bytes, and keeps a free list ordered by
//! `(segment, start)` so that a released span can be merged with its
//! neighbours in `O(log n)`. A segment whose last span is released goes
//! back to the [`SegmentProvider`].

use std::collections::BTreeMap;
use std::fmt;

use crate::error::AllocError;
use crate::segment::{Segment, SegmentId, SegmentProvider};

/// A block range inside one segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapSpan {
    segment: SegmentId,
    start: usize,
    blocks: usize,
}

impl HeapSpan {
    /// Segment the span lives in.
    #[must_use]
    pub const fn segment(&self) -> SegmentId {
        self.segment
    }

    /// First block, relative to the segment start.
    #[must_use]
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Length in blocks.
    #[must_use]
    pub const fn blocks(&self) -> usize {
        self.blocks
    }
}

struct SegmentEntry {
    segment: Segment,
    used_blocks: usize,
}

/// Sub-allocates spans from segments obtained from a [`SegmentProvider`].
pub struct DiscardableMemoryHeap {
    block_size: usize,
    min_segment_blocks: usize,
    provider: Box<dyn SegmentProvider>,
    segments: BTreeMap<SegmentId, SegmentEntry>,
    /// Free ranges keyed by `(segment, start block)`, valued by length.
    free: BTreeMap<(SegmentId, usize), usize>,
}

impl fmt::Debug for DiscardableMemoryHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscardableMemoryHeap")
            .field("block_size", &self.block_size)
            .field("min_segment_blocks", &self.min_segment_blocks)
            .field("segments", &self.segments.len())
            .field("free_spans", &self.free.len())
            .finish_non_exhaustive()
    }
}

impl DiscardableMemoryHeap {
    /// Creates an empty heap.
    ///
    /// `block_size` is clamped to at least one byte. Segments are at least
    /// `min_segment_size` bytes, rounded up to whole blocks.
    #[must_use]
    pub fn new(
        block_size: usize,
        min_segment_size: usize,
        provider: Box<dyn SegmentProvider>,
    ) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            min_segment_blocks: min_segment_size.div_ceil(block_size).max(1),
            provider,
            segments: BTreeMap::new(),
            free: BTreeMap::new(),
        }
    }

    /// Bytes per block.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Allocates a span of at least `bytes` bytes.
    ///
    /// Reuses the smallest free range that fits; otherwise asks the provider
    /// for a new segment.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ZeroSize`] for `bytes == 0`.
    /// - [`AllocError::OutOfMemory`] if the segment size overflows.
    /// - Whatever the provider returns when it refuses a segment.
    pub fn allocate(&mut self, bytes: usize) -> Result<HeapSpan, AllocError> {
        if bytes == 0 {
            return Err(AllocError::ZeroSize);
        }
        let blocks = bytes.div_ceil(self.block_size);

        let best_fit = self
            .free
            .iter()
            .filter(|&(_, &len)| len >= blocks)
            .min_by_key(|&(&key, &len)| (len, key))
            .map(|(&key, &len)| (key, len));
        if let Some(((segment, start), len)) = best_fit {
            self.free.remove(&(segment, start));
            return Ok(self.carve(segment, start, len, blocks));
        }

        let segment_blocks = blocks.max(self.min_segment_blocks);
        let segment_bytes = segment_blocks
            .checked_mul(self.block_size)
            .ok_or(AllocError::OutOfMemory { requested: bytes })?;
        let segment = self.provider.allocate_segment(segment_bytes)?;
        let id = segment.id();
        tracing::debug!(
            segment = id.0,
            bytes = segment_bytes,
            "discardable heap grew"
        );
        self.segments.insert(
            id,
            SegmentEntry {
                segment,
                used_blocks: 0,
            },
        );
        Ok(self.carve(id, 0, segment_blocks, blocks))
    }

    /// Takes `blocks` from the front of a free range of `len` blocks.
    fn carve(&mut self, segment: SegmentId, start: usize, len: usize, blocks: usize) -> HeapSpan {
        if len > blocks {
            self.free.insert((segment, start + blocks), len - blocks);
        }
        if let Some(entry) = self.segments.get_mut(&segment) {
            entry.used_blocks += blocks;
        }
        HeapSpan {
            segment,
            start,
            blocks,
        }
    }

    /// Returns a span to the free list, merging it with adjacent free ranges.
    pub fn release(&mut self, span: HeapSpan) {
        let HeapSpan {
            segment,
            mut start,
            mut blocks,
        } = span;

        debug_assert!(
            self.segments.contains_key(&segment),
            "released a span from an unknown segment"
        );
        let Some(entry) = self.segments.get_mut(&segment) else {
            return;
        };
        debug_assert!(
            entry.used_blocks >= blocks,
            "released more blocks than are in use"
        );
        entry.used_blocks = entry.used_blocks.saturating_sub(blocks);

        if entry.used_blocks == 0 {
            // The span plus its neighbours now cover the whole segment.
            self.free.retain(|&(id, _), _| id != segment);
            if let Some(entry) = self.segments.remove(&segment) {
                tracing::debug!(
                    segment = segment.0,
                    bytes = entry.segment.size(),
                    "discardable heap released segment"
                );
                self.provider.release_segment(entry.segment);
            }
            return;
        }

        let previous = self
            .free
            .range(..(segment, start))
            .next_back()
            .filter(|&(&(id, prev_start), &len)| id == segment && prev_start + len == start)
            .map(|(&key, &len)| (key, len));
        if let Some((key, len)) = previous {
            self.free.remove(&key);
            start = key.1;
            blocks += len;
        }
        if let Some(len) = self.free.remove(&(segment, start + blocks)) {
            blocks += len;
        }
        self.free.insert((segment, start), blocks);
    }

    /// Byte range of `span` within its segment.
    fn byte_range(&self, span: &HeapSpan) -> core::ops::Range<usize> {
        let start = span.start * self.block_size;
        start..start + span.blocks * self.block_size
    }

    /// The bytes `span` covers, or `None` if its segment is gone.
    #[must_use]
    pub fn bytes(&self, span: &HeapSpan) -> Option<&[u8]> {
        let range = self.byte_range(span);
        self.segments
            .get(&span.segment)
            .and_then(|entry| entry.segment.bytes().get(range))
    }

    /// The bytes `span` covers, mutably.
    pub fn bytes_mut(&mut self, span: &HeapSpan) -> Option<&mut [u8]> {
        let range = self.byte_range(span);
        self.segments
            .get_mut(&span.segment)
            .and_then(|entry| entry.segment.bytes_mut().get_mut(range))
    }

    /// Number of segments held from the provider.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Bytes held from the provider.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.segments.values().map(|e| e.segment.size()).sum()
    }

    /// Bytes in free ranges.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free.values().sum::<usize>() * self.block_size
    }

    /// Number of free ranges.
    #[must_use]
    pub fn free_span_count(&self) -> usize {
        self.free.len()
    }

    /// Bytes covered by `span`.
    #[must_use]
    pub const fn span_bytes(&self, span: &HeapSpan) -> usize {
        span.blocks * self.block_size
    }
}
