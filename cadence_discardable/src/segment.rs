// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Segments: the units of memory the host grants to the heap.
//!
//! In a multi-process setup the host is a privileged process handing out
//! shared-memory regions; in-process, [`LocalSegmentProvider`] plays that
//! role and can be capped to model a host that runs out.

use core::fmt;

use crate::error::AllocError;

/// Identity of a segment, unique per provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

/// A granted segment and the bytes backing it.
#[derive(PartialEq, Eq)]
pub struct Segment {
    id: SegmentId,
    memory: Box<[u8]>,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl Segment {
    /// Wraps `memory` granted under `id`. Called by providers.
    #[must_use]
    pub const fn new(id: SegmentId, memory: Box<[u8]>) -> Self {
        Self { id, memory }
    }

    /// The segment's identity.
    #[must_use]
    pub const fn id(&self) -> SegmentId {
        self.id
    }

    /// Size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.memory.len()
    }

    /// The backing bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.memory
    }

    /// The backing bytes, mutably.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }
}

/// The host side of the heap: grants and takes back segments.
pub trait SegmentProvider: Send {
    /// Grants a zeroed segment of exactly `size` bytes.
    ///
    /// # Errors
    ///
    /// - [`AllocError::SegmentProviderRejected`] when the host will not
    ///   grant more memory.
    /// - [`AllocError::OutOfMemory`] when the backing storage cannot be
    ///   created.
    fn allocate_segment(&mut self, size: usize) -> Result<Segment, AllocError>;

    /// Takes back a segment the heap no longer uses.
    fn release_segment(&mut self, segment: Segment);

    /// Bytes currently granted.
    fn granted_bytes(&self) -> usize;
}

/// An in-process provider with an optional cap on granted bytes.
pub struct LocalSegmentProvider {
    next_id: u64,
    granted: usize,
    cap: Option<usize>,
}

impl fmt::Debug for LocalSegmentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSegmentProvider")
            .field("granted", &self.granted)
            .field("cap", &self.cap)
            .finish_non_exhaustive()
    }
}

impl LocalSegmentProvider {
    /// A provider without a cap.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_id: 0,
            granted: 0,
            cap: None,
        }
    }

    /// A provider that refuses to grant more than `cap` bytes in total.
    #[must_use]
    pub const fn with_cap(cap: usize) -> Self {
        Self {
            next_id: 0,
            granted: 0,
            cap: Some(cap),
        }
    }
}

impl Default for LocalSegmentProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentProvider for LocalSegmentProvider {
    fn allocate_segment(&mut self, size: usize) -> Result<Segment, AllocError> {
        if let Some(cap) = self.cap {
            let available = cap.saturating_sub(self.granted);
            if size > available {
                return Err(AllocError::SegmentProviderRejected {
                    requested: size,
                    available,
                });
            }
        }
        let mut memory = Vec::new();
        if memory.try_reserve_exact(size).is_err() {
            tracing::warn!(bytes = size, "segment allocation out of memory");
            return Err(AllocError::OutOfMemory { requested: size });
        }
        memory.resize(size, 0);

        self.granted += size;
        self.next_id += 1;
        Ok(Segment::new(
            SegmentId(self.next_id),
            memory.into_boxed_slice(),
        ))
    }

    fn release_segment(&mut self, segment: Segment) {
        debug_assert!(
            segment.size() <= self.granted,
            "released more than was granted"
        );
        self.granted = self.granted.saturating_sub(segment.size());
    }

    fn granted_bytes(&self) -> usize {
        self.granted
    }
}
