// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Allocation failures.
//!
//! A purged chunk is not an error: [`DiscardableChunk::lock`] reports it
//! by returning `false`.
//!
//! [`DiscardableChunk::lock`]: crate::DiscardableChunk::lock

/// Why an allocation could not be satisfied.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Zero-byte chunks are not supported.
    #[error("cannot allocate a zero-sized discardable chunk")]
    ZeroSize,
    /// The backing storage could not be created.
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory {
        /// Bytes requested.
        requested: usize,
    },
    /// The segment provider refused to grant more memory.
    #[error("segment provider rejected {requested} bytes ({available} available)")]
    SegmentProviderRejected {
        /// Segment size requested.
        requested: usize,
        /// Bytes the provider could still grant.
        available: usize,
    },
}
