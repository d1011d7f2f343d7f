// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors the scheduler cannot absorb on its own.

use crate::client::FrameSinkKind;

/// A policy failure with no further fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// Every frame-sink backend failed to initialize.
    #[error("frame sink creation failed {attempts} times, last backend {last_kind:?}")]
    FrameSinkCreationExhausted {
        /// Total failed attempts across all backends.
        attempts: u32,
        /// The backend that failed last.
        last_kind: FrameSinkKind,
    },
}
