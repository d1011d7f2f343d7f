// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Proxy failures.

use cadence_core::SchedulerError;

/// Errors surfaced to the main thread.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The impl thread could not be started.
    #[error("failed to spawn the impl thread")]
    ImplThreadSpawn(#[source] std::io::Error),
    /// The impl thread exited or stopped answering.
    #[error("the impl thread is gone")]
    ImplThreadGone,
    /// The impl-side scheduler hit an unrecoverable policy failure.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
