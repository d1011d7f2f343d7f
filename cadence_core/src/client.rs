// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Capabilities the [`Scheduler`](crate::scheduler::Scheduler) drives.
//!
//! Rather than one large callback interface, the scheduler needs four narrow
//! capabilities. Each can be implemented (and mocked) on its own; anything
//! that implements all four is a [`SchedulerClient`].
//!
//! | Trait | Actions |
//! |---|---|
//! | [`FrameSinkLifecycle`] | `BEGIN_COMPOSITOR_FRAME_SINK_CREATION`, `INVALIDATE_COMPOSITOR_FRAME_SINK` |
//! | [`DrawExecutor`] | `DRAW_IF_POSSIBLE`, `DRAW_FORCED`, `DRAW_ABORT`, `PREPARE_TILES` |
//! | [`CommitCoordinator`] | `SEND_BEGIN_MAIN_FRAME`, `COMMIT`, `ACTIVATE_SYNC_TREE` |
//! | [`FrameObserver`] | frame boundary notifications (all optional) |

use crate::begin_frame::BeginFrameArgs;

/// Outcome of a draw attempt, reported by the draw backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrawResult {
    /// A frame was drawn and submitted.
    Success,
    /// Content needed by running animations was not rasterized.
    AbortedCheckerboardAnimations,
    /// High-resolution content required for this draw was missing (for
    /// example, its backing memory was purged).
    AbortedMissingHighResContent,
    /// Drawing was not possible at all (no viewport, no resources).
    AbortedCantDraw,
    /// The frame sink's context was lost mid-draw.
    AbortedContextLost,
    /// The draw was skipped to let the pipeline drain; counts as success.
    AbortedDrainingPipeline,
}

impl DrawResult {
    /// Returns `true` for outcomes that satisfy the pending redraw.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::AbortedDrainingPipeline)
    }
}

/// The backend a frame sink is created with.
///
/// Creation escalates from [`Gpu`](Self::Gpu) to [`Software`](Self::Software)
/// after repeated failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FrameSinkKind {
    /// Accelerated output.
    #[default]
    Gpu,
    /// CPU output; the last resort.
    Software,
}

impl FrameSinkKind {
    /// The kind to try once this one has been exhausted.
    #[must_use]
    pub const fn fallback(self) -> Option<Self> {
        match self {
            Self::Gpu => Some(Self::Software),
            Self::Software => None,
        }
    }
}

/// Creates and invalidates the surface frames are submitted into.
pub trait FrameSinkLifecycle {
    /// Starts asynchronous creation of a frame sink of the given kind.
    ///
    /// Completion is reported later through
    /// [`Scheduler::did_create_and_initialize_frame_sink`](crate::scheduler::Scheduler::did_create_and_initialize_frame_sink)
    /// or [`Scheduler::did_fail_to_initialize_frame_sink`](crate::scheduler::Scheduler::did_fail_to_initialize_frame_sink).
    fn begin_frame_sink_creation(&mut self, kind: FrameSinkKind);

    /// Asks a synchronous embedder to schedule a draw.
    fn invalidate_frame_sink(&mut self) {}
}

/// Draws the active tree and manages tile work.
pub trait DrawExecutor {
    /// Draws if everything needed is resident.
    fn draw_if_possible(&mut self) -> DrawResult;

    /// Draws whatever the active tree holds, checkerboarding if necessary.
    fn draw_forced(&mut self) -> DrawResult;

    /// Prioritizes and schedules raster work for the current trees.
    fn prepare_tiles(&mut self);

    /// Called when a pending draw is dropped instead of executed.
    fn draw_aborted(&mut self) {}
}

/// Moves content from the main thread into the impl-side trees.
pub trait CommitCoordinator {
    /// Asks the main thread to produce a new frame of content.
    fn send_begin_main_frame(&mut self, args: &BeginFrameArgs);

    /// Copies the main thread's ready content into the pending tree.
    fn commit(&mut self);

    /// Promotes the pending tree to the active tree.
    fn activate_sync_tree(&mut self);
}

/// Frame boundary notifications; every method is optional.
pub trait FrameObserver {
    /// A begin-impl-frame is starting with `args`.
    fn will_begin_impl_frame(&mut self, args: &BeginFrameArgs) {
        _ = args;
    }

    /// The begin-impl-frame in progress has finished.
    fn did_finish_impl_frame(&mut self) {}

    /// No begin frame is expected for a while; idle work may run.
    fn begin_frame_not_expected_soon(&mut self) {}
}

/// Everything the scheduler needs from its owner.
pub trait SchedulerClient:
    FrameSinkLifecycle + DrawExecutor + CommitCoordinator + FrameObserver
{
}

impl<T> SchedulerClient for T where
    T: FrameSinkLifecycle + DrawExecutor + CommitCoordinator + FrameObserver
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draining_pipeline_counts_as_success() {
        assert!(DrawResult::Success.is_success(), "success");
        assert!(DrawResult::AbortedDrainingPipeline.is_success(), "draining");
        assert!(
            !DrawResult::AbortedMissingHighResContent.is_success(),
            "missing content must be retried"
        );
    }

    #[test]
    fn gpu_falls_back_to_software_once() {
        assert_eq!(FrameSinkKind::Gpu.fallback(), Some(FrameSinkKind::Software));
        assert_eq!(FrameSinkKind::Software.fallback(), None);
    }
}
