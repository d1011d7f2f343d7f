// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The two halves of the embedder the proxy connects.

use cadence_core::begin_frame::BeginFrameArgs;
use cadence_core::client::{DrawResult, FrameSinkKind};
use cadence_core::state_machine::CommitEarlyOutReason;
use kurbo::Size;

/// Main-thread content producer.
pub trait LayerTreeHost {
    /// Content handed to the impl thread at commit.
    type Commit: Send + 'static;
    /// The surface frames are submitted into, created on the main thread.
    type FrameSink: Send + 'static;

    /// Runs animation, layout and paint for `args`.
    ///
    /// Returns the content to commit, or why there is nothing to commit.
    fn begin_main_frame(&mut self, args: &BeginFrameArgs) -> Result<Self::Commit, CommitEarlyOutReason>;

    /// The impl thread finished copying the last commit.
    fn did_commit(&mut self) {}

    /// Creates a frame sink for `kind`. `None` reports failure.
    fn create_frame_sink(&mut self, kind: FrameSinkKind) -> Option<Self::FrameSink>;

    /// The impl thread lost its frame sink; a new one will be requested.
    fn did_lose_frame_sink(&mut self) {}
}

/// Impl-thread consumer: owns the pending and active trees and draws.
pub trait LayerTreeHostImpl: Send + 'static {
    /// Must match [`LayerTreeHost::Commit`].
    type Commit: Send + 'static;
    /// Must match [`LayerTreeHost::FrameSink`].
    type FrameSink: Send + 'static;

    /// Binds a freshly created frame sink. Returns `false` on failure.
    fn initialize_frame_sink(&mut self, sink: Self::FrameSink) -> bool;

    /// Copies committed content into the pending tree.
    fn commit(&mut self, content: Self::Commit);

    /// Promotes the pending tree to active.
    fn activate(&mut self);

    /// Draws the active tree. `forced` draws whatever is resident.
    fn draw(&mut self, forced: bool) -> DrawResult;

    /// Schedules raster work.
    fn prepare_tiles(&mut self) {}

    /// Ticks impl-side animations. Returns `true` if a redraw is needed.
    fn animate(&mut self, args: &BeginFrameArgs) -> bool {
        _ = args;
        false
    }

    /// The viewport changed.
    fn set_viewport_size(&mut self, size: Size) {
        _ = size;
    }
}
