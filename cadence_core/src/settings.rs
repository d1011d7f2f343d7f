// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tunable scheduling policy.
//!
//! Every numeric threshold the state machine and scheduler consult lives in
//! [`SchedulerSettings`], so embedders can tune deadline slack, recovery
//! thresholds, and fallback behavior without touching the decision logic.

use crate::time::Duration;

/// Configuration for the [`SchedulerStateMachine`](crate::state_machine::SchedulerStateMachine)
/// and [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SchedulerSettings {
    /// Allow a new begin-main-frame to be sent while the previous commit is
    /// still waiting for activation.
    pub main_frame_before_activation_enabled: bool,
    /// Abort an in-flight commit rather than wait for it before recreating a
    /// lost frame sink.
    pub abort_commit_before_frame_sink_creation: bool,
    /// The embedder drives draws itself (no deadline task); enables
    /// `INVALIDATE_COMPOSITOR_FRAME_SINK`.
    pub using_synchronous_compositor: bool,
    /// After activation, hold draws (and the deadline) until the active tree
    /// reports ready to draw.
    pub wait_for_ready_to_draw: bool,
    /// Skip begin-main-frames or begin-impl-frames to claw back latency when
    /// a pipeline stage has fallen one frame behind.
    pub enable_latency_recovery: bool,
    /// Pace frames to the begin-frame source. When `false` frames are
    /// produced back to back.
    pub throttle_frame_production: bool,
    /// Safety margin subtracted from the deadline on top of the draw
    /// estimate.
    pub deadline_fudge: Duration,
    /// The estimated time the parent compositor needs, as a fraction
    /// `interval / parent_draw_divisor`, is reserved at the end of each
    /// interval when sources build their deadline.
    pub parent_draw_divisor: u32,
    /// Consecutive checkerboarded draws tolerated before forcing a redraw.
    pub max_failed_draws_before_forced_redraw: u32,
    /// Consecutive deadlines a begin-main-frame may stay outstanding before
    /// the forced-redraw path engages.
    pub commit_stall_deadlines_before_forced_redraw: u32,
    /// How long forced-redraw mode waits for a commit or activation before
    /// drawing whatever the active tree holds.
    pub forced_redraw_timeout: Duration,
    /// Submitted frames allowed to be awaiting an ack before draws throttle.
    pub max_pending_submit_frames: u32,
    /// Consecutive frame-sink creation failures tolerated per
    /// [`FrameSinkKind`](crate::client::FrameSinkKind) before falling back.
    pub frame_sink_attempts_per_kind: u32,
    /// EMA smoothing factor for timing estimates (0.0–1.0).
    pub ema_alpha: f32,
}

impl SchedulerSettings {
    /// Default settings for a threaded compositor with a deadline task.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            main_frame_before_activation_enabled: false,
            abort_commit_before_frame_sink_creation: true,
            using_synchronous_compositor: false,
            wait_for_ready_to_draw: false,
            enable_latency_recovery: true,
            throttle_frame_production: true,
            deadline_fudge: Duration::from_millis(1),
            parent_draw_divisor: 3,
            max_failed_draws_before_forced_redraw: 3,
            commit_stall_deadlines_before_forced_redraw: 4,
            forced_redraw_timeout: Duration::from_millis(100),
            max_pending_submit_frames: 1,
            frame_sink_attempts_per_kind: 5,
            ema_alpha: 0.2,
        }
    }

    /// Settings for an embedder that draws synchronously on request.
    #[must_use]
    pub const fn synchronous() -> Self {
        let mut settings = Self::new();
        settings.using_synchronous_compositor = true;
        settings.enable_latency_recovery = false;
        settings
    }

    /// Time reserved for the parent compositor at the end of `interval`.
    #[must_use]
    pub const fn estimated_parent_draw_time(&self, interval: Duration) -> Duration {
        interval.div(self.parent_draw_divisor)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::new()
    }
}
