// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scheduler instrumentation.
//!
//! The core is `no_std`, so it does not log. Instead the
//! [`Scheduler`](crate::scheduler::Scheduler) reports structured events to a
//! [`TraceSink`]. Every sink method has a no-op default, so a sink only
//! implements the events it cares about.
//!
//! Without the `trace` feature the [`Tracer`] holds no sink and every
//! emission compiles to nothing.

#[cfg(feature = "trace")]
use alloc::boxed::Box;

use crate::begin_frame::BeginFrameArgs;
use crate::client::{DrawResult, FrameSinkKind};
use crate::state_machine::{Action, DeadlineMode, ForcedRedrawOnTimeoutState};
use crate::time::HostTime;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What the scheduler did with an incoming begin frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeginFrameDisposition {
    /// A begin-impl-frame was started with it.
    Started,
    /// Queued until the frame in progress finishes.
    Deferred,
    /// Nothing needed a frame.
    Dropped,
    /// Its deadline passed while it was queued.
    Expired,
    /// Skipped so the impl thread can catch up.
    SkippedForLatency,
}

/// A begin frame reached the scheduler.
#[derive(Clone, Copy, Debug)]
pub struct BeginFrameEvent {
    /// The args as delivered by the source.
    pub args: BeginFrameArgs,
    /// When the scheduler looked at it.
    pub now: HostTime,
    /// What happened to it.
    pub disposition: BeginFrameDisposition,
}

/// An action was dispatched to the client.
#[derive(Clone, Copy, Debug)]
pub struct ActionEvent {
    /// Begin-impl-frame counter at dispatch time.
    pub frame_number: u64,
    /// The dispatched action.
    pub action: Action,
    /// Dispatch time.
    pub now: HostTime,
}

/// The deadline of the current frame was scheduled or fired.
#[derive(Clone, Copy, Debug)]
pub struct DeadlineEvent {
    /// Begin-impl-frame counter.
    pub frame_number: u64,
    /// Mode the deadline was computed in.
    pub mode: DeadlineMode,
    /// When the deadline task runs; `None` when no task is posted.
    pub at: Option<HostTime>,
    /// When the event was recorded.
    pub now: HostTime,
}

/// The forced-redraw state changed.
#[derive(Clone, Copy, Debug)]
pub struct ForcedRedrawEvent {
    /// The new state.
    pub state: ForcedRedrawOnTimeoutState,
    /// When the change was observed.
    pub now: HostTime,
}

/// Step in the frame-sink lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSinkOutcome {
    /// Creation was requested from the client.
    Requested,
    /// Creation finished.
    Created,
    /// Creation failed; another attempt follows.
    Failed,
    /// The frame sink was lost.
    Lost,
}

/// A frame-sink lifecycle event.
#[derive(Clone, Copy, Debug)]
pub struct FrameSinkEvent {
    /// Backend involved.
    pub kind: FrameSinkKind,
    /// Consecutive failures with this backend so far.
    pub failures: u32,
    /// What happened.
    pub outcome: FrameSinkOutcome,
}

/// Everything that happened during one begin-impl-frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameSummary {
    /// Begin-impl-frame counter.
    pub frame_number: u64,
    /// Source sequence number of the args.
    pub sequence: u64,
    /// Frame time of the args.
    pub frame_time: HostTime,
    /// Last deadline mode chosen for the frame.
    pub deadline_mode: DeadlineMode,
    /// A begin-main-frame was sent.
    pub sent_begin_main_frame: bool,
    /// A commit happened.
    pub committed: bool,
    /// The pending tree was activated.
    pub activated: bool,
    /// Outcome of the draw, if one was attempted.
    pub draw_result: Option<DrawResult>,
    /// The frame finished after its deadline.
    pub missed_deadline: bool,
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Receiver of scheduler events.
pub trait TraceSink {
    /// A begin frame was received.
    fn on_begin_frame(&mut self, e: &BeginFrameEvent) {
        _ = e;
    }

    /// An action was dispatched.
    fn on_action(&mut self, e: &ActionEvent) {
        _ = e;
    }

    /// A deadline was (re)scheduled.
    fn on_deadline_scheduled(&mut self, e: &DeadlineEvent) {
        _ = e;
    }

    /// The deadline task ran.
    fn on_deadline_fired(&mut self, e: &DeadlineEvent) {
        _ = e;
    }

    /// The forced-redraw state changed.
    fn on_forced_redraw(&mut self, e: &ForcedRedrawEvent) {
        _ = e;
    }

    /// The next begin-main-frame will be skipped to reduce latency.
    fn on_skip_begin_main_frame(&mut self, now: HostTime) {
        _ = now;
    }

    /// A frame-sink lifecycle step.
    fn on_frame_sink(&mut self, e: &FrameSinkEvent) {
        _ = e;
    }

    /// A begin-impl-frame finished.
    fn on_frame_summary(&mut self, e: &FrameSummary) {
        _ = e;
    }
}

/// A sink that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer
// ---------------------------------------------------------------------------

/// Owned, optional handle to a [`TraceSink`].
pub struct Tracer {
    #[cfg(feature = "trace")]
    sink: Option<Box<dyn TraceSink>>,
    #[cfg(not(feature = "trace"))]
    _private: (),
}

impl core::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut s = f.debug_struct("Tracer");
        #[cfg(feature = "trace")]
        s.field("active", &self.sink.is_some());
        s.finish_non_exhaustive()
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::none()
    }
}

impl Tracer {
    /// A tracer that forwards to `sink`.
    ///
    /// Without the `trace` feature the sink is dropped immediately.
    #[cfg(feature = "trace")]
    #[must_use]
    pub fn new(sink: Box<dyn TraceSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// A tracer that forwards to `sink`.
    ///
    /// Without the `trace` feature the sink is dropped immediately.
    #[cfg(not(feature = "trace"))]
    #[must_use]
    pub fn new<T>(sink: T) -> Self {
        drop(sink);
        Self::none()
    }

    /// A tracer that records nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            #[cfg(feature = "trace")]
            sink: None,
            #[cfg(not(feature = "trace"))]
            _private: (),
        }
    }

    #[cfg(feature = "trace")]
    fn with_sink(&mut self, f: impl FnOnce(&mut dyn TraceSink)) {
        if let Some(sink) = self.sink.as_deref_mut() {
            f(sink);
        }
    }

    /// Emits a begin-frame event.
    #[inline]
    pub fn begin_frame(&mut self, e: &BeginFrameEvent) {
        #[cfg(feature = "trace")]
        self.with_sink(|s| s.on_begin_frame(e));
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits an action event.
    #[inline]
    pub fn action(&mut self, e: &ActionEvent) {
        #[cfg(feature = "trace")]
        self.with_sink(|s| s.on_action(e));
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a deadline-scheduled event.
    #[inline]
    pub fn deadline_scheduled(&mut self, e: &DeadlineEvent) {
        #[cfg(feature = "trace")]
        self.with_sink(|s| s.on_deadline_scheduled(e));
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a deadline-fired event.
    #[inline]
    pub fn deadline_fired(&mut self, e: &DeadlineEvent) {
        #[cfg(feature = "trace")]
        self.with_sink(|s| s.on_deadline_fired(e));
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a forced-redraw event.
    #[inline]
    pub fn forced_redraw(&mut self, e: &ForcedRedrawEvent) {
        #[cfg(feature = "trace")]
        self.with_sink(|s| s.on_forced_redraw(e));
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a latency-recovery skip.
    #[inline]
    pub fn skip_begin_main_frame(&mut self, now: HostTime) {
        #[cfg(feature = "trace")]
        self.with_sink(|s| s.on_skip_begin_main_frame(now));
        #[cfg(not(feature = "trace"))]
        {
            _ = now;
        }
    }

    /// Emits a frame-sink event.
    #[inline]
    pub fn frame_sink(&mut self, e: &FrameSinkEvent) {
        #[cfg(feature = "trace")]
        self.with_sink(|s| s.on_frame_sink(e));
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a frame summary.
    #[inline]
    pub fn frame_summary(&mut self, e: &FrameSummary) {
        #[cfg(feature = "trace")]
        self.with_sink(|s| s.on_frame_summary(e));
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }
}

// ---------------------------------------------------------------------------
// Summary builder
// ---------------------------------------------------------------------------

/// Accumulates a [`FrameSummary`] while a begin-impl-frame runs.
#[derive(Clone, Copy, Debug)]
pub struct FrameSummaryBuilder {
    summary: FrameSummary,
    deadline: HostTime,
}

impl FrameSummaryBuilder {
    /// Starts a summary for frame `frame_number` running with `args`.
    #[must_use]
    pub fn new(frame_number: u64, args: &BeginFrameArgs) -> Self {
        Self {
            summary: FrameSummary {
                frame_number,
                sequence: args.sequence(),
                frame_time: args.frame_time(),
                deadline_mode: DeadlineMode::None,
                sent_begin_main_frame: false,
                committed: false,
                activated: false,
                draw_result: None,
                missed_deadline: false,
            },
            deadline: args.deadline(),
        }
    }

    /// Notes a dispatched action.
    pub fn record_action(&mut self, action: Action) {
        match action {
            Action::SendBeginMainFrame => self.summary.sent_begin_main_frame = true,
            Action::Commit => self.summary.committed = true,
            Action::ActivateSyncTree => self.summary.activated = true,
            _ => {}
        }
    }

    /// Notes the deadline mode in effect.
    pub fn set_deadline_mode(&mut self, mode: DeadlineMode) {
        self.summary.deadline_mode = mode;
    }

    /// Notes the outcome of a draw.
    pub fn set_draw_result(&mut self, result: DrawResult) {
        self.summary.draw_result = Some(result);
    }

    /// Completes the summary for a frame that finished at `now`.
    #[must_use]
    pub fn finish(mut self, now: HostTime) -> FrameSummary {
        self.summary.missed_deadline = now > self.deadline;
        self.summary
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
