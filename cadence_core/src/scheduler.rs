// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The impl-thread frame scheduler.
//!
//! [`Scheduler`] owns time for the [`SchedulerStateMachine`]: it receives
//! begin frames from a [`BeginFrameSource`], adjusts their deadlines with
//! the [`CompositorTimingHistory`], schedules the deadline task, and drains
//! the state machine's actions into a [`SchedulerClient`].
//!
//! The scheduler performs no I/O and owns no threads. Timers are plain
//! timestamps: the embedder sleeps until [`Scheduler::next_wakeup`] and then
//! calls [`Scheduler::run_pending`].
//!
//! ```text
//!   source tick ──► begin_frame ──► BeginImplFrame ──► actions ──► deadline
//!                        │                                            │
//!                        └── busy: retro queue ◄── finish ◄── actions ┘
//! ```

use alloc::boxed::Box;
use alloc::collections::VecDeque;

use crate::begin_frame::{BeginFrameArgs, BeginFrameKind, BeginFrameTracker};
use crate::client::{DrawResult, FrameSinkKind, SchedulerClient};
use crate::error::SchedulerError;
use crate::settings::SchedulerSettings;
use crate::source::BeginFrameSource;
use crate::state_machine::{
    Action, BeginImplFrameState, CommitEarlyOutReason, DeadlineMode, SchedulerStateMachine,
};
use crate::time::{Clock, HostTime};
use crate::timing_history::CompositorTimingHistory;
use crate::trace::{
    ActionEvent, BeginFrameDisposition, BeginFrameEvent, DeadlineEvent, ForcedRedrawEvent,
    FrameSinkEvent, FrameSinkOutcome, FrameSummaryBuilder, TraceSink, Tracer,
};

/// Pending timer slots.
#[derive(Clone, Copy, Debug, Default)]
struct Timers {
    deadline: Option<HostTime>,
    retro_frame: Option<HostTime>,
    forced_redraw: Option<HostTime>,
}

impl Timers {
    fn earliest(&self) -> Option<HostTime> {
        [self.deadline, self.retro_frame, self.forced_redraw]
            .into_iter()
            .flatten()
            .min()
    }
}

/// Drives a [`SchedulerStateMachine`] from begin frames and timers.
pub struct Scheduler<C, S> {
    settings: SchedulerSettings,
    state: SchedulerStateMachine,
    client: C,
    source: S,
    clock: Box<dyn Clock>,
    timing: CompositorTimingHistory,
    tracker: BeginFrameTracker,
    retro_frames: VecDeque<BeginFrameArgs>,
    timers: Timers,
    deadline_mode: Option<DeadlineMode>,
    frame_sink_kind: FrameSinkKind,
    frame_sink_failures: u32,
    total_frame_sink_failures: u32,
    observing: bool,
    source_paused: bool,
    inside_process_scheduled_actions: bool,
    stopped: bool,
    summary: Option<FrameSummaryBuilder>,
    tracer: Tracer,
}

impl<C, S> core::fmt::Debug for Scheduler<C, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state)
            .field("tracker", &self.tracker)
            .field("retro_frames", &self.retro_frames.len())
            .field("timers", &self.timers)
            .field("deadline_mode", &self.deadline_mode)
            .field("frame_sink_kind", &self.frame_sink_kind)
            .field("observing", &self.observing)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl<C: SchedulerClient, S: BeginFrameSource> Scheduler<C, S> {
    /// Creates a scheduler. Nothing happens until the producer becomes
    /// visible.
    pub fn new(settings: SchedulerSettings, client: C, source: S, clock: Box<dyn Clock>) -> Self {
        Self {
            settings,
            state: SchedulerStateMachine::new(settings),
            client,
            source,
            clock,
            timing: CompositorTimingHistory::new(settings.ema_alpha),
            tracker: BeginFrameTracker::new(),
            retro_frames: VecDeque::new(),
            timers: Timers::default(),
            deadline_mode: None,
            frame_sink_kind: FrameSinkKind::default(),
            frame_sink_failures: 0,
            total_frame_sink_failures: 0,
            observing: false,
            source_paused: false,
            inside_process_scheduled_actions: false,
            stopped: false,
            summary: None,
            tracer: Tracer::none(),
        }
    }

    /// Routes scheduler events to `sink`. Only effective with the `trace`
    /// feature.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.tracer = Tracer::new(sink);
    }

    // -- accessors ----------------------------------------------------------

    /// The decision engine.
    #[must_use]
    pub fn state(&self) -> &SchedulerStateMachine {
        &self.state
    }

    /// The client actions are dispatched to.
    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The client actions are dispatched to.
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// The begin-frame source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The begin-frame source, for feeding vsync or re-aligning its cadence.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Stage duration estimates.
    #[must_use]
    pub fn timing_history(&self) -> &CompositorTimingHistory {
        &self.timing
    }

    /// The backend the next frame-sink creation will use.
    #[must_use]
    pub fn frame_sink_kind(&self) -> FrameSinkKind {
        self.frame_sink_kind
    }

    /// When the current frame's deadline task runs, if one is posted.
    #[must_use]
    pub fn begin_impl_frame_deadline(&self) -> Option<HostTime> {
        self.timers.deadline
    }

    /// Mode of the current frame's deadline.
    #[must_use]
    pub fn deadline_mode(&self) -> Option<DeadlineMode> {
        self.deadline_mode
    }

    /// Whether the scheduler is observing its begin-frame source.
    #[must_use]
    pub fn is_observing_begin_frames(&self) -> bool {
        self.observing
    }

    /// Begin frames queued behind the frame in progress.
    #[must_use]
    pub fn pending_retro_frames(&self) -> usize {
        self.retro_frames.len()
    }

    /// Whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    // -- time ---------------------------------------------------------------

    /// The earliest time [`run_pending`](Self::run_pending) has work.
    #[must_use]
    pub fn next_wakeup(&self) -> Option<HostTime> {
        if self.stopped {
            return None;
        }
        let source = if self.observing {
            self.source.next_tick_time()
        } else {
            None
        };
        [self.timers.earliest(), source].into_iter().flatten().min()
    }

    /// Runs every timer and source tick due at the current time, once each.
    ///
    /// Work that becomes due as a consequence (an immediate deadline of a
    /// frame started here, a queued retro frame) is left for the next call,
    /// so the embedder can service other messages in between.
    ///
    /// Returns `true` if anything ran.
    pub fn run_pending(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        let now = self.clock.now();
        let mut ran = false;

        let paused = self.source.is_paused();
        if paused != self.source_paused {
            self.set_begin_frame_source_paused(paused);
        }

        if self.timers.forced_redraw.is_some_and(|at| at <= now) {
            self.timers.forced_redraw = None;
            self.on_forced_redraw_timeout(now);
            ran = true;
        }

        if self.timers.deadline.is_some_and(|at| at <= now) {
            self.on_begin_impl_frame_deadline();
            ran = true;
        } else if self.timers.retro_frame.is_some_and(|at| at <= now) {
            self.timers.retro_frame = None;
            self.begin_retro_frame(now);
            ran = true;
        }

        if self.observing && self.source.next_tick_time().is_some_and(|at| at <= now) {
            if let Some(args) = self.source.poll(now) {
                self.begin_frame(args);
            }
            ran = true;
        }
        ran
    }

    // -- begin frames -------------------------------------------------------

    /// Delivers a begin frame.
    ///
    /// Frames nobody needs are dropped. Frames that arrive while another is
    /// in progress, or that replay a missed tick, are queued and started
    /// from [`run_pending`](Self::run_pending) once the scheduler is idle.
    pub fn begin_frame(&mut self, args: BeginFrameArgs) {
        if self.stopped || !args.is_valid() {
            return;
        }
        let now = self.clock.now();

        if !self.state.begin_frame_needed() {
            self.emit_begin_frame(args, now, BeginFrameDisposition::Dropped);
            self.source.did_finish_frame(now);
            self.setup_next_begin_frame_if_needed();
            return;
        }

        if self.settings.using_synchronous_compositor {
            self.emit_begin_frame(args, now, BeginFrameDisposition::Started);
            self.begin_impl_frame_synchronous(args, now);
            return;
        }

        let busy = self.state.begin_impl_frame_state() != BeginImplFrameState::Idle
            || !self.retro_frames.is_empty();
        if busy || args.kind() == BeginFrameKind::Missed {
            self.queue_retro_frame(args, now);
            return;
        }

        self.begin_impl_frame_with_deadline(args, now);
    }

    fn queue_retro_frame(&mut self, args: BeginFrameArgs, now: HostTime) {
        self.emit_begin_frame(args, now, BeginFrameDisposition::Deferred);
        self.retro_frames.push_back(args);
        if self.state.begin_impl_frame_state() == BeginImplFrameState::Idle {
            self.timers.retro_frame = Some(now);
        }
    }

    fn begin_retro_frame(&mut self, now: HostTime) {
        debug_assert_eq!(
            self.state.begin_impl_frame_state(),
            BeginImplFrameState::Idle,
            "retro frame started inside a frame"
        );
        // A burst of queued frames collapses to the first one still usable.
        while let Some(front) = self.retro_frames.front().copied() {
            if now <= front.deadline() {
                break;
            }
            self.retro_frames.pop_front();
            self.emit_begin_frame(front, now, BeginFrameDisposition::Expired);
        }
        let Some(args) = self.retro_frames.pop_front() else {
            return;
        };
        if self.settings.using_synchronous_compositor {
            self.begin_impl_frame_synchronous(args, now);
        } else {
            self.begin_impl_frame_with_deadline(args, now);
        }
    }

    fn begin_impl_frame_with_deadline(&mut self, args: BeginFrameArgs, now: HostTime) {
        let draw_estimate = self
            .timing
            .draw_duration_estimate()
            .saturating_add(self.settings.deadline_fudge);
        let adjusted = args.with_deadline_moved_earlier(draw_estimate);

        let main_frame_to_activate = self.timing.begin_main_frame_to_activate_estimate();
        let frame_budget = adjusted
            .deadline()
            .saturating_duration_since(adjusted.frame_time());
        self.state
            .set_critical_begin_main_frame_to_activate_is_fast(main_frame_to_activate < frame_budget);
        let can_activate_before_deadline =
            now.saturating_add(main_frame_to_activate) < adjusted.deadline();

        if self.should_recover_main_latency(can_activate_before_deadline) {
            self.state.set_skip_next_begin_main_frame_to_reduce_latency();
            self.tracer.skip_begin_main_frame(now);
        } else if self.should_recover_impl_latency(&adjusted, can_activate_before_deadline) {
            self.emit_begin_frame(args, now, BeginFrameDisposition::SkippedForLatency);
            self.source.did_finish_frame(now);
            return;
        }

        self.emit_begin_frame(args, now, BeginFrameDisposition::Started);
        self.begin_impl_frame(adjusted);
    }

    fn should_recover_main_latency(&self, can_activate_before_deadline: bool) -> bool {
        if !self.settings.enable_latency_recovery || self.state.impl_latency_takes_priority() {
            return false;
        }
        self.state.main_thread_missed_last_deadline() && can_activate_before_deadline
    }

    fn should_recover_impl_latency(
        &self,
        adjusted: &BeginFrameArgs,
        can_activate_before_deadline: bool,
    ) -> bool {
        if !self.settings.enable_latency_recovery || !self.settings.throttle_frame_production {
            return false;
        }
        // A full submit backlog at frame start means the impl side is a
        // frame behind.
        if !self.state.is_draw_throttled() {
            return false;
        }
        let can_draw_before_deadline = adjusted.frame_time() < adjusted.deadline();
        if self.state.impl_latency_takes_priority() || self.state.only_impl_side_updates_expected()
        {
            return can_draw_before_deadline;
        }
        can_activate_before_deadline
    }

    fn begin_impl_frame(&mut self, args: BeginFrameArgs) {
        self.tracker.start(args);
        self.deadline_mode = None;
        self.state.on_begin_impl_frame();
        self.summary = Some(FrameSummaryBuilder::new(
            self.state.current_frame_number(),
            &args,
        ));
        self.client.will_begin_impl_frame(&args);
        self.process_scheduled_actions();
    }

    fn begin_impl_frame_synchronous(&mut self, args: BeginFrameArgs, now: HostTime) {
        if self.state.begin_impl_frame_state() != BeginImplFrameState::Idle {
            self.queue_retro_frame(args, now);
            return;
        }
        self.begin_impl_frame(args);
        self.finish_impl_frame();
    }

    /// Runs the draw phase for a synchronous compositor.
    ///
    /// `resourceless` marks a software draw that needs no frame-sink
    /// resources and ignores the submit backlog.
    pub fn on_draw_for_frame_sink(&mut self, resourceless: bool) {
        debug_assert!(
            self.settings.using_synchronous_compositor,
            "on-demand draws need a synchronous compositor"
        );
        if self.stopped {
            return;
        }
        self.state.set_resourceless_software_draw(resourceless);
        let inside_frame = self.state.begin_impl_frame_state() != BeginImplFrameState::Idle;
        self.state.on_begin_impl_frame_deadline();
        self.process_scheduled_actions();
        if inside_frame {
            self.finish_impl_frame();
        } else {
            self.state.on_begin_impl_frame_idle();
            self.process_scheduled_actions();
        }
        self.state.set_resourceless_software_draw(false);
    }

    // -- deadline -----------------------------------------------------------

    fn schedule_begin_impl_frame_deadline_if_needed(&mut self) {
        // The synchronous draw phase is driven by the embedder.
        if self.settings.using_synchronous_compositor
            || self.state.begin_impl_frame_state() != BeginImplFrameState::InsideBeginFrame
        {
            return;
        }
        let mode = self.state.current_begin_impl_frame_deadline_mode();
        if self.deadline_mode == Some(mode) {
            return;
        }
        let Some(args) = self.tracker.current().copied() else {
            return;
        };
        let now = self.clock.now();
        let at = match mode {
            DeadlineMode::None | DeadlineMode::BlockedOnReadyToDraw => None,
            DeadlineMode::Immediate => Some(now),
            DeadlineMode::Regular => Some(args.deadline()),
            DeadlineMode::Late => Some(args.next_frame_time()),
        }
        .map(|at| at.min(args.next_frame_time()).max(now));

        self.deadline_mode = Some(mode);
        self.timers.deadline = at;
        if let Some(summary) = self.summary.as_mut() {
            summary.set_deadline_mode(mode);
        }
        self.tracer.deadline_scheduled(&DeadlineEvent {
            frame_number: self.state.current_frame_number(),
            mode,
            at,
            now,
        });
    }

    fn on_begin_impl_frame_deadline(&mut self) {
        self.timers.deadline = None;
        let now = self.clock.now();
        self.tracer.deadline_fired(&DeadlineEvent {
            frame_number: self.state.current_frame_number(),
            mode: self.deadline_mode.unwrap_or(DeadlineMode::None),
            at: Some(now),
            now,
        });
        self.state.on_begin_impl_frame_deadline();
        self.process_scheduled_actions();
        self.finish_impl_frame();
    }

    fn finish_impl_frame(&mut self) {
        self.state.on_begin_impl_frame_idle();
        self.process_scheduled_actions();

        let now = self.clock.now();
        self.client.did_finish_impl_frame();
        self.source.did_finish_frame(now);
        self.tracker.finish();
        self.deadline_mode = None;
        self.timers.deadline = None;
        if let Some(summary) = self.summary.take() {
            self.tracer.frame_summary(&summary.finish(now));
        }
        if !self.retro_frames.is_empty() {
            self.timers.retro_frame = Some(now);
        }
    }

    fn on_forced_redraw_timeout(&mut self, now: HostTime) {
        if self.state.on_forced_redraw_timeout() {
            self.tracer.forced_redraw(&ForcedRedrawEvent {
                state: self.state.forced_redraw_state(),
                now,
            });
        }
        self.process_scheduled_actions();
    }

    fn update_forced_redraw_timer(&mut self) {
        let wants = self.state.wants_forced_redraw_timeout();
        match self.timers.forced_redraw {
            None if wants => {
                let now = self.clock.now();
                self.timers.forced_redraw = Some(now.saturating_add(self.settings.forced_redraw_timeout));
                self.tracer.forced_redraw(&ForcedRedrawEvent {
                    state: self.state.forced_redraw_state(),
                    now,
                });
            }
            Some(_) if !wants => self.timers.forced_redraw = None,
            _ => {}
        }
    }

    // -- begin-frame source -------------------------------------------------

    fn setup_next_begin_frame_if_needed(&mut self) {
        if self.stopped {
            return;
        }
        let needed = self.state.begin_frame_needed();
        if needed == self.observing {
            return;
        }
        let now = self.clock.now();
        if needed {
            self.observing = true;
            if let Some(missed) = self.source.set_observing(true, now) {
                self.queue_retro_frame(missed, now);
            }
        } else if self.state.begin_impl_frame_state() == BeginImplFrameState::Idle {
            // Stop only between frames.
            self.observing = false;
            _ = self.source.set_observing(false, now);
            self.retro_frames.clear();
            self.timers.retro_frame = None;
            self.client.begin_frame_not_expected_soon();
        }
    }

    // -- action dispatch ----------------------------------------------------

    fn process_scheduled_actions(&mut self) {
        // Notifications that arrive while actions are draining are picked up
        // by the running loop.
        if self.stopped || self.inside_process_scheduled_actions {
            return;
        }
        self.inside_process_scheduled_actions = true;
        loop {
            let action = self.state.next_action();
            if action == Action::None {
                break;
            }
            self.perform(action);
        }
        self.inside_process_scheduled_actions = false;

        self.setup_next_begin_frame_if_needed();
        self.schedule_begin_impl_frame_deadline_if_needed();
        self.update_forced_redraw_timer();
    }

    fn perform(&mut self, action: Action) {
        let now = self.clock.now();
        self.tracer.action(&ActionEvent {
            frame_number: self.state.current_frame_number(),
            action,
            now,
        });
        if let Some(summary) = self.summary.as_mut() {
            summary.record_action(action);
        }

        match action {
            Action::None => {}
            Action::SendBeginMainFrame => {
                self.state.will_send_begin_main_frame();
                self.timing.will_begin_main_frame(now);
                let args = self
                    .tracker
                    .current()
                    .or(self.tracker.last())
                    .copied()
                    .unwrap_or_default()
                    .with_critical_path(!self.state.impl_latency_takes_priority());
                self.client.send_begin_main_frame(&args);
            }
            Action::Commit => {
                self.state.will_commit(false);
                self.timing.did_commit(now);
                self.client.commit();
            }
            Action::ActivateSyncTree => {
                self.timing.will_activate(now);
                self.state.will_activate();
                self.client.activate_sync_tree();
                self.timing.did_activate(self.clock.now());
            }
            Action::DrawIfPossible | Action::DrawForced => {
                self.timing.will_draw(now);
                self.state.will_draw();
                let result = if action == Action::DrawForced {
                    self.client.draw_forced()
                } else {
                    self.client.draw_if_possible()
                };
                self.did_draw(result);
            }
            Action::DrawAbort => {
                self.state.abort_draw();
                self.timing.draw_aborted();
                self.client.draw_aborted();
            }
            Action::BeginFrameSinkCreation => {
                self.state.will_begin_frame_sink_creation();
                self.tracer.frame_sink(&FrameSinkEvent {
                    kind: self.frame_sink_kind,
                    failures: self.frame_sink_failures,
                    outcome: FrameSinkOutcome::Requested,
                });
                self.client.begin_frame_sink_creation(self.frame_sink_kind);
            }
            Action::PrepareTiles => {
                self.state.will_prepare_tiles();
                self.client.prepare_tiles();
            }
            Action::InvalidateFrameSink => {
                self.state.will_invalidate_frame_sink();
                self.client.invalidate_frame_sink();
            }
        }
    }

    fn did_draw(&mut self, result: DrawResult) {
        self.state.did_draw(result);
        if result == DrawResult::Success {
            self.state.did_submit_compositor_frame();
            self.timing.did_draw(self.clock.now());
        } else {
            self.timing.draw_aborted();
        }
        if let Some(summary) = self.summary.as_mut() {
            summary.set_draw_result(result);
        }
    }

    fn emit_begin_frame(
        &mut self,
        args: BeginFrameArgs,
        now: HostTime,
        disposition: BeginFrameDisposition,
    ) {
        self.tracer.begin_frame(&BeginFrameEvent {
            args,
            now,
            disposition,
        });
    }

    // -- producer requests --------------------------------------------------

    /// Requests a redraw of the active tree.
    pub fn set_needs_redraw(&mut self) {
        self.state.set_needs_redraw();
        self.process_scheduled_actions();
    }

    /// Requests a new main frame.
    pub fn set_needs_begin_main_frame(&mut self) {
        self.state.set_needs_begin_main_frame();
        self.process_scheduled_actions();
    }

    /// Requests tile preparation.
    pub fn set_needs_prepare_tiles(&mut self) {
        self.state.set_needs_prepare_tiles();
        self.process_scheduled_actions();
    }

    /// Requests a single begin-impl-frame, for impl-side animation ticks.
    pub fn set_needs_one_begin_impl_frame(&mut self) {
        self.state.set_needs_one_begin_impl_frame();
        self.process_scheduled_actions();
    }

    /// Sets producer visibility.
    pub fn set_visible(&mut self, visible: bool) {
        self.state.set_visible(visible);
        self.process_scheduled_actions();
    }

    /// Sets whether a draw is possible at all.
    pub fn set_can_draw(&mut self, can_draw: bool) {
        self.state.set_can_draw(can_draw);
        self.process_scheduled_actions();
    }

    /// Defers or resumes commits.
    pub fn set_defer_commits(&mut self, defer: bool) {
        self.state.set_defer_commits(defer);
        self.process_scheduled_actions();
    }

    /// Prioritizes impl-thread latency over main-thread content.
    pub fn set_impl_latency_takes_priority(&mut self, takes_priority: bool) {
        self.state.set_impl_latency_takes_priority(takes_priority);
        self.process_scheduled_actions();
    }

    /// Records that the begin-frame source paused or resumed.
    pub fn set_begin_frame_source_paused(&mut self, paused: bool) {
        self.source_paused = paused;
        self.state.set_begin_frame_source_paused(paused);
        self.process_scheduled_actions();
    }

    // -- main-thread progress -----------------------------------------------

    /// The main thread picked up the begin-main-frame.
    pub fn notify_begin_main_frame_started(&mut self) {
        self.state.notify_begin_main_frame_started();
    }

    /// The main thread is blocked and ready to commit.
    pub fn notify_ready_to_commit(&mut self) {
        self.state.notify_ready_to_commit();
        self.process_scheduled_actions();
    }

    /// The main frame finished without a commit.
    pub fn begin_main_frame_aborted(&mut self, reason: CommitEarlyOutReason) {
        self.timing.begin_main_frame_aborted();
        self.state.begin_main_frame_aborted(reason);
        self.process_scheduled_actions();
    }

    /// The pending tree is ready to activate.
    pub fn notify_ready_to_activate(&mut self) {
        if self.state.notify_ready_to_activate() {
            self.timing.ready_to_activate(self.clock.now());
        }
        self.process_scheduled_actions();
    }

    /// The active tree is ready to draw.
    pub fn notify_ready_to_draw(&mut self) {
        self.state.notify_ready_to_draw();
        self.process_scheduled_actions();
    }

    // -- frame sink ---------------------------------------------------------

    /// The frame sink consumed a submitted frame.
    pub fn did_receive_compositor_frame_ack(&mut self) {
        self.state.did_receive_compositor_frame_ack();
        self.process_scheduled_actions();
    }

    /// Tiles were prepared outside a `PREPARE_TILES` action.
    pub fn did_prepare_tiles(&mut self) {
        self.state.did_prepare_tiles();
    }

    /// Frame-sink creation finished.
    pub fn did_create_and_initialize_frame_sink(&mut self) {
        self.state.did_create_and_initialize_frame_sink();
        self.frame_sink_failures = 0;
        self.total_frame_sink_failures = 0;
        self.tracer.frame_sink(&FrameSinkEvent {
            kind: self.frame_sink_kind,
            failures: 0,
            outcome: FrameSinkOutcome::Created,
        });
        self.process_scheduled_actions();
    }

    /// Frame-sink creation failed.
    ///
    /// Creation is retried at once; after
    /// [`frame_sink_attempts_per_kind`](SchedulerSettings::frame_sink_attempts_per_kind)
    /// consecutive failures the next backend is tried. When no backend is
    /// left the scheduler stops and the error is returned.
    pub fn did_fail_to_initialize_frame_sink(&mut self) -> Result<(), SchedulerError> {
        self.state.did_fail_to_initialize_frame_sink();
        self.frame_sink_failures += 1;
        self.total_frame_sink_failures += 1;
        self.tracer.frame_sink(&FrameSinkEvent {
            kind: self.frame_sink_kind,
            failures: self.frame_sink_failures,
            outcome: FrameSinkOutcome::Failed,
        });

        if self.frame_sink_failures >= self.settings.frame_sink_attempts_per_kind {
            match self.frame_sink_kind.fallback() {
                Some(next) => {
                    self.frame_sink_kind = next;
                    self.frame_sink_failures = 0;
                }
                None => {
                    let err = SchedulerError::FrameSinkCreationExhausted {
                        attempts: self.total_frame_sink_failures,
                        last_kind: self.frame_sink_kind,
                    };
                    self.stop();
                    return Err(err);
                }
            }
        }
        self.process_scheduled_actions();
        Ok(())
    }

    /// The frame sink was lost; a new one is requested.
    pub fn did_lose_frame_sink(&mut self) {
        self.tracer.frame_sink(&FrameSinkEvent {
            kind: self.frame_sink_kind,
            failures: self.frame_sink_failures,
            outcome: FrameSinkOutcome::Lost,
        });
        self.state.did_lose_frame_sink();
        self.process_scheduled_actions();
    }

    // -- shutdown -----------------------------------------------------------

    /// Cancels every timer and queued frame. No action runs afterwards.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.timers = Timers::default();
        self.retro_frames.clear();
        if self.observing {
            self.observing = false;
            _ = self.source.set_observing(false, self.clock.now());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::client::{CommitCoordinator, DrawExecutor, FrameObserver, FrameSinkLifecycle};
    use crate::source::ExternalBeginFrameSource;
    use crate::state_machine::ForcedRedrawOnTimeoutState;
    use crate::time::{Duration, ManualClock};

    const INTERVAL: Duration = Duration::from_millis(16);

    #[derive(Debug)]
    struct Recorder {
        actions: Vec<Action>,
        sink_kinds: Vec<FrameSinkKind>,
        main_frame_args: Vec<BeginFrameArgs>,
        draw_result: DrawResult,
        frames_begun: u32,
        frames_finished: u32,
        not_expected_soon: u32,
    }

    impl Default for Recorder {
        fn default() -> Self {
            Self {
                actions: Vec::new(),
                sink_kinds: Vec::new(),
                main_frame_args: Vec::new(),
                draw_result: DrawResult::Success,
                frames_begun: 0,
                frames_finished: 0,
                not_expected_soon: 0,
            }
        }
    }

    impl FrameSinkLifecycle for Recorder {
        fn begin_frame_sink_creation(&mut self, kind: FrameSinkKind) {
            self.actions.push(Action::BeginFrameSinkCreation);
            self.sink_kinds.push(kind);
        }

        fn invalidate_frame_sink(&mut self) {
            self.actions.push(Action::InvalidateFrameSink);
        }
    }

    impl DrawExecutor for Recorder {
        fn draw_if_possible(&mut self) -> DrawResult {
            self.actions.push(Action::DrawIfPossible);
            self.draw_result
        }

        fn draw_forced(&mut self) -> DrawResult {
            self.actions.push(Action::DrawForced);
            DrawResult::Success
        }

        fn prepare_tiles(&mut self) {
            self.actions.push(Action::PrepareTiles);
        }

        fn draw_aborted(&mut self) {
            self.actions.push(Action::DrawAbort);
        }
    }

    impl CommitCoordinator for Recorder {
        fn send_begin_main_frame(&mut self, args: &BeginFrameArgs) {
            self.actions.push(Action::SendBeginMainFrame);
            self.main_frame_args.push(*args);
        }

        fn commit(&mut self) {
            self.actions.push(Action::Commit);
        }

        fn activate_sync_tree(&mut self) {
            self.actions.push(Action::ActivateSyncTree);
        }
    }

    impl FrameObserver for Recorder {
        fn will_begin_impl_frame(&mut self, _args: &BeginFrameArgs) {
            self.frames_begun += 1;
        }

        fn did_finish_impl_frame(&mut self) {
            self.frames_finished += 1;
        }

        fn begin_frame_not_expected_soon(&mut self) {
            self.not_expected_soon += 1;
        }
    }

    type TestScheduler = Scheduler<Recorder, ExternalBeginFrameSource>;

    fn scheduler(settings: SchedulerSettings) -> (TestScheduler, ManualClock) {
        let clock = ManualClock::new(HostTime(1_000_000_000));
        let scheduler = Scheduler::new(
            settings,
            Recorder::default(),
            ExternalBeginFrameSource::new(settings.parent_draw_divisor),
            Box::new(clock.clone()),
        );
        (scheduler, clock)
    }

    fn take_actions(s: &mut TestScheduler) -> Vec<Action> {
        core::mem::take(&mut s.client_mut().actions)
    }

    /// Pushes a vsync at the current time, runs the frame it starts through
    /// its deadline, and leaves the clock at the next vsync.
    fn run_frame(s: &mut TestScheduler, clock: &ManualClock) {
        let frame_time = clock.now();
        s.source_mut().on_vsync(frame_time, INTERVAL);
        s.run_pending();
        if let Some(at) = s.begin_impl_frame_deadline() {
            clock.set(at);
            s.run_pending();
        }
        clock.set(frame_time + INTERVAL);
    }

    fn complete_main_frame(s: &mut TestScheduler) {
        s.notify_begin_main_frame_started();
        s.notify_ready_to_commit();
        s.notify_ready_to_activate();
    }

    /// A visible scheduler with an active frame sink whose first frame has
    /// been committed, activated, drawn, and acked.
    fn active_scheduler() -> (TestScheduler, ManualClock) {
        let (mut s, clock) = scheduler(SchedulerSettings::new());
        s.set_visible(true);
        s.set_can_draw(true);
        s.did_create_and_initialize_frame_sink();
        s.set_needs_begin_main_frame();

        s.source_mut().on_vsync(clock.now(), INTERVAL);
        s.run_pending();
        complete_main_frame(&mut s);
        assert_eq!(
            s.deadline_mode(),
            Some(DeadlineMode::Immediate),
            "an undrawn active tree draws right away"
        );
        s.run_pending();
        s.did_receive_compositor_frame_ack();
        clock.advance(INTERVAL);
        take_actions(&mut s);
        (s, clock)
    }

    #[test]
    fn visible_scheduler_creates_a_frame_sink() {
        let (mut s, _clock) = scheduler(SchedulerSettings::new());
        assert!(take_actions(&mut s).is_empty(), "nothing while hidden");
        s.set_visible(true);
        assert_eq!(take_actions(&mut s), [Action::BeginFrameSinkCreation]);
        assert_eq!(s.client().sink_kinds, [FrameSinkKind::Gpu]);
        assert!(!s.is_observing_begin_frames(), "no frames before the sink");
    }

    #[test]
    fn first_frame_commits_activates_and_draws() {
        let (mut s, clock) = scheduler(SchedulerSettings::new());
        s.set_visible(true);
        s.set_can_draw(true);
        s.did_create_and_initialize_frame_sink();
        s.set_needs_begin_main_frame();
        assert!(s.is_observing_begin_frames(), "a main frame needs begin frames");

        s.source_mut().on_vsync(clock.now(), INTERVAL);
        assert!(s.run_pending(), "the vsync starts a frame");
        assert_eq!(
            s.deadline_mode(),
            Some(DeadlineMode::Late),
            "nothing to draw yet"
        );
        assert_eq!(s.begin_impl_frame_deadline(), Some(clock.now() + INTERVAL));

        complete_main_frame(&mut s);
        assert_eq!(s.begin_impl_frame_deadline(), Some(clock.now()));
        s.run_pending();

        assert_eq!(
            take_actions(&mut s),
            [
                Action::BeginFrameSinkCreation,
                Action::SendBeginMainFrame,
                Action::Commit,
                Action::ActivateSyncTree,
                Action::DrawIfPossible,
            ]
        );
        assert_eq!(s.client().frames_begun, 1);
        assert_eq!(s.client().frames_finished, 1);
        assert_eq!(s.state().pending_submit_frames(), 1, "the draw was submitted");
        assert!(
            s.client().main_frame_args[0].on_critical_path(),
            "main frames are on the critical path by default"
        );
    }

    #[test]
    fn regular_deadline_leaves_room_for_the_draw() {
        let (mut s, clock) = active_scheduler();
        s.set_needs_redraw();
        s.set_needs_begin_main_frame();
        let frame_time = clock.now();
        s.source_mut().on_vsync(frame_time, INTERVAL);
        s.run_pending();

        assert_eq!(s.deadline_mode(), Some(DeadlineMode::Regular));
        // Source deadline is two thirds of the interval; the scheduler pulls
        // it in by the draw estimate (zero so far) and the fudge.
        let source_deadline = frame_time + INTERVAL - INTERVAL.div(3);
        assert_eq!(
            s.begin_impl_frame_deadline(),
            Some(source_deadline - Duration::from_millis(1))
        );

        s.set_impl_latency_takes_priority(true);
        assert_eq!(s.deadline_mode(), Some(DeadlineMode::Immediate));
        assert_eq!(s.begin_impl_frame_deadline(), Some(clock.now()));
    }

    #[test]
    fn deadline_is_never_scheduled_in_the_past() {
        let (mut s, clock) = active_scheduler();
        s.set_needs_redraw();
        s.set_needs_begin_main_frame();
        let frame_time = clock.now();
        s.source_mut().on_vsync(frame_time, INTERVAL);
        clock.advance(Duration::from_millis(12));
        s.run_pending();

        assert_eq!(s.deadline_mode(), Some(DeadlineMode::Regular));
        assert_eq!(
            s.begin_impl_frame_deadline(),
            Some(clock.now()),
            "a late frame's deadline is clamped to now"
        );
    }

    #[test]
    fn idle_scheduler_stops_observing() {
        let (mut s, clock) = active_scheduler();
        assert!(
            s.is_observing_begin_frames(),
            "a frame that drew keeps begin frames coming"
        );
        run_frame(&mut s, &clock);
        assert!(take_actions(&mut s).is_empty(), "nothing to do");
        assert!(!s.is_observing_begin_frames(), "idle after a quiet frame");
        assert_eq!(s.client().not_expected_soon, 1);

        let begun = s.client().frames_begun;
        s.begin_frame(BeginFrameArgs::new(
            99,
            clock.now(),
            clock.now() + Duration::from_millis(10),
            INTERVAL,
            BeginFrameKind::Normal,
        ));
        assert_eq!(s.client().frames_begun, begun, "unneeded frames are dropped");
    }

    #[test]
    fn frames_arriving_mid_frame_are_replayed_after_it() {
        let (mut s, clock) = active_scheduler();
        s.set_needs_begin_main_frame();
        s.source_mut().on_vsync(clock.now(), INTERVAL);
        s.run_pending();
        assert_eq!(s.client().frames_begun, 2);

        // An already expired frame and a usable one arrive while busy.
        let now = clock.now();
        s.begin_frame(BeginFrameArgs::new(
            50,
            now,
            now + Duration(1),
            INTERVAL,
            BeginFrameKind::Normal,
        ));
        s.begin_frame(BeginFrameArgs::new(
            51,
            now + Duration(10),
            now + INTERVAL + INTERVAL,
            INTERVAL,
            BeginFrameKind::Normal,
        ));
        assert_eq!(s.pending_retro_frames(), 2);

        let deadline = s.begin_impl_frame_deadline();
        assert!(deadline.is_some(), "deadline pending");
        clock.set(now + Duration::from_millis(5));
        complete_main_frame(&mut s);
        s.run_pending();
        assert_eq!(s.client().frames_finished, 2);
        assert_eq!(s.next_wakeup(), Some(clock.now()), "retro frame due now");
        s.did_receive_compositor_frame_ack();

        s.run_pending();
        assert_eq!(s.pending_retro_frames(), 0, "expired frame discarded");
        assert_eq!(s.client().frames_begun, 3, "only the usable frame ran");
    }

    #[test]
    fn missed_tick_is_replayed_when_observation_starts() {
        let (mut s, clock) = active_scheduler();
        run_frame(&mut s, &clock);
        assert!(!s.is_observing_begin_frames(), "idle");

        // A vsync arrives while nobody is listening.
        let frame_time = clock.now();
        s.source_mut().on_vsync(frame_time, INTERVAL);
        clock.advance(Duration::from_millis(2));

        s.set_needs_redraw();
        assert_eq!(s.pending_retro_frames(), 1, "the missed tick is queued");
        s.run_pending();
        assert_eq!(
            s.deadline_mode(),
            Some(DeadlineMode::Immediate),
            "redraw-only frames draw at once"
        );
        s.run_pending();
        assert_eq!(take_actions(&mut s), [Action::DrawIfPossible]);
    }

    #[test]
    fn main_thread_latency_recovery_skips_a_main_frame() {
        let (mut s, clock) = active_scheduler();
        s.set_needs_begin_main_frame();
        run_frame(&mut s, &clock);
        assert_eq!(take_actions(&mut s), [Action::SendBeginMainFrame]);
        assert!(
            s.state().main_thread_missed_last_deadline(),
            "the main frame straddled the deadline"
        );

        // The late main frame lands between frames.
        complete_main_frame(&mut s);
        s.set_needs_begin_main_frame();
        assert_eq!(
            take_actions(&mut s),
            [Action::Commit, Action::ActivateSyncTree]
        );

        run_frame(&mut s, &clock);
        assert_eq!(
            take_actions(&mut s),
            [Action::DrawIfPossible],
            "the main frame is skipped to catch up"
        );
        assert!(s.state().needs_begin_main_frame(), "still wanted");

        s.did_receive_compositor_frame_ack();
        run_frame(&mut s, &clock);
        assert_eq!(take_actions(&mut s), [Action::SendBeginMainFrame]);
    }

    #[test]
    fn impl_latency_recovery_skips_a_frame_while_throttled() {
        let (mut s, clock) = active_scheduler();
        s.set_needs_redraw();
        run_frame(&mut s, &clock);
        assert_eq!(take_actions(&mut s), [Action::DrawIfPossible]);

        // The draw is unacknowledged when the next frame starts.
        s.set_needs_redraw();
        let begun = s.client().frames_begun;
        run_frame(&mut s, &clock);
        assert_eq!(s.client().frames_begun, begun, "frame skipped");
        assert!(take_actions(&mut s).is_empty(), "nothing drawn");

        s.did_receive_compositor_frame_ack();
        run_frame(&mut s, &clock);
        assert_eq!(take_actions(&mut s), [Action::DrawIfPossible]);
    }

    #[test]
    fn stalled_commit_forces_a_redraw_after_the_timeout() {
        let (mut s, clock) = active_scheduler();
        s.set_needs_begin_main_frame();
        run_frame(&mut s, &clock);
        assert_eq!(take_actions(&mut s), [Action::SendBeginMainFrame]);

        // The main thread never answers.
        for _ in 1..SchedulerSettings::new().commit_stall_deadlines_before_forced_redraw {
            run_frame(&mut s, &clock);
        }
        assert_eq!(
            s.state().forced_redraw_state(),
            ForcedRedrawOnTimeoutState::WaitingForCommit
        );
        assert!(take_actions(&mut s).is_empty(), "no draw while waiting");

        clock.advance(SchedulerSettings::new().forced_redraw_timeout);
        s.run_pending();
        assert_eq!(
            s.state().forced_redraw_state(),
            ForcedRedrawOnTimeoutState::WaitingForDraw
        );

        run_frame(&mut s, &clock);
        assert_eq!(
            take_actions(&mut s),
            [Action::DrawForced],
            "the last activated tree is drawn"
        );
        assert_eq!(
            s.state().forced_redraw_state(),
            ForcedRedrawOnTimeoutState::Idle
        );
    }

    #[test]
    fn failed_draw_is_retried_next_frame() {
        let (mut s, clock) = active_scheduler();
        s.client_mut().draw_result = DrawResult::AbortedCantDraw;
        s.set_needs_redraw();
        run_frame(&mut s, &clock);
        assert_eq!(take_actions(&mut s), [Action::DrawIfPossible]);
        assert!(s.state().needs_redraw(), "aborted draws stay requested");
        assert_eq!(s.state().pending_submit_frames(), 0, "nothing submitted");

        s.client_mut().draw_result = DrawResult::Success;
        run_frame(&mut s, &clock);
        assert_eq!(take_actions(&mut s), [Action::DrawIfPossible]);
        assert!(!s.state().needs_redraw(), "satisfied");
    }

    #[test]
    fn hidden_scheduler_never_draws() {
        let (mut s, clock) = active_scheduler();
        s.set_needs_redraw();
        s.set_visible(false);
        assert!(!s.is_observing_begin_frames(), "hidden producers get no frames");
        run_frame(&mut s, &clock);
        run_frame(&mut s, &clock);
        assert!(take_actions(&mut s).is_empty(), "no draw while hidden");
        assert!(s.state().needs_redraw(), "the request survives");

        s.set_visible(true);
        run_frame(&mut s, &clock);
        assert_eq!(take_actions(&mut s), [Action::DrawIfPossible]);
    }

    #[test]
    fn frame_sink_creation_falls_back_then_gives_up() {
        let mut settings = SchedulerSettings::new();
        settings.frame_sink_attempts_per_kind = 2;
        let (mut s, _clock) = scheduler(settings);
        s.set_visible(true);

        assert_eq!(s.did_fail_to_initialize_frame_sink(), Ok(()));
        assert_eq!(s.did_fail_to_initialize_frame_sink(), Ok(()));
        assert_eq!(s.frame_sink_kind(), FrameSinkKind::Software);
        assert_eq!(s.did_fail_to_initialize_frame_sink(), Ok(()));
        assert_eq!(
            s.did_fail_to_initialize_frame_sink(),
            Err(SchedulerError::FrameSinkCreationExhausted {
                attempts: 4,
                last_kind: FrameSinkKind::Software,
            })
        );
        assert_eq!(
            s.client().sink_kinds,
            [
                FrameSinkKind::Gpu,
                FrameSinkKind::Gpu,
                FrameSinkKind::Software,
                FrameSinkKind::Software,
            ]
        );
        assert!(s.is_stopped(), "no degradation path left");
        assert_eq!(s.next_wakeup(), None);
    }

    #[test]
    fn lost_frame_sink_is_recreated() {
        let (mut s, _clock) = active_scheduler();
        s.did_lose_frame_sink();
        assert_eq!(take_actions(&mut s), [Action::BeginFrameSinkCreation]);
        s.did_create_and_initialize_frame_sink();
        assert!(
            s.state().needs_begin_main_frame(),
            "the main thread must repopulate the new sink"
        );
    }

    #[test]
    fn synchronous_compositor_draws_on_demand() {
        let (mut s, clock) = scheduler(SchedulerSettings::synchronous());
        s.set_visible(true);
        s.did_create_and_initialize_frame_sink();
        s.set_can_draw(true);
        s.set_needs_begin_main_frame();
        complete_main_frame(&mut s);

        s.begin_frame(BeginFrameArgs::new(
            1,
            clock.now(),
            clock.now() + Duration::from_millis(10),
            INTERVAL,
            BeginFrameKind::Normal,
        ));
        assert_eq!(s.begin_impl_frame_deadline(), None, "no deadline task");
        assert_eq!(
            s.state().begin_impl_frame_state(),
            BeginImplFrameState::Idle,
            "synchronous frames finish immediately"
        );

        s.on_draw_for_frame_sink(false);
        assert_eq!(
            take_actions(&mut s),
            [
                Action::BeginFrameSinkCreation,
                Action::SendBeginMainFrame,
                Action::Commit,
                Action::ActivateSyncTree,
                Action::InvalidateFrameSink,
                Action::DrawIfPossible,
            ]
        );
    }

    #[test]
    fn synchronous_missed_replay_finishes_its_frame() {
        let (mut s, clock) = scheduler(SchedulerSettings::synchronous());
        s.set_visible(true);
        s.did_create_and_initialize_frame_sink();
        s.set_can_draw(true);
        assert!(!s.is_observing_begin_frames(), "nothing to do yet");

        // A vsync seen while idle is replayed once observation starts.
        let vsync = clock.now();
        s.source_mut().on_vsync(vsync, INTERVAL);
        clock.advance(Duration::from_millis(1));
        s.set_needs_redraw();
        assert_eq!(s.pending_retro_frames(), 1, "missed vsync queued");
        assert!(s.run_pending(), "the replay runs");

        assert_eq!(s.pending_retro_frames(), 0);
        assert_eq!(s.state().begin_impl_frame_state(), BeginImplFrameState::Idle);
        assert_eq!(s.begin_impl_frame_deadline(), None, "no deadline task");
        assert_eq!(s.client().frames_begun, 1);
        assert_eq!(
            s.client().frames_finished,
            s.client().frames_begun,
            "the replayed frame finished"
        );

        // Later vsyncs still start frames.
        clock.set(vsync + INTERVAL);
        s.source_mut().on_vsync(clock.now(), INTERVAL);
        s.run_pending();
        s.on_draw_for_frame_sink(false);
        assert_eq!(s.client().frames_begun, 2, "the next vsync started a frame");
        assert_eq!(s.client().frames_finished, 2);
        assert_eq!(s.pending_retro_frames(), 0);
        assert_eq!(s.next_wakeup(), None, "nothing left to run");
    }

    #[test]
    fn synchronous_frames_pair_begin_and_finish() {
        let (mut s, clock) = scheduler(SchedulerSettings::synchronous());
        s.set_visible(true);
        s.did_create_and_initialize_frame_sink();
        s.set_can_draw(true);
        s.set_needs_begin_main_frame();
        complete_main_frame(&mut s);

        for sequence in 1..=3 {
            let frame_time = clock.now();
            s.begin_frame(BeginFrameArgs::new(
                sequence,
                frame_time,
                frame_time + Duration::from_millis(10),
                INTERVAL,
                BeginFrameKind::Normal,
            ));
            s.on_draw_for_frame_sink(false);
            assert!(
                take_actions(&mut s).contains(&Action::DrawIfPossible),
                "frame {sequence} drew"
            );
            assert_eq!(
                s.client().frames_finished,
                s.client().frames_begun,
                "frame {sequence} finished"
            );
            assert_eq!(s.state().begin_impl_frame_state(), BeginImplFrameState::Idle);

            s.did_receive_compositor_frame_ack();
            s.set_needs_redraw();
            clock.advance(INTERVAL);
        }
        assert_eq!(s.client().frames_begun, 3);
    }

    #[test]
    fn stop_cancels_everything() {
        let (mut s, clock) = active_scheduler();
        s.set_needs_redraw();
        s.source_mut().on_vsync(clock.now(), INTERVAL);
        s.run_pending();
        assert!(s.next_wakeup().is_some(), "deadline pending");

        s.stop();
        assert_eq!(s.next_wakeup(), None);
        assert!(!s.run_pending(), "nothing runs after stop");
        s.set_needs_begin_main_frame();
        assert!(take_actions(&mut s).is_empty(), "no actions after stop");
    }

    #[cfg(feature = "trace")]
    #[test]
    fn trace_sink_sees_frame_summaries() {
        use crate::trace::FrameSummary;
        use alloc::rc::Rc;
        use core::cell::RefCell;

        struct Summaries(Rc<RefCell<Vec<FrameSummary>>>);
        impl TraceSink for Summaries {
            fn on_frame_summary(&mut self, e: &FrameSummary) {
                self.0.borrow_mut().push(*e);
            }
        }

        let (mut s, clock) = active_scheduler();
        let seen = Rc::new(RefCell::new(Vec::new()));
        s.set_trace_sink(Box::new(Summaries(Rc::clone(&seen))));
        s.set_needs_redraw();
        run_frame(&mut s, &clock);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1, "one frame ran");
        assert_eq!(seen[0].draw_result, Some(DrawResult::Success));
        assert_eq!(seen[0].deadline_mode, DeadlineMode::Immediate);
    }
}
