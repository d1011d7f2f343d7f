// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The pure decision engine behind the [`Scheduler`](crate::scheduler::Scheduler).
//!
//! [`SchedulerStateMachine`] answers one question: given everything reported
//! so far, what is the single next [`Action`]? It performs no I/O, owns no
//! timers, and never touches another thread, so every transition can be
//! exercised directly in unit tests.
//!
//! The driver loop is always the same:
//!
//! ```text
//!   loop {
//!       match sm.next_action() {
//!           Action::None => break,
//!           action => { sm.will_<action>(); perform(action); sm.did_<...>(); }
//!       }
//!   }
//! ```
//!
//! `next_action` is evaluated in a fixed priority order (frame-sink creation,
//! draw, activation, commit, begin-main-frame, prepare-tiles, invalidate)
//! and is idempotent until a `will_*`, `did_*`, `notify_*`, or `set_*` call
//! changes state.
//!
//! Per-frame "funnels" latch once an action has been taken in the current
//! begin-impl-frame, and are all released at
//! [`on_begin_impl_frame_idle`](SchedulerStateMachine::on_begin_impl_frame_idle).

use core::fmt;

use crate::client::DrawResult;
use crate::settings::SchedulerSettings;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Lifecycle of the surface frames are submitted into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameSinkState {
    /// No frame sink; one must be created before anything can be drawn.
    None,
    /// Ready for draws.
    Active,
    /// Creation requested, completion not yet reported.
    Creating,
    /// Created; the first commit on it has not landed yet.
    WaitingForFirstCommit,
    /// The first commit landed; its tree has not activated yet.
    WaitingForFirstActivation,
}

/// Position within the current begin-impl-frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BeginImplFrameState {
    /// Between frames.
    Idle,
    /// The frame has begun; its deadline has not fired.
    InsideBeginFrame,
    /// The deadline task is running.
    InsideDeadline,
}

/// The main-thread half of a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BeginMainFrameState {
    /// No begin-main-frame outstanding.
    Idle,
    /// Requested; the main thread has not picked it up.
    Sent,
    /// The main thread is producing content.
    Started,
    /// The main thread is blocked waiting for the commit.
    ReadyToCommit,
}

/// Recovery path for frames that cannot complete normally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForcedRedrawOnTimeoutState {
    /// Not recovering.
    Idle,
    /// Waiting for a fresh commit before forcing a draw.
    WaitingForCommit,
    /// Waiting for the forced commit to activate.
    WaitingForActivation,
    /// The next draw is forced.
    WaitingForDraw,
}

/// How the deadline of the current begin-impl-frame should be scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeadlineMode {
    /// No deadline task (synchronous compositor).
    None,
    /// Fire as soon as possible.
    Immediate,
    /// Fire at the frame's adjusted deadline.
    Regular,
    /// Fire at the start of the next frame.
    Late,
    /// Do not fire until the active tree reports ready to draw.
    BlockedOnReadyToDraw,
}

/// Why a begin-main-frame finished without producing a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommitEarlyOutReason {
    /// The frame sink was lost while the main frame was in flight.
    AbortedFrameSinkLost,
    /// The producer became invisible.
    AbortedNotVisible,
    /// Commits are deferred by the producer.
    AbortedDeferredCommit,
    /// The producer had nothing new to commit.
    FinishedNoUpdates,
}

impl CommitEarlyOutReason {
    /// Returns `true` if the main frame should be requested again.
    #[must_use]
    pub const fn is_aborted(self) -> bool {
        !matches!(self, Self::FinishedNoUpdates)
    }
}

/// The single next step the scheduler should perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Nothing to do.
    None,
    /// Ask the main thread for a new frame.
    SendBeginMainFrame,
    /// Copy main-thread content into the pending tree.
    Commit,
    /// Promote the pending tree to active.
    ActivateSyncTree,
    /// Draw if all required content is resident.
    DrawIfPossible,
    /// Draw regardless of missing content.
    DrawForced,
    /// Drop the pending draw to keep the pipeline moving.
    DrawAbort,
    /// Start creating a frame sink.
    BeginFrameSinkCreation,
    /// Schedule raster work.
    PrepareTiles,
    /// Ask a synchronous embedder to draw.
    InvalidateFrameSink,
}

impl Action {
    /// Stable name for logs and traces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::SendBeginMainFrame => "SEND_BEGIN_MAIN_FRAME",
            Self::Commit => "COMMIT",
            Self::ActivateSyncTree => "ACTIVATE_SYNC_TREE",
            Self::DrawIfPossible => "DRAW_IF_POSSIBLE",
            Self::DrawForced => "DRAW_FORCED",
            Self::DrawAbort => "DRAW_ABORT",
            Self::BeginFrameSinkCreation => "BEGIN_COMPOSITOR_FRAME_SINK_CREATION",
            Self::PrepareTiles => "PREPARE_TILES",
            Self::InvalidateFrameSink => "INVALIDATE_COMPOSITOR_FRAME_SINK",
        }
    }

    /// Returns `true` for the three draw variants.
    #[must_use]
    pub const fn is_draw(self) -> bool {
        matches!(self, Self::DrawIfPossible | Self::DrawForced | Self::DrawAbort)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the per-frame one-shot latches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Funnels {
    /// A begin-main-frame was sent this frame.
    pub send_begin_main_frame: bool,
    /// A draw (or draw abort) happened this frame.
    pub draw: bool,
    /// Tiles were prepared this frame.
    pub prepare_tiles: bool,
    /// The frame sink was invalidated this frame.
    pub invalidate: bool,
}

impl Funnels {
    /// Returns `true` if no funnel is latched.
    #[must_use]
    pub const fn all_clear(&self) -> bool {
        !self.send_begin_main_frame && !self.draw && !self.prepare_tiles && !self.invalidate
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Decides the next frame-production action from reported state.
#[derive(Clone, Debug)]
pub struct SchedulerStateMachine {
    settings: SchedulerSettings,

    frame_sink_state: FrameSinkState,
    begin_impl_frame_state: BeginImplFrameState,
    begin_main_frame_state: BeginMainFrameState,
    forced_redraw_state: ForcedRedrawOnTimeoutState,

    current_frame_number: u64,
    funnels: Funnels,

    consecutive_checkerboard_animations: u32,
    commit_stall_deadlines: u32,
    pending_submit_frames: u32,

    needs_redraw: bool,
    needs_prepare_tiles: bool,
    needs_begin_main_frame: bool,
    needs_one_begin_impl_frame: bool,
    visible: bool,
    begin_frame_source_paused: bool,
    resourceless_draw: bool,
    can_draw: bool,
    has_pending_tree: bool,
    pending_tree_is_ready_for_activation: bool,
    active_tree_needs_first_draw: bool,
    wait_for_ready_to_draw: bool,
    did_create_first_frame_sink: bool,
    defer_commits: bool,
    impl_latency_takes_priority: bool,
    critical_begin_main_frame_to_activate_is_fast: bool,
    main_thread_missed_last_deadline: bool,
    skip_next_begin_main_frame_to_reduce_latency: bool,
    last_commit_had_no_updates: bool,
    did_draw_in_last_frame: bool,
    did_submit_in_last_frame: bool,
}

impl SchedulerStateMachine {
    /// Creates a machine with no frame sink, invisible, and nothing pending.
    #[must_use]
    pub const fn new(settings: SchedulerSettings) -> Self {
        Self {
            settings,
            frame_sink_state: FrameSinkState::None,
            begin_impl_frame_state: BeginImplFrameState::Idle,
            begin_main_frame_state: BeginMainFrameState::Idle,
            forced_redraw_state: ForcedRedrawOnTimeoutState::Idle,
            current_frame_number: 0,
            funnels: Funnels {
                send_begin_main_frame: false,
                draw: false,
                prepare_tiles: false,
                invalidate: false,
            },
            consecutive_checkerboard_animations: 0,
            commit_stall_deadlines: 0,
            pending_submit_frames: 0,
            needs_redraw: false,
            needs_prepare_tiles: false,
            needs_begin_main_frame: false,
            needs_one_begin_impl_frame: false,
            visible: false,
            begin_frame_source_paused: false,
            resourceless_draw: false,
            can_draw: false,
            has_pending_tree: false,
            pending_tree_is_ready_for_activation: false,
            active_tree_needs_first_draw: false,
            wait_for_ready_to_draw: false,
            did_create_first_frame_sink: false,
            defer_commits: false,
            impl_latency_takes_priority: false,
            critical_begin_main_frame_to_activate_is_fast: true,
            main_thread_missed_last_deadline: false,
            skip_next_begin_main_frame_to_reduce_latency: false,
            last_commit_had_no_updates: false,
            did_draw_in_last_frame: false,
            did_submit_in_last_frame: false,
        }
    }

    // -- queries ------------------------------------------------------------

    /// The settings this machine was built with.
    #[must_use]
    pub const fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Frame-sink lifecycle state.
    #[must_use]
    pub const fn frame_sink_state(&self) -> FrameSinkState {
        self.frame_sink_state
    }

    /// Position within the current frame.
    #[must_use]
    pub const fn begin_impl_frame_state(&self) -> BeginImplFrameState {
        self.begin_impl_frame_state
    }

    /// Main-thread commit progress.
    #[must_use]
    pub const fn begin_main_frame_state(&self) -> BeginMainFrameState {
        self.begin_main_frame_state
    }

    /// Forced-redraw recovery progress.
    #[must_use]
    pub const fn forced_redraw_state(&self) -> ForcedRedrawOnTimeoutState {
        self.forced_redraw_state
    }

    /// Number of begin-impl-frames seen so far.
    #[must_use]
    pub const fn current_frame_number(&self) -> u64 {
        self.current_frame_number
    }

    /// Current funnel latches.
    #[must_use]
    pub const fn funnels(&self) -> Funnels {
        self.funnels
    }

    /// Whether a redraw has been requested and not yet satisfied.
    #[must_use]
    pub const fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    /// Whether tile preparation has been requested.
    #[must_use]
    pub const fn needs_prepare_tiles(&self) -> bool {
        self.needs_prepare_tiles
    }

    /// Whether a new main frame has been requested.
    #[must_use]
    pub const fn needs_begin_main_frame(&self) -> bool {
        self.needs_begin_main_frame
    }

    /// Whether the producer is visible.
    #[must_use]
    pub const fn visible(&self) -> bool {
        self.visible
    }

    /// Whether a committed tree is waiting to activate.
    #[must_use]
    pub const fn has_pending_tree(&self) -> bool {
        self.has_pending_tree
    }

    /// Whether the active tree was activated and not yet drawn.
    #[must_use]
    pub const fn active_tree_needs_first_draw(&self) -> bool {
        self.active_tree_needs_first_draw
    }

    /// Submitted frames awaiting an ack.
    #[must_use]
    pub const fn pending_submit_frames(&self) -> u32 {
        self.pending_submit_frames
    }

    /// Whether the main thread was still busy at the last deadline.
    #[must_use]
    pub const fn main_thread_missed_last_deadline(&self) -> bool {
        self.main_thread_missed_last_deadline
    }

    /// Whether impl-thread latency is prioritized over main-thread content.
    #[must_use]
    pub const fn impl_latency_takes_priority(&self) -> bool {
        self.impl_latency_takes_priority
    }

    /// Whether the main thread's critical work is expected to fit in a frame.
    #[must_use]
    pub const fn critical_begin_main_frame_to_activate_is_fast(&self) -> bool {
        self.critical_begin_main_frame_to_activate_is_fast
    }

    /// Returns `true` while a begin-main-frame is outstanding.
    #[must_use]
    pub const fn commit_pending(&self) -> bool {
        matches!(
            self.begin_main_frame_state,
            BeginMainFrameState::Sent
                | BeginMainFrameState::Started
                | BeginMainFrameState::ReadyToCommit
        )
    }

    /// Returns `true` once a frame sink exists and creation has completed.
    #[must_use]
    pub const fn has_initialized_frame_sink(&self) -> bool {
        matches!(
            self.frame_sink_state,
            FrameSinkState::Active
                | FrameSinkState::WaitingForFirstCommit
                | FrameSinkState::WaitingForFirstActivation
        )
    }

    /// Returns `true` when the ack backlog blocks further submissions.
    #[must_use]
    pub const fn is_draw_throttled(&self) -> bool {
        !self.resourceless_draw && self.pending_submit_frames >= self.settings.max_pending_submit_frames
    }

    /// Returns `true` when only impl-side work is expected this frame.
    #[must_use]
    pub const fn only_impl_side_updates_expected(&self) -> bool {
        let has_impl_updates = self.needs_redraw || self.needs_one_begin_impl_frame;
        let main_updates_expected =
            self.commit_pending() || self.needs_begin_main_frame || self.has_pending_tree;
        has_impl_updates && !main_updates_expected
    }

    /// Returns `true` if the forced-redraw timer should be running.
    #[must_use]
    pub const fn wants_forced_redraw_timeout(&self) -> bool {
        matches!(
            self.forced_redraw_state,
            ForcedRedrawOnTimeoutState::WaitingForCommit
                | ForcedRedrawOnTimeoutState::WaitingForActivation
        )
    }

    /// Draws queued for this frame cannot succeed and should be dropped.
    #[must_use]
    pub const fn pending_draws_should_be_aborted(&self) -> bool {
        let frame_sink_lost = matches!(
            self.frame_sink_state,
            FrameSinkState::None | FrameSinkState::Creating
        );
        if self.resourceless_draw {
            return frame_sink_lost || !self.can_draw;
        }
        frame_sink_lost || !self.can_draw || !self.visible || self.begin_frame_source_paused
    }

    /// Pending trees should activate without waiting for readiness, so the
    /// main thread is never deadlocked behind a tree nobody will draw.
    #[must_use]
    pub const fn pending_activations_should_be_forced(&self) -> bool {
        matches!(self.frame_sink_state, FrameSinkState::None)
            || !self.visible
            || self.begin_frame_source_paused
    }

    /// Returns `true` if an action is waiting on the next begin frame.
    #[must_use]
    pub const fn begin_frame_required_for_action(&self) -> bool {
        if matches!(
            self.forced_redraw_state,
            ForcedRedrawOnTimeoutState::WaitingForDraw
        ) {
            return true;
        }
        self.needs_redraw
            || self.needs_one_begin_impl_frame
            || (self.needs_begin_main_frame && !self.defer_commits)
    }

    /// Returns `true` if begin frames are likely to be needed soon even
    /// though no action requires one right now.
    #[must_use]
    pub const fn proactive_begin_frame_wanted(&self) -> bool {
        if !self.visible {
            return false;
        }
        // A commit that finishes quickly will want to draw.
        if self.commit_pending() && !self.defer_commits {
            return true;
        }
        self.has_pending_tree
            || self.needs_prepare_tiles
            || self.did_draw_in_last_frame
            || self.last_commit_had_no_updates
    }

    /// Whether the scheduler should be observing its begin-frame source.
    #[must_use]
    pub const fn begin_frame_needed(&self) -> bool {
        if !self.has_initialized_frame_sink() || !self.visible {
            return false;
        }
        self.begin_frame_required_for_action() || self.proactive_begin_frame_wanted()
    }

    /// Returns `true` if the current deadline can fire right away.
    #[must_use]
    pub const fn should_trigger_begin_impl_frame_deadline_immediately(&self) -> bool {
        // Forced activation just happened; nothing else will arrive.
        if self.pending_activations_should_be_forced() && !self.has_pending_tree {
            return true;
        }
        if self.is_draw_throttled() {
            return false;
        }
        if self.wait_for_ready_to_draw && !self.pending_draws_should_be_aborted() {
            return false;
        }
        if self.active_tree_needs_first_draw {
            return true;
        }
        if !self.needs_redraw {
            return false;
        }
        // No main-thread content is coming; only the impl side has work.
        if matches!(self.begin_main_frame_state, BeginMainFrameState::Idle) && !self.has_pending_tree
        {
            return true;
        }
        self.impl_latency_takes_priority
    }

    /// How the deadline of the current frame should be scheduled.
    #[must_use]
    pub const fn current_begin_impl_frame_deadline_mode(&self) -> DeadlineMode {
        if self.settings.using_synchronous_compositor {
            return DeadlineMode::None;
        }
        if self.should_trigger_begin_impl_frame_deadline_immediately() {
            DeadlineMode::Immediate
        } else if self.wait_for_ready_to_draw
            && !matches!(
                self.forced_redraw_state,
                ForcedRedrawOnTimeoutState::WaitingForDraw
            )
        {
            DeadlineMode::BlockedOnReadyToDraw
        } else if self.needs_redraw {
            DeadlineMode::Regular
        } else {
            DeadlineMode::Late
        }
    }

    // -- next action -------------------------------------------------------

    /// Returns the highest-priority action that is ready.
    ///
    /// While invisible the only draw-class action returned is
    /// [`Action::DrawAbort`], which discards an undrawn active tree that
    /// would otherwise block the pipeline. `DrawIfPossible` and `DrawForced`
    /// wait for visibility, and `needs_redraw` survives the wait.
    #[must_use]
    pub const fn next_action(&self) -> Action {
        if self.should_begin_frame_sink_creation() {
            return Action::BeginFrameSinkCreation;
        }
        if self.should_draw() {
            return if self.pending_draws_should_be_aborted() {
                Action::DrawAbort
            } else if matches!(
                self.forced_redraw_state,
                ForcedRedrawOnTimeoutState::WaitingForDraw
            ) {
                Action::DrawForced
            } else {
                Action::DrawIfPossible
            };
        }
        if self.should_activate_sync_tree() {
            return Action::ActivateSyncTree;
        }
        if self.should_commit() {
            return Action::Commit;
        }
        if self.should_send_begin_main_frame() {
            return Action::SendBeginMainFrame;
        }
        if self.should_prepare_tiles() {
            return Action::PrepareTiles;
        }
        if self.should_invalidate_frame_sink() {
            return Action::InvalidateFrameSink;
        }
        Action::None
    }

    const fn should_begin_frame_sink_creation(&self) -> bool {
        if !self.visible {
            return false;
        }
        // Wait for the previous commit unless it is allowed to straddle the
        // new frame sink.
        if self.settings.abort_commit_before_frame_sink_creation
            && !matches!(self.begin_main_frame_state, BeginMainFrameState::Idle)
        {
            return false;
        }
        if !matches!(self.begin_impl_frame_state, BeginImplFrameState::Idle) {
            return false;
        }
        // Drain draws and activations first.
        if self.active_tree_needs_first_draw || self.has_pending_tree {
            return false;
        }
        matches!(self.frame_sink_state, FrameSinkState::None)
    }

    const fn should_draw(&self) -> bool {
        // Abort as soon as possible, but only if there is an undrawn tree
        // blocking the pipeline.
        if self.pending_draws_should_be_aborted() {
            return self.active_tree_needs_first_draw;
        }
        if self.funnels.draw {
            return false;
        }
        if !matches!(self.frame_sink_state, FrameSinkState::Active) {
            return false;
        }
        if self.is_draw_throttled() {
            return false;
        }
        if !matches!(self.begin_impl_frame_state, BeginImplFrameState::InsideDeadline) {
            return false;
        }
        if matches!(
            self.forced_redraw_state,
            ForcedRedrawOnTimeoutState::WaitingForDraw
        ) {
            return true;
        }
        self.needs_redraw
    }

    const fn should_activate_sync_tree(&self) -> bool {
        if !self.has_pending_tree {
            return false;
        }
        // Never replace an active tree that has not been drawn.
        if self.active_tree_needs_first_draw {
            return false;
        }
        if self.pending_activations_should_be_forced() {
            return true;
        }
        self.pending_tree_is_ready_for_activation
    }

    const fn should_commit(&self) -> bool {
        if !matches!(self.begin_main_frame_state, BeginMainFrameState::ReadyToCommit) {
            return false;
        }
        // The pending tree slot must be free.
        !self.has_pending_tree
    }

    const fn could_send_begin_main_frame(&self) -> bool {
        self.needs_begin_main_frame
            && self.visible
            && !self.begin_frame_source_paused
            && !self.defer_commits
    }

    const fn should_send_begin_main_frame(&self) -> bool {
        if !self.could_send_begin_main_frame() {
            return false;
        }
        if self.funnels.send_begin_main_frame {
            return false;
        }
        // One outstanding main frame at a time.
        if !matches!(self.begin_main_frame_state, BeginMainFrameState::Idle) {
            return false;
        }
        if self.has_pending_tree && !self.settings.main_frame_before_activation_enabled {
            return false;
        }
        if self.impl_latency_takes_priority
            && (self.has_pending_tree || self.active_tree_needs_first_draw)
        {
            return false;
        }
        // Outside a frame new input may still arrive; the synchronous
        // compositor's main thread is always high latency so it may go now.
        if !self.settings.using_synchronous_compositor
            && matches!(self.begin_impl_frame_state, BeginImplFrameState::Idle)
        {
            return false;
        }
        // A forced redraw needs fresh content.
        if matches!(
            self.forced_redraw_state,
            ForcedRedrawOnTimeoutState::WaitingForCommit
        ) {
            return true;
        }
        if !self.has_initialized_frame_sink() {
            return false;
        }
        let just_submitted_in_deadline =
            matches!(self.begin_impl_frame_state, BeginImplFrameState::InsideDeadline)
                && self.did_submit_in_last_frame;
        if self.is_draw_throttled() && !just_submitted_in_deadline {
            return false;
        }
        !self.skip_next_begin_main_frame_to_reduce_latency
    }

    const fn should_prepare_tiles(&self) -> bool {
        if self.funnels.prepare_tiles {
            return false;
        }
        // Only after draws.
        if !matches!(self.begin_impl_frame_state, BeginImplFrameState::InsideDeadline) {
            return false;
        }
        self.needs_prepare_tiles
    }

    const fn should_invalidate_frame_sink(&self) -> bool {
        if self.funnels.invalidate {
            return false;
        }
        if !self.settings.using_synchronous_compositor {
            return false;
        }
        if !matches!(self.begin_impl_frame_state, BeginImplFrameState::InsideBeginFrame) {
            return false;
        }
        self.needs_redraw || self.needs_prepare_tiles
    }

    // -- action bookkeeping -------------------------------------------------

    /// Records that a begin-main-frame was sent.
    ///
    /// # Panics
    ///
    /// Panics if the action was not ready.
    pub fn will_send_begin_main_frame(&mut self) {
        assert!(
            self.should_send_begin_main_frame(),
            "begin-main-frame sent when not ready"
        );
        self.begin_main_frame_state = BeginMainFrameState::Sent;
        self.needs_begin_main_frame = false;
        self.funnels.send_begin_main_frame = true;
    }

    /// Records a commit. `commit_has_no_updates` is `true` when the main
    /// frame finished without producing a new tree.
    pub fn will_commit(&mut self, commit_has_no_updates: bool) {
        self.begin_main_frame_state = BeginMainFrameState::Idle;
        self.last_commit_had_no_updates = commit_has_no_updates;
        self.commit_stall_deadlines = 0;

        if !commit_has_no_updates {
            self.has_pending_tree = true;
            self.pending_tree_is_ready_for_activation = false;
        }

        if self.forced_redraw_state == ForcedRedrawOnTimeoutState::WaitingForCommit {
            self.forced_redraw_state = if self.has_pending_tree {
                ForcedRedrawOnTimeoutState::WaitingForActivation
            } else {
                ForcedRedrawOnTimeoutState::WaitingForDraw
            };
        }

        if self.frame_sink_state == FrameSinkState::WaitingForFirstCommit {
            self.frame_sink_state = if self.has_pending_tree {
                FrameSinkState::WaitingForFirstActivation
            } else {
                FrameSinkState::Active
            };
        }
    }

    /// Records activation of the pending tree.
    ///
    /// # Panics
    ///
    /// Panics if there is no pending tree.
    pub fn will_activate(&mut self) {
        assert!(self.has_pending_tree, "activated without a pending tree");
        if self.frame_sink_state == FrameSinkState::WaitingForFirstActivation {
            self.frame_sink_state = FrameSinkState::Active;
        }
        if self.forced_redraw_state == ForcedRedrawOnTimeoutState::WaitingForActivation {
            self.forced_redraw_state = ForcedRedrawOnTimeoutState::WaitingForDraw;
        }
        self.has_pending_tree = false;
        self.pending_tree_is_ready_for_activation = false;
        self.active_tree_needs_first_draw = true;
        self.needs_redraw = true;
        self.wait_for_ready_to_draw = self.settings.wait_for_ready_to_draw;
    }

    /// Records a draw attempt (`DRAW_IF_POSSIBLE` or `DRAW_FORCED`).
    pub fn will_draw(&mut self) {
        // The draw may request another draw, so clear the flag first.
        self.needs_redraw = false;
        self.funnels.draw = true;
        self.active_tree_needs_first_draw = false;
        self.did_draw_in_last_frame = true;
        if self.forced_redraw_state == ForcedRedrawOnTimeoutState::WaitingForDraw {
            self.forced_redraw_state = ForcedRedrawOnTimeoutState::Idle;
        }
    }

    /// Records the outcome of the draw begun by [`will_draw`](Self::will_draw).
    pub fn did_draw(&mut self, result: DrawResult) {
        match result {
            DrawResult::Success | DrawResult::AbortedDrainingPipeline => {
                self.consecutive_checkerboard_animations = 0;
                self.forced_redraw_state = ForcedRedrawOnTimeoutState::Idle;
            }
            DrawResult::AbortedCheckerboardAnimations => {
                self.needs_begin_main_frame = true;
                self.needs_redraw = true;
                self.consecutive_checkerboard_animations += 1;
                let limit = self.settings.max_failed_draws_before_forced_redraw;
                if self.consecutive_checkerboard_animations >= limit
                    && self.forced_redraw_state == ForcedRedrawOnTimeoutState::Idle
                {
                    // Forcing only helps once new content has committed.
                    self.forced_redraw_state = ForcedRedrawOnTimeoutState::WaitingForCommit;
                }
            }
            DrawResult::AbortedMissingHighResContent => {
                // The content may need a commit or may only need raster; ask
                // for a commit either way.
                self.needs_begin_main_frame = true;
                self.needs_redraw = true;
            }
            DrawResult::AbortedCantDraw | DrawResult::AbortedContextLost => {
                self.needs_redraw = true;
            }
        }
    }

    /// Records a `DRAW_ABORT`: the undrawn tree is released as if drawn, but
    /// a requested redraw stays requested.
    pub fn abort_draw(&mut self) {
        let needs_redraw = self.needs_redraw;
        self.will_draw();
        self.did_draw(DrawResult::AbortedDrainingPipeline);
        self.needs_redraw = needs_redraw;
    }

    /// Records that a drawn frame was submitted to the frame sink.
    pub fn did_submit_compositor_frame(&mut self) {
        self.pending_submit_frames += 1;
        self.did_submit_in_last_frame = true;
    }

    /// Records that the frame sink consumed a submitted frame.
    pub fn did_receive_compositor_frame_ack(&mut self) {
        debug_assert!(self.pending_submit_frames > 0, "ack without a submitted frame");
        self.pending_submit_frames = self.pending_submit_frames.saturating_sub(1);
    }

    /// Records that tiles are being prepared.
    pub fn will_prepare_tiles(&mut self) {
        self.needs_prepare_tiles = false;
        self.funnels.prepare_tiles = true;
    }

    /// Records tile preparation that happened outside a `PREPARE_TILES`
    /// action, so the deadline does not repeat it.
    pub fn did_prepare_tiles(&mut self) {
        self.needs_prepare_tiles = false;
        self.funnels.prepare_tiles = true;
    }

    /// Records an invalidation of a synchronous frame sink.
    pub fn will_invalidate_frame_sink(&mut self) {
        debug_assert!(!self.funnels.invalidate, "invalidated twice in one frame");
        self.funnels.invalidate = true;
        // No draw is guaranteed to follow, so do not let the pipeline wait
        // for one.
        self.active_tree_needs_first_draw = false;
    }

    /// Records the start of frame-sink creation.
    ///
    /// # Panics
    ///
    /// Panics unless the frame sink is [`FrameSinkState::None`].
    pub fn will_begin_frame_sink_creation(&mut self) {
        assert_eq!(
            self.frame_sink_state,
            FrameSinkState::None,
            "frame sink creation started while one exists"
        );
        debug_assert!(
            !self.has_pending_tree && !self.active_tree_needs_first_draw,
            "pipeline must be drained before frame sink creation"
        );
        self.frame_sink_state = FrameSinkState::Creating;
    }

    /// Records successful frame-sink creation.
    ///
    /// # Panics
    ///
    /// Panics unless creation was in progress.
    pub fn did_create_and_initialize_frame_sink(&mut self) {
        assert_eq!(
            self.frame_sink_state,
            FrameSinkState::Creating,
            "frame sink initialized without being created"
        );
        self.frame_sink_state = FrameSinkState::WaitingForFirstCommit;
        if self.did_create_first_frame_sink {
            // The main thread must repopulate resources tied to the old sink.
            self.needs_begin_main_frame = true;
        }
        self.did_create_first_frame_sink = true;
        self.pending_submit_frames = 0;
        self.main_thread_missed_last_deadline = false;
    }

    /// Records that frame-sink creation failed, so creation can be requested
    /// again.
    pub fn did_fail_to_initialize_frame_sink(&mut self) {
        debug_assert_eq!(
            self.frame_sink_state,
            FrameSinkState::Creating,
            "frame sink creation failed without being started"
        );
        self.frame_sink_state = FrameSinkState::None;
    }

    /// Records loss of the frame sink.
    pub fn did_lose_frame_sink(&mut self) {
        if matches!(
            self.frame_sink_state,
            FrameSinkState::None | FrameSinkState::Creating
        ) {
            return;
        }
        self.frame_sink_state = FrameSinkState::None;
        self.needs_redraw = false;
        self.wait_for_ready_to_draw = false;
    }

    // -- frame boundaries --------------------------------------------------

    /// Enters a new begin-impl-frame.
    ///
    /// # Panics
    ///
    /// Panics if the previous frame did not return to idle.
    pub fn on_begin_impl_frame(&mut self) {
        assert_eq!(
            self.begin_impl_frame_state,
            BeginImplFrameState::Idle,
            "begin frame while a frame is in progress"
        );
        self.begin_impl_frame_state = BeginImplFrameState::InsideBeginFrame;
        self.current_frame_number += 1;
        self.last_commit_had_no_updates = false;
        self.did_draw_in_last_frame = false;
        self.did_submit_in_last_frame = false;
        self.needs_one_begin_impl_frame = false;
    }

    /// Enters the deadline of the current frame.
    ///
    /// A synchronous compositor has no deadline task and enters the draw
    /// phase straight from idle.
    pub fn on_begin_impl_frame_deadline(&mut self) {
        debug_assert!(
            self.begin_impl_frame_state == BeginImplFrameState::InsideBeginFrame
                || (self.settings.using_synchronous_compositor
                    && self.begin_impl_frame_state == BeginImplFrameState::Idle),
            "deadline outside a begin frame"
        );
        self.begin_impl_frame_state = BeginImplFrameState::InsideDeadline;

        let threshold = self.settings.commit_stall_deadlines_before_forced_redraw;
        if self.commit_pending() && threshold > 0 {
            self.commit_stall_deadlines += 1;
            if self.commit_stall_deadlines >= threshold
                && self.forced_redraw_state == ForcedRedrawOnTimeoutState::Idle
            {
                self.forced_redraw_state = ForcedRedrawOnTimeoutState::WaitingForCommit;
                self.commit_stall_deadlines = 0;
            }
        } else {
            self.commit_stall_deadlines = 0;
        }
    }

    /// Returns to idle and releases every per-frame funnel.
    pub fn on_begin_impl_frame_idle(&mut self) {
        self.begin_impl_frame_state = BeginImplFrameState::Idle;
        self.funnels = Funnels::default();
        // Main-thread content still in flight after the deadline means the
        // main thread is running a frame behind.
        self.main_thread_missed_last_deadline =
            self.commit_pending() || self.has_pending_tree || self.active_tree_needs_first_draw;
        self.skip_next_begin_main_frame_to_reduce_latency = false;
    }

    /// The forced-redraw timer expired: draw the active tree at the next
    /// deadline instead of waiting for the main thread.
    ///
    /// Returns `true` if the state changed.
    pub fn on_forced_redraw_timeout(&mut self) -> bool {
        if !self.wants_forced_redraw_timeout() {
            return false;
        }
        self.forced_redraw_state = ForcedRedrawOnTimeoutState::WaitingForDraw;
        true
    }

    // -- main-thread notifications ------------------------------------------

    /// The main thread picked up the begin-main-frame.
    pub fn notify_begin_main_frame_started(&mut self) {
        debug_assert_eq!(
            self.begin_main_frame_state,
            BeginMainFrameState::Sent,
            "main frame started without being sent"
        );
        self.begin_main_frame_state = BeginMainFrameState::Started;
    }

    /// The main thread is blocked and ready to commit.
    pub fn notify_ready_to_commit(&mut self) {
        debug_assert_eq!(
            self.begin_main_frame_state,
            BeginMainFrameState::Started,
            "ready to commit before the main frame started"
        );
        self.begin_main_frame_state = BeginMainFrameState::ReadyToCommit;
    }

    /// The main frame finished without a commit.
    pub fn begin_main_frame_aborted(&mut self, reason: CommitEarlyOutReason) {
        debug_assert!(
            matches!(
                self.begin_main_frame_state,
                BeginMainFrameState::Sent | BeginMainFrameState::Started
            ),
            "aborted a main frame that was not in flight"
        );
        if reason.is_aborted() {
            self.begin_main_frame_state = BeginMainFrameState::Idle;
            self.set_needs_begin_main_frame();
        } else {
            self.will_commit(true);
        }
    }

    /// The pending tree has everything it needs to activate.
    ///
    /// Returns `true` if a pending tree became ready.
    pub fn notify_ready_to_activate(&mut self) -> bool {
        if !self.has_pending_tree {
            return false;
        }
        self.pending_tree_is_ready_for_activation = true;
        true
    }

    /// The active tree has everything it needs to draw.
    pub fn notify_ready_to_draw(&mut self) {
        self.wait_for_ready_to_draw = false;
    }

    // -- level triggers -----------------------------------------------------

    /// Requests a redraw.
    pub fn set_needs_redraw(&mut self) {
        self.needs_redraw = true;
    }

    /// Requests tile preparation.
    pub fn set_needs_prepare_tiles(&mut self) {
        self.needs_prepare_tiles = true;
    }

    /// Requests a new main frame.
    pub fn set_needs_begin_main_frame(&mut self) {
        self.needs_begin_main_frame = true;
    }

    /// Requests one begin-impl-frame even if nothing else needs it.
    pub fn set_needs_one_begin_impl_frame(&mut self) {
        self.needs_one_begin_impl_frame = true;
    }

    /// Sets producer visibility.
    pub fn set_visible(&mut self, visible: bool) {
        if visible && !self.visible {
            self.main_thread_missed_last_deadline = false;
        }
        self.visible = visible;
    }

    /// Sets whether drawing is possible at all (viewport, resources).
    pub fn set_can_draw(&mut self, can_draw: bool) {
        self.can_draw = can_draw;
    }

    /// Pauses or resumes the begin-frame source.
    pub fn set_begin_frame_source_paused(&mut self, paused: bool) {
        self.begin_frame_source_paused = paused;
    }

    /// Marks the current draw as a resourceless software draw.
    pub fn set_resourceless_software_draw(&mut self, resourceless: bool) {
        self.resourceless_draw = resourceless;
    }

    /// Defers or resumes commits.
    pub fn set_defer_commits(&mut self, defer: bool) {
        self.defer_commits = defer;
    }

    /// Prioritizes impl-thread latency over main-thread content.
    pub fn set_impl_latency_takes_priority(&mut self, takes_priority: bool) {
        self.impl_latency_takes_priority = takes_priority;
    }

    /// Records whether the main thread's critical path fits in a frame.
    pub fn set_critical_begin_main_frame_to_activate_is_fast(&mut self, is_fast: bool) {
        self.critical_begin_main_frame_to_activate_is_fast = is_fast;
    }

    /// Skips the next begin-main-frame to let the main thread catch up.
    pub fn set_skip_next_begin_main_frame_to_reduce_latency(&mut self) {
        self.skip_next_begin_main_frame_to_reduce_latency = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SchedulerSettings {
        SchedulerSettings::new()
    }

    /// A visible, drawable machine with an active frame sink.
    fn active_machine(settings: SchedulerSettings) -> SchedulerStateMachine {
        let mut sm = SchedulerStateMachine::new(settings);
        sm.set_visible(true);
        sm.set_can_draw(true);
        assert_eq!(sm.next_action(), Action::BeginFrameSinkCreation);
        sm.will_begin_frame_sink_creation();
        sm.did_create_and_initialize_frame_sink();
        sm.frame_sink_state = FrameSinkState::Active;
        sm
    }

    /// Performs the next action, asserting it is `expected`.
    fn perform(sm: &mut SchedulerStateMachine, expected: Action) {
        let action = sm.next_action();
        assert_eq!(action, expected, "unexpected next action");
        match action {
            Action::None => {}
            Action::SendBeginMainFrame => sm.will_send_begin_main_frame(),
            Action::Commit => sm.will_commit(false),
            Action::ActivateSyncTree => sm.will_activate(),
            Action::DrawIfPossible | Action::DrawForced => {
                sm.will_draw();
                sm.did_draw(DrawResult::Success);
                sm.did_submit_compositor_frame();
            }
            Action::DrawAbort => sm.abort_draw(),
            Action::BeginFrameSinkCreation => sm.will_begin_frame_sink_creation(),
            Action::PrepareTiles => sm.will_prepare_tiles(),
            Action::InvalidateFrameSink => sm.will_invalidate_frame_sink(),
        }
    }

    /// Runs a begin-main-frame through to a ready-to-commit main thread.
    fn main_thread_ready(sm: &mut SchedulerStateMachine) {
        sm.notify_begin_main_frame_started();
        sm.notify_ready_to_commit();
    }

    #[test]
    fn frame_sink_creation_blocks_everything_else() {
        let mut sm = SchedulerStateMachine::new(settings());
        sm.set_visible(true);
        sm.set_can_draw(true);
        sm.set_needs_redraw();
        sm.set_needs_begin_main_frame();
        assert_eq!(sm.next_action(), Action::BeginFrameSinkCreation);
        sm.will_begin_frame_sink_creation();
        assert_eq!(sm.next_action(), Action::None, "nothing while creating");
        assert!(!sm.begin_frame_needed(), "no begin frames without a sink");
    }

    #[test]
    fn invisible_machine_does_not_create_frame_sink() {
        let mut sm = SchedulerStateMachine::new(settings());
        sm.set_can_draw(true);
        assert_eq!(sm.next_action(), Action::None);
        sm.set_visible(true);
        assert_eq!(sm.next_action(), Action::BeginFrameSinkCreation);
    }

    #[test]
    fn first_frame_runs_commit_activate_draw() {
        let mut sm = SchedulerStateMachine::new(settings());
        sm.set_visible(true);
        sm.set_can_draw(true);
        perform(&mut sm, Action::BeginFrameSinkCreation);
        sm.did_create_and_initialize_frame_sink();
        assert!(
            !sm.needs_begin_main_frame(),
            "the first frame sink does not request a main frame itself"
        );
        sm.set_needs_begin_main_frame();
        assert!(sm.begin_frame_needed(), "a main frame needs begin frames");

        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        perform(&mut sm, Action::None);
        main_thread_ready(&mut sm);
        perform(&mut sm, Action::Commit);
        assert_eq!(
            sm.frame_sink_state(),
            FrameSinkState::WaitingForFirstActivation
        );
        perform(&mut sm, Action::None);
        assert!(sm.notify_ready_to_activate(), "pending tree became ready");
        perform(&mut sm, Action::ActivateSyncTree);
        assert_eq!(sm.frame_sink_state(), FrameSinkState::Active);
        assert!(sm.needs_redraw(), "activation requests a draw");
        perform(&mut sm, Action::None);
        assert_eq!(
            sm.current_begin_impl_frame_deadline_mode(),
            DeadlineMode::Immediate,
            "an undrawn active tree triggers the deadline early"
        );

        sm.on_begin_impl_frame_deadline();
        perform(&mut sm, Action::DrawIfPossible);
        perform(&mut sm, Action::None);
        sm.on_begin_impl_frame_idle();
        assert!(!sm.needs_redraw(), "successful draw satisfied the redraw");
    }

    #[test]
    fn next_action_is_idempotent() {
        let mut sm = active_machine(settings());
        sm.set_needs_redraw();
        sm.set_needs_begin_main_frame();
        sm.set_needs_prepare_tiles();
        sm.on_begin_impl_frame();
        let first = sm.next_action();
        assert_eq!(first, sm.next_action(), "repeated query without change");
        sm.will_send_begin_main_frame();
        sm.on_begin_impl_frame_deadline();
        let second = sm.next_action();
        assert_eq!(second, Action::DrawIfPossible);
        assert_eq!(second, sm.next_action(), "repeated query without change");
    }

    #[test]
    fn draw_precedes_activation_and_commit() {
        let mut sm = active_machine(settings());
        sm.set_needs_redraw();
        sm.has_pending_tree = true;
        sm.pending_tree_is_ready_for_activation = true;
        sm.on_begin_impl_frame();
        sm.on_begin_impl_frame_deadline();
        perform(&mut sm, Action::DrawIfPossible);
        perform(&mut sm, Action::ActivateSyncTree);
        // Activation requested a redraw, but the draw funnel holds it until
        // the next frame.
        perform(&mut sm, Action::None);
        assert!(sm.needs_redraw(), "redraw carried to the next frame");
    }

    #[test]
    fn activate_then_draw_in_one_pass() {
        let mut sm = active_machine(settings());
        sm.has_pending_tree = true;
        sm.pending_tree_is_ready_for_activation = true;
        sm.on_begin_impl_frame();
        sm.on_begin_impl_frame_deadline();
        perform(&mut sm, Action::ActivateSyncTree);
        perform(&mut sm, Action::DrawIfPossible);
        perform(&mut sm, Action::None);
    }

    #[test]
    fn second_main_frame_request_waits_for_commit() {
        let mut sm = active_machine(settings());
        sm.set_needs_begin_main_frame();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        assert!(sm.commit_pending(), "commit pending after send");

        sm.set_needs_begin_main_frame();
        perform(&mut sm, Action::None);
        sm.on_begin_impl_frame_deadline();
        perform(&mut sm, Action::None);
        sm.on_begin_impl_frame_idle();

        // A new frame still must not send a second main frame.
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::None);
        main_thread_ready(&mut sm);
        perform(&mut sm, Action::Commit);
        assert!(!sm.commit_pending(), "commit landed");
        // The pending tree blocks the next main frame until it activates.
        perform(&mut sm, Action::None);
        sm.notify_ready_to_activate();
        perform(&mut sm, Action::ActivateSyncTree);
        perform(&mut sm, Action::SendBeginMainFrame);
    }

    #[test]
    fn main_frame_before_activation_sends_early() {
        let mut s = settings();
        s.main_frame_before_activation_enabled = true;
        let mut sm = active_machine(s);
        sm.set_needs_begin_main_frame();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        main_thread_ready(&mut sm);
        perform(&mut sm, Action::Commit);
        sm.set_needs_begin_main_frame();
        sm.on_begin_impl_frame_deadline();
        sm.on_begin_impl_frame_idle();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        main_thread_ready(&mut sm);
        // The second commit waits for the first tree to activate.
        perform(&mut sm, Action::None);
        sm.notify_ready_to_activate();
        perform(&mut sm, Action::ActivateSyncTree);
        perform(&mut sm, Action::Commit);
    }

    #[test]
    fn funnels_reset_at_idle() {
        let mut sm = active_machine(settings());
        sm.set_needs_begin_main_frame();
        sm.set_needs_redraw();
        sm.set_needs_prepare_tiles();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        sm.begin_main_frame_aborted(CommitEarlyOutReason::AbortedDeferredCommit);
        assert!(sm.needs_begin_main_frame(), "aborted main frame re-requested");
        perform(&mut sm, Action::None);
        sm.on_begin_impl_frame_deadline();
        perform(&mut sm, Action::DrawIfPossible);
        perform(&mut sm, Action::PrepareTiles);
        sm.did_receive_compositor_frame_ack();
        sm.set_needs_redraw();
        sm.set_needs_prepare_tiles();
        perform(&mut sm, Action::None);
        assert!(!sm.funnels().all_clear(), "funnels latched during the frame");

        sm.on_begin_impl_frame_idle();
        assert!(sm.funnels().all_clear(), "idle clears every funnel");
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        sm.on_begin_impl_frame_deadline();
        perform(&mut sm, Action::DrawIfPossible);
        perform(&mut sm, Action::PrepareTiles);
    }

    #[test]
    fn failed_draw_keeps_needs_redraw() {
        let mut sm = active_machine(settings());
        sm.set_needs_redraw();
        sm.on_begin_impl_frame();
        sm.on_begin_impl_frame_deadline();
        assert_eq!(sm.next_action(), Action::DrawIfPossible);
        sm.will_draw();
        sm.did_draw(DrawResult::AbortedMissingHighResContent);
        assert!(sm.needs_redraw(), "failed draw is retried");
        assert!(sm.needs_begin_main_frame(), "missing content asks for a commit");
        assert!(!sm.next_action().is_draw(), "one draw per frame");
        sm.on_begin_impl_frame_idle();

        sm.on_begin_impl_frame();
        sm.on_begin_impl_frame_deadline();
        assert_eq!(sm.next_action(), Action::DrawIfPossible, "retried next frame");
        sm.will_draw();
        sm.did_draw(DrawResult::Success);
        assert!(!sm.needs_redraw(), "successful draw clears the redraw");
    }

    #[test]
    fn repeated_checkerboarding_forces_a_draw_after_commit() {
        let mut s = settings();
        s.max_failed_draws_before_forced_redraw = 2;
        let mut sm = active_machine(s);
        sm.set_needs_redraw();
        for _ in 0..2 {
            sm.on_begin_impl_frame();
            if sm.next_action() == Action::SendBeginMainFrame {
                sm.will_send_begin_main_frame();
                sm.begin_main_frame_aborted(CommitEarlyOutReason::AbortedDeferredCommit);
            }
            sm.on_begin_impl_frame_deadline();
            assert_eq!(sm.next_action(), Action::DrawIfPossible);
            sm.will_draw();
            sm.did_draw(DrawResult::AbortedCheckerboardAnimations);
            sm.on_begin_impl_frame_idle();
        }
        assert_eq!(
            sm.forced_redraw_state(),
            ForcedRedrawOnTimeoutState::WaitingForCommit
        );
        assert!(sm.wants_forced_redraw_timeout(), "timer should be armed");

        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        main_thread_ready(&mut sm);
        perform(&mut sm, Action::Commit);
        assert_eq!(
            sm.forced_redraw_state(),
            ForcedRedrawOnTimeoutState::WaitingForActivation
        );
        sm.notify_ready_to_activate();
        perform(&mut sm, Action::ActivateSyncTree);
        assert_eq!(
            sm.forced_redraw_state(),
            ForcedRedrawOnTimeoutState::WaitingForDraw
        );
        sm.on_begin_impl_frame_deadline();
        perform(&mut sm, Action::DrawForced);
        assert_eq!(sm.forced_redraw_state(), ForcedRedrawOnTimeoutState::Idle);
    }

    #[test]
    fn stalled_main_thread_triggers_forced_redraw_of_active_tree() {
        let mut s = settings();
        s.commit_stall_deadlines_before_forced_redraw = 2;
        let mut sm = active_machine(s);
        sm.set_needs_begin_main_frame();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);

        // The main thread never becomes ready to commit.
        for _ in 0..2 {
            if sm.begin_impl_frame_state() == BeginImplFrameState::Idle {
                sm.on_begin_impl_frame();
            }
            assert_eq!(sm.forced_redraw_state(), ForcedRedrawOnTimeoutState::Idle);
            sm.on_begin_impl_frame_deadline();
            perform(&mut sm, Action::None);
            sm.on_begin_impl_frame_idle();
        }
        assert_eq!(
            sm.forced_redraw_state(),
            ForcedRedrawOnTimeoutState::WaitingForCommit,
            "stalled commit enters recovery"
        );
        assert!(sm.begin_frame_needed(), "still waiting for the commit");

        assert!(sm.on_forced_redraw_timeout(), "timeout moves to forced draw");
        assert!(sm.begin_frame_required_for_action(), "forced draw needs a frame");
        sm.on_begin_impl_frame();
        sm.on_begin_impl_frame_deadline();
        perform(&mut sm, Action::DrawForced);
        assert!(sm.commit_pending(), "the original main frame is still out");
    }

    #[test]
    fn forced_redraw_timeout_is_ignored_when_not_recovering() {
        let mut sm = active_machine(settings());
        assert!(!sm.on_forced_redraw_timeout(), "nothing to recover");
        assert_eq!(sm.forced_redraw_state(), ForcedRedrawOnTimeoutState::Idle);
    }

    #[test]
    fn visibility_suppresses_draws_but_keeps_redraw() {
        let mut sm = active_machine(settings());
        sm.set_needs_redraw();
        sm.set_visible(false);
        for _ in 0..3 {
            sm.on_begin_impl_frame();
            assert!(!sm.next_action().is_draw(), "no draw while invisible");
            sm.on_begin_impl_frame_deadline();
            assert!(!sm.next_action().is_draw(), "no draw while invisible");
            sm.on_begin_impl_frame_idle();
            assert!(sm.needs_redraw(), "redraw stays requested");
        }
        assert_eq!(
            sm.frame_sink_state(),
            FrameSinkState::Active,
            "invisibility does not tear down the frame sink"
        );
        sm.set_visible(true);
        sm.on_begin_impl_frame();
        sm.on_begin_impl_frame_deadline();
        assert_eq!(sm.next_action(), Action::DrawIfPossible);
    }

    #[test]
    fn undrawn_tree_is_aborted_when_invisible() {
        let mut sm = active_machine(settings());
        sm.set_needs_redraw();
        sm.active_tree_needs_first_draw = true;
        sm.set_visible(false);
        assert_eq!(sm.next_action(), Action::DrawAbort, "abort does not wait for a deadline");
        sm.abort_draw();
        assert!(!sm.active_tree_needs_first_draw(), "pipeline drained");
        assert!(sm.needs_redraw(), "abort keeps the requested redraw");
        assert_eq!(sm.next_action(), Action::None);
    }

    #[test]
    fn invisible_main_frame_abort_rerequests() {
        let mut sm = active_machine(settings());
        sm.set_needs_begin_main_frame();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        sm.set_visible(false);
        sm.notify_begin_main_frame_started();
        sm.begin_main_frame_aborted(CommitEarlyOutReason::AbortedNotVisible);
        assert_eq!(sm.begin_main_frame_state(), BeginMainFrameState::Idle);
        assert!(sm.needs_begin_main_frame(), "main frame requested again");
        perform(&mut sm, Action::None);
        sm.set_visible(true);
        sm.on_begin_impl_frame_deadline();
        sm.on_begin_impl_frame_idle();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
    }

    #[test]
    fn no_update_early_out_wants_proactive_begin_frame() {
        let mut sm = active_machine(settings());
        sm.set_needs_begin_main_frame();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        sm.notify_begin_main_frame_started();
        sm.begin_main_frame_aborted(CommitEarlyOutReason::FinishedNoUpdates);
        assert!(!sm.commit_pending(), "no-update early out completes the commit");
        assert!(!sm.has_pending_tree(), "no tree was produced");
        assert!(!sm.needs_begin_main_frame(), "nothing re-requested");
        assert!(
            sm.proactive_begin_frame_wanted(),
            "another commit may follow soon"
        );
        sm.on_begin_impl_frame_deadline();
        sm.on_begin_impl_frame_idle();
        sm.on_begin_impl_frame();
        assert!(
            !sm.proactive_begin_frame_wanted(),
            "the hint lasts one frame"
        );
    }

    #[test]
    fn lost_frame_sink_is_recreated_after_draining() {
        let mut sm = active_machine(settings());
        sm.has_pending_tree = true;
        sm.set_needs_redraw();
        sm.did_lose_frame_sink();
        assert!(!sm.needs_redraw(), "nothing to redraw onto");
        assert!(sm.pending_activations_should_be_forced(), "no sink");
        perform(&mut sm, Action::ActivateSyncTree);
        perform(&mut sm, Action::DrawAbort);
        perform(&mut sm, Action::BeginFrameSinkCreation);
        sm.did_create_and_initialize_frame_sink();
        assert!(
            sm.needs_begin_main_frame(),
            "a recreated sink needs fresh main-thread content"
        );
    }

    #[test]
    fn frame_sink_creation_waits_for_commit_when_aborting_commits() {
        let mut sm = active_machine(settings());
        sm.set_needs_begin_main_frame();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        sm.did_lose_frame_sink();
        sm.on_begin_impl_frame_deadline();
        sm.on_begin_impl_frame_idle();
        perform(&mut sm, Action::None);
        sm.begin_main_frame_aborted(CommitEarlyOutReason::AbortedFrameSinkLost);
        perform(&mut sm, Action::BeginFrameSinkCreation);
    }

    #[test]
    fn frame_sink_creation_may_overlap_commit_when_allowed() {
        let mut s = settings();
        s.abort_commit_before_frame_sink_creation = false;
        let mut sm = active_machine(s);
        sm.set_needs_begin_main_frame();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        sm.did_lose_frame_sink();
        sm.on_begin_impl_frame_deadline();
        sm.on_begin_impl_frame_idle();
        perform(&mut sm, Action::BeginFrameSinkCreation);
    }

    #[test]
    fn failed_frame_sink_creation_returns_to_none() {
        let mut sm = SchedulerStateMachine::new(settings());
        sm.set_visible(true);
        perform(&mut sm, Action::BeginFrameSinkCreation);
        sm.did_fail_to_initialize_frame_sink();
        assert_eq!(sm.frame_sink_state(), FrameSinkState::None);
        assert_eq!(sm.next_action(), Action::BeginFrameSinkCreation, "retry");
    }

    #[test]
    fn submit_throttling_blocks_draws_and_main_frames() {
        let mut sm = active_machine(settings());
        sm.set_needs_redraw();
        sm.on_begin_impl_frame();
        sm.on_begin_impl_frame_deadline();
        perform(&mut sm, Action::DrawIfPossible);
        assert!(sm.is_draw_throttled(), "one frame awaiting ack");
        sm.set_needs_begin_main_frame();
        // Having just submitted inside the deadline allows one main frame.
        perform(&mut sm, Action::SendBeginMainFrame);
        sm.begin_main_frame_aborted(CommitEarlyOutReason::AbortedDeferredCommit);
        sm.on_begin_impl_frame_idle();

        sm.set_needs_redraw();
        sm.on_begin_impl_frame();
        assert_eq!(sm.next_action(), Action::None, "throttled main frame");
        assert_eq!(
            sm.current_begin_impl_frame_deadline_mode(),
            DeadlineMode::Regular,
            "throttled frames do not rush the deadline"
        );
        sm.on_begin_impl_frame_deadline();
        assert_eq!(sm.next_action(), Action::None, "throttled draw");
        sm.did_receive_compositor_frame_ack();
        assert_eq!(sm.next_action(), Action::DrawIfPossible, "ack unthrottles");
    }

    #[test]
    fn deadline_modes() {
        let mut sm = active_machine(settings());
        sm.on_begin_impl_frame();
        assert_eq!(sm.current_begin_impl_frame_deadline_mode(), DeadlineMode::Late);
        sm.set_needs_redraw();
        assert_eq!(
            sm.current_begin_impl_frame_deadline_mode(),
            DeadlineMode::Immediate,
            "impl-only redraw fires immediately"
        );
        sm.set_needs_begin_main_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        assert_eq!(
            sm.current_begin_impl_frame_deadline_mode(),
            DeadlineMode::Regular,
            "waits for main-thread content"
        );
        sm.set_impl_latency_takes_priority(true);
        assert_eq!(
            sm.current_begin_impl_frame_deadline_mode(),
            DeadlineMode::Immediate,
            "impl latency priority does not wait for the main thread"
        );

        let mut sync = active_machine(SchedulerSettings::synchronous());
        sync.set_needs_redraw();
        sync.on_begin_impl_frame();
        assert_eq!(sync.current_begin_impl_frame_deadline_mode(), DeadlineMode::None);
    }

    #[test]
    fn ready_to_draw_blocks_the_deadline() {
        let mut s = settings();
        s.wait_for_ready_to_draw = true;
        let mut sm = active_machine(s);
        sm.has_pending_tree = true;
        sm.pending_tree_is_ready_for_activation = true;
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::ActivateSyncTree);
        assert_eq!(
            sm.current_begin_impl_frame_deadline_mode(),
            DeadlineMode::BlockedOnReadyToDraw
        );
        sm.notify_ready_to_draw();
        assert_eq!(
            sm.current_begin_impl_frame_deadline_mode(),
            DeadlineMode::Immediate
        );
    }

    #[test]
    fn begin_frame_needed_tracks_work() {
        let mut sm = active_machine(settings());
        assert!(!sm.begin_frame_needed(), "idle machine needs no frames");
        sm.set_needs_redraw();
        assert!(sm.begin_frame_needed(), "redraw needs a frame");
        sm.set_visible(false);
        assert!(!sm.begin_frame_needed(), "invisible needs no frames");
        sm.set_visible(true);
        sm.set_defer_commits(true);
        sm.needs_redraw = false;
        sm.set_needs_begin_main_frame();
        assert!(!sm.begin_frame_needed(), "deferred commits need no frames");
        sm.set_defer_commits(false);
        assert!(sm.begin_frame_needed(), "main frame needs a frame");
    }

    #[test]
    fn prepare_tiles_only_in_deadline() {
        let mut sm = active_machine(settings());
        sm.set_needs_prepare_tiles();
        sm.on_begin_impl_frame();
        assert_eq!(sm.next_action(), Action::None);
        sm.on_begin_impl_frame_deadline();
        perform(&mut sm, Action::PrepareTiles);
        sm.set_needs_prepare_tiles();
        perform(&mut sm, Action::None);
        sm.on_begin_impl_frame_idle();
        sm.on_begin_impl_frame();
        sm.did_prepare_tiles();
        sm.set_needs_prepare_tiles();
        sm.on_begin_impl_frame_deadline();
        assert_eq!(
            sm.next_action(),
            Action::None,
            "tiles prepared elsewhere this frame"
        );
    }

    #[test]
    fn synchronous_compositor_invalidates_inside_begin_frame() {
        let mut sm = active_machine(SchedulerSettings::synchronous());
        sm.set_needs_redraw();
        assert_eq!(sm.next_action(), Action::None, "idle");
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::InvalidateFrameSink);
        perform(&mut sm, Action::None);
        sm.on_begin_impl_frame_idle();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::InvalidateFrameSink);
    }

    #[test]
    fn resourceless_draw_ignores_visibility() {
        let mut sm = active_machine(SchedulerSettings::synchronous());
        sm.set_needs_redraw();
        sm.set_visible(false);
        sm.on_begin_impl_frame();
        sm.on_begin_impl_frame_deadline();
        assert_eq!(sm.next_action(), Action::None);
        sm.set_resourceless_software_draw(true);
        assert_eq!(sm.next_action(), Action::DrawIfPossible);
    }

    #[test]
    fn skip_next_main_frame_lasts_one_frame() {
        let mut sm = active_machine(settings());
        sm.set_needs_begin_main_frame();
        sm.set_skip_next_begin_main_frame_to_reduce_latency();
        sm.on_begin_impl_frame();
        assert_eq!(sm.next_action(), Action::None, "skipped");
        sm.on_begin_impl_frame_deadline();
        sm.on_begin_impl_frame_idle();
        sm.on_begin_impl_frame();
        assert_eq!(sm.next_action(), Action::SendBeginMainFrame);
    }

    #[test]
    fn main_thread_missed_deadline_is_computed_at_idle() {
        let mut sm = active_machine(settings());
        sm.set_needs_begin_main_frame();
        sm.on_begin_impl_frame();
        perform(&mut sm, Action::SendBeginMainFrame);
        sm.on_begin_impl_frame_deadline();
        sm.on_begin_impl_frame_idle();
        assert!(sm.main_thread_missed_last_deadline(), "commit still out");
        sm.notify_begin_main_frame_started();
        sm.begin_main_frame_aborted(CommitEarlyOutReason::FinishedNoUpdates);
        sm.on_begin_impl_frame();
        sm.on_begin_impl_frame_deadline();
        sm.on_begin_impl_frame_idle();
        assert!(!sm.main_thread_missed_last_deadline(), "caught up");
    }

    #[test]
    fn action_names_are_stable() {
        assert_eq!(Action::DrawForced.as_str(), "DRAW_FORCED");
        assert_eq!(
            alloc::format!("{}", Action::BeginFrameSinkCreation),
            "BEGIN_COMPOSITOR_FRAME_SINK_CREATION"
        );
    }
}
