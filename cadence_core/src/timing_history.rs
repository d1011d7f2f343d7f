// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Smoothed estimates of how long each pipeline stage takes.
//!
//! The scheduler uses these to pull the draw deadline earlier by the expected
//! draw time, and to decide whether the main thread can get a frame through
//! commit and activation before the current deadline.

use crate::time::{Duration, HostTime};

/// Exponential moving average tracker.
#[derive(Clone, Copy, Debug)]
struct Ema {
    value: f32,
    alpha: f32,
    initialized: bool,
}

impl Ema {
    const fn new(alpha: f32) -> Self {
        Self {
            value: 0.0,
            alpha,
            initialized: false,
        }
    }

    fn update(&mut self, sample: Duration) {
        let sample = sample.as_f32();
        if self.initialized {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        } else {
            self.value = sample;
            self.initialized = true;
        }
    }

    fn get(&self) -> Duration {
        Duration::from_f32(self.value)
    }
}

/// Timestamps of the stage currently being measured.
#[derive(Clone, Copy, Debug, Default)]
struct StageStarts {
    begin_main_frame_sent: Option<HostTime>,
    commit: Option<HostTime>,
    activate: Option<HostTime>,
    draw: Option<HostTime>,
}

/// Running duration estimates for the frame pipeline.
///
/// Each `will_*`/`did_*` pair measures one stage; unmatched `did_*` calls are
/// ignored, so recording never panics on an out-of-order notification.
#[derive(Clone, Debug)]
pub struct CompositorTimingHistory {
    draw: Ema,
    begin_main_frame_to_commit: Ema,
    commit_to_ready_to_activate: Ema,
    activate: Ema,
    starts: StageStarts,
}

impl CompositorTimingHistory {
    /// Creates a history whose estimates start at zero.
    #[must_use]
    pub const fn new(alpha: f32) -> Self {
        Self {
            draw: Ema::new(alpha),
            begin_main_frame_to_commit: Ema::new(alpha),
            commit_to_ready_to_activate: Ema::new(alpha),
            activate: Ema::new(alpha),
            starts: StageStarts {
                begin_main_frame_sent: None,
                commit: None,
                activate: None,
                draw: None,
            },
        }
    }

    /// Expected duration of a draw.
    #[must_use]
    pub fn draw_duration_estimate(&self) -> Duration {
        self.draw.get()
    }

    /// Expected time from sending a begin-main-frame to its commit.
    #[must_use]
    pub fn begin_main_frame_to_commit_estimate(&self) -> Duration {
        self.begin_main_frame_to_commit.get()
    }

    /// Expected time from commit until the pending tree is ready.
    #[must_use]
    pub fn commit_to_ready_to_activate_estimate(&self) -> Duration {
        self.commit_to_ready_to_activate.get()
    }

    /// Expected duration of activation.
    #[must_use]
    pub fn activate_duration_estimate(&self) -> Duration {
        self.activate.get()
    }

    /// Expected time from a begin-main-frame to an activated tree.
    #[must_use]
    pub fn begin_main_frame_to_activate_estimate(&self) -> Duration {
        self.begin_main_frame_to_commit_estimate()
            .saturating_add(self.commit_to_ready_to_activate_estimate())
            .saturating_add(self.activate_duration_estimate())
    }

    /// A begin-main-frame was sent at `now`.
    pub fn will_begin_main_frame(&mut self, now: HostTime) {
        self.starts.begin_main_frame_sent = Some(now);
    }

    /// The begin-main-frame finished without a commit.
    pub fn begin_main_frame_aborted(&mut self) {
        self.starts.begin_main_frame_sent = None;
    }

    /// The main thread's frame committed at `now`.
    pub fn did_commit(&mut self, now: HostTime) {
        if let Some(start) = self.starts.begin_main_frame_sent.take() {
            self.begin_main_frame_to_commit
                .update(now.saturating_duration_since(start));
        }
        self.starts.commit = Some(now);
    }

    /// The pending tree became ready to activate at `now`.
    pub fn ready_to_activate(&mut self, now: HostTime) {
        if let Some(start) = self.starts.commit.take() {
            self.commit_to_ready_to_activate
                .update(now.saturating_duration_since(start));
        }
    }

    /// Activation started at `now`.
    pub fn will_activate(&mut self, now: HostTime) {
        self.starts.activate = Some(now);
    }

    /// Activation finished at `now`.
    pub fn did_activate(&mut self, now: HostTime) {
        if let Some(start) = self.starts.activate.take() {
            self.activate.update(now.saturating_duration_since(start));
        }
    }

    /// A draw started at `now`.
    pub fn will_draw(&mut self, now: HostTime) {
        self.starts.draw = Some(now);
    }

    /// The draw started at [`will_draw`](Self::will_draw) finished at `now`.
    pub fn did_draw(&mut self, now: HostTime) {
        if let Some(start) = self.starts.draw.take() {
            self.draw.update(now.saturating_duration_since(start));
        }
    }

    /// The pending draw was dropped; nothing is measured.
    pub fn draw_aborted(&mut self) {
        self.starts.draw = None;
    }
}
