// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Begin-frame arguments: the timing payload of one display refresh.
//!
//! A [`BeginFrameArgs`] is produced by a
//! [`BeginFrameSource`](crate::source::BeginFrameSource) once per refresh and
//! carries the frame time, the draw deadline, and the refresh interval.
//! Values are immutable once built; the scheduler derives adjusted copies
//! rather than mutating them.

use crate::time::{Duration, HostTime};

/// Whether a begin frame was delivered on time or replayed after the fact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BeginFrameKind {
    /// Delivered at its tick.
    #[default]
    Normal,
    /// A retroactive replay of a tick that happened while nobody was
    /// observing (or while the observer was busy).
    Missed,
}

/// Timing for one begin-frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BeginFrameArgs {
    frame_time: HostTime,
    deadline: HostTime,
    interval: Option<Duration>,
    sequence: u64,
    kind: BeginFrameKind,
    on_critical_path: bool,
}

impl BeginFrameArgs {
    /// Creates valid args.
    ///
    /// # Panics
    ///
    /// Panics if `deadline` precedes `frame_time`.
    #[must_use]
    pub fn new(
        sequence: u64,
        frame_time: HostTime,
        deadline: HostTime,
        interval: Duration,
        kind: BeginFrameKind,
    ) -> Self {
        assert!(
            deadline >= frame_time,
            "begin-frame deadline must not precede its frame time"
        );
        Self {
            frame_time,
            deadline,
            interval: Some(interval),
            sequence,
            kind,
            on_critical_path: true,
        }
    }

    /// Creates args whose deadline leaves `parent_draw` for the consumer of
    /// the frame before the next tick.
    #[must_use]
    pub fn with_parent_draw_time(
        sequence: u64,
        frame_time: HostTime,
        interval: Duration,
        parent_draw: Duration,
        kind: BeginFrameKind,
    ) -> Self {
        let deadline = frame_time + interval.saturating_sub(parent_draw);
        Self::new(sequence, frame_time, deadline, interval, kind)
    }

    /// Returns `true` unless these are the default (empty) args.
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.interval.is_some()
    }

    /// Time the refresh started.
    #[inline]
    #[must_use]
    pub const fn frame_time(&self) -> HostTime {
        self.frame_time
    }

    /// Latest time a draw for this frame is considered on time.
    #[inline]
    #[must_use]
    pub const fn deadline(&self) -> HostTime {
        self.deadline
    }

    /// Refresh interval; zero for invalid args.
    #[inline]
    #[must_use]
    pub const fn interval(&self) -> Duration {
        match self.interval {
            Some(interval) => interval,
            None => Duration::ZERO,
        }
    }

    /// Source-assigned sequence number.
    #[inline]
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether the frame was delivered on time.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> BeginFrameKind {
        self.kind
    }

    /// Whether the work requested with these args is on the critical path to
    /// the next draw.
    #[inline]
    #[must_use]
    pub const fn on_critical_path(&self) -> bool {
        self.on_critical_path
    }

    /// Expected frame time of the following refresh.
    #[inline]
    #[must_use]
    pub fn next_frame_time(&self) -> HostTime {
        self.frame_time.saturating_add(self.interval())
    }

    /// Returns a copy with the deadline pulled earlier by `by`, never before
    /// the frame time.
    #[must_use]
    pub fn with_deadline_moved_earlier(mut self, by: Duration) -> Self {
        self.deadline = self.deadline.saturating_sub(by).max(self.frame_time);
        self
    }

    /// Returns a copy re-tagged as a retroactive replay.
    #[must_use]
    pub const fn as_missed(mut self) -> Self {
        self.kind = BeginFrameKind::Missed;
        self
    }

    /// Returns a copy with the critical-path flag set to `critical`.
    #[must_use]
    pub const fn with_critical_path(mut self, critical: bool) -> Self {
        self.on_critical_path = critical;
        self
    }
}

impl core::fmt::Debug for BeginFrameArgs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if !self.is_valid() {
            return f.write_str("BeginFrameArgs(invalid)");
        }
        f.debug_struct("BeginFrameArgs")
            .field("sequence", &self.sequence)
            .field("frame_time", &self.frame_time)
            .field("deadline", &self.deadline)
            .field("interval", &self.interval())
            .field("kind", &self.kind)
            .field("on_critical_path", &self.on_critical_path)
            .finish()
    }
}

/// Start/finish bookkeeping for the begin-impl-frame in progress.
///
/// Keeps the args of the frame currently being produced, and of the last one
/// that finished, so late callers can still ask what the most recent frame
/// looked like.
#[derive(Clone, Copy, Debug, Default)]
pub struct BeginFrameTracker {
    current: Option<BeginFrameArgs>,
    last: Option<BeginFrameArgs>,
}

impl BeginFrameTracker {
    /// Creates an idle tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: None,
            last: None,
        }
    }

    /// Records the start of a frame.
    ///
    /// # Panics
    ///
    /// Panics if a frame is already in progress or `args` are invalid.
    pub fn start(&mut self, args: BeginFrameArgs) {
        assert!(args.is_valid(), "cannot start a frame with invalid args");
        assert!(
            self.current.is_none(),
            "begin frame started while another was in progress"
        );
        self.current = Some(args);
    }

    /// Records the end of the frame in progress.
    ///
    /// # Panics
    ///
    /// Panics if no frame is in progress.
    pub fn finish(&mut self) {
        let finished = self.current.take();
        assert!(finished.is_some(), "finished a frame that never started");
        self.last = finished;
    }

    /// Returns `true` between [`start`](Self::start) and
    /// [`finish`](Self::finish).
    #[must_use]
    pub const fn has_started(&self) -> bool {
        self.current.is_some()
    }

    /// Args of the frame in progress.
    #[must_use]
    pub const fn current(&self) -> Option<&BeginFrameArgs> {
        self.current.as_ref()
    }

    /// Args of the most recently finished frame.
    #[must_use]
    pub const fn last(&self) -> Option<&BeginFrameArgs> {
        self.last.as_ref()
    }

    /// Interval of the frame in progress, else of the last one, else the
    /// nominal 60 Hz interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.current
            .or(self.last)
            .map_or(Duration::SIXTY_HZ, |args| args.interval())
    }
}
