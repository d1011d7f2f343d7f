// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Begin-frame sources: where the frame cadence comes from.
//!
//! A [`BeginFrameSource`] is polled by the
//! [`Scheduler`](crate::scheduler::Scheduler). It only delivers frames while
//! observed, and it never queues a backlog: however many ticks were missed,
//! at most one frame is delivered for them.
//!
//! | Source | Cadence |
//! |---|---|
//! | [`SyntheticBeginFrameSource`] | fixed interval aligned to a timebase |
//! | [`BackToBackBeginFrameSource`] | next frame as soon as the last one finished |
//! | [`ExternalBeginFrameSource`] | platform vsync pushed in by a backend |
//! | [`VsyncWithFallbackSource`] | vsync, with a synthetic stand-in while vsync is silent |

use alloc::boxed::Box;

use crate::begin_frame::{BeginFrameArgs, BeginFrameKind};
use crate::time::{Duration, HostTime};

/// A provider of begin frames.
pub trait BeginFrameSource {
    /// Starts or stops delivery.
    ///
    /// When observation starts in the middle of an interval whose deadline
    /// has not passed, the source may return that interval as a
    /// [`BeginFrameKind::Missed`] replay.
    fn set_observing(&mut self, observing: bool, now: HostTime) -> Option<BeginFrameArgs>;

    /// Whether delivery is on.
    fn is_observing(&self) -> bool;

    /// When [`poll`](Self::poll) should next be called, if the source has
    /// anything to deliver.
    fn next_tick_time(&self) -> Option<HostTime>;

    /// Returns the frame due at `now`, if any.
    fn poll(&mut self, now: HostTime) -> Option<BeginFrameArgs>;

    /// The observer finished the frame it was given.
    fn did_finish_frame(&mut self, now: HostTime) {
        _ = now;
    }

    /// Whether the source has stopped producing frames for reasons outside
    /// the observer's control (for example, the display is off).
    fn is_paused(&self) -> bool {
        false
    }
}

impl<T: BeginFrameSource + ?Sized> BeginFrameSource for Box<T> {
    fn set_observing(&mut self, observing: bool, now: HostTime) -> Option<BeginFrameArgs> {
        (**self).set_observing(observing, now)
    }

    fn is_observing(&self) -> bool {
        (**self).is_observing()
    }

    fn next_tick_time(&self) -> Option<HostTime> {
        (**self).next_tick_time()
    }

    fn poll(&mut self, now: HostTime) -> Option<BeginFrameArgs> {
        (**self).poll(now)
    }

    fn did_finish_frame(&mut self, now: HostTime) {
        (**self).did_finish_frame(now);
    }

    fn is_paused(&self) -> bool {
        (**self).is_paused()
    }
}

// ---------------------------------------------------------------------------
// Synthetic
// ---------------------------------------------------------------------------

/// A timer-driven source ticking at `timebase + k * interval`.
#[derive(Clone, Debug)]
pub struct SyntheticBeginFrameSource {
    timebase: HostTime,
    interval: Duration,
    parent_draw_divisor: u32,
    observing: bool,
    next_tick: HostTime,
    last_tick: Option<HostTime>,
    sequence: u64,
}

impl SyntheticBeginFrameSource {
    /// Creates a source ticking every `interval` from `timebase`.
    ///
    /// Deadlines leave `interval / parent_draw_divisor` before the next tick.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    #[must_use]
    pub fn new(timebase: HostTime, interval: Duration, parent_draw_divisor: u32) -> Self {
        assert!(!interval.is_zero(), "synthetic interval must be non-zero");
        Self {
            timebase,
            interval,
            parent_draw_divisor,
            observing: false,
            next_tick: timebase,
            last_tick: None,
            sequence: 0,
        }
    }

    /// Re-aligns the cadence, typically to a vsync timestamp.
    ///
    /// A zero `interval` keeps the current one.
    pub fn update_vsync_parameters(&mut self, timebase: HostTime, interval: Duration) {
        self.timebase = timebase;
        if !interval.is_zero() {
            self.interval = interval;
        }
        if let Some(last) = self.last_tick {
            let next = last
                .saturating_add(self.interval)
                .snapped_to(self.timebase, self.interval);
            self.next_tick = if next <= last { next + self.interval } else { next };
        }
    }

    /// The current tick interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    fn make_args(&mut self, frame_time: HostTime, kind: BeginFrameKind) -> BeginFrameArgs {
        self.sequence += 1;
        BeginFrameArgs::with_parent_draw_time(
            self.sequence,
            frame_time,
            self.interval,
            self.interval.div(self.parent_draw_divisor),
            kind,
        )
    }
}

impl BeginFrameSource for SyntheticBeginFrameSource {
    fn set_observing(&mut self, observing: bool, now: HostTime) -> Option<BeginFrameArgs> {
        if observing == self.observing {
            return None;
        }
        self.observing = observing;
        if !observing {
            return None;
        }
        let current = now.snapped_to(self.timebase, self.interval);
        self.next_tick = if current > now {
            current
        } else {
            current + self.interval
        };
        if current > now || self.last_tick == Some(current) {
            return None;
        }
        let args = self.make_args(current, BeginFrameKind::Missed);
        if args.deadline() <= now {
            return None;
        }
        self.last_tick = Some(current);
        Some(args)
    }

    fn is_observing(&self) -> bool {
        self.observing
    }

    fn next_tick_time(&self) -> Option<HostTime> {
        self.observing.then_some(self.next_tick)
    }

    fn poll(&mut self, now: HostTime) -> Option<BeginFrameArgs> {
        if !self.observing || now < self.next_tick {
            return None;
        }
        // Any ticks between next_tick and now are folded into this one.
        let tick = now.snapped_to(self.timebase, self.interval);
        self.next_tick = tick + self.interval;
        self.last_tick = Some(tick);
        Some(self.make_args(tick, BeginFrameKind::Normal))
    }
}

// ---------------------------------------------------------------------------
// Back to back
// ---------------------------------------------------------------------------

/// An unthrottled source: a new frame is ready as soon as the previous one
/// finishes.
#[derive(Clone, Debug)]
pub struct BackToBackBeginFrameSource {
    nominal_interval: Duration,
    observing: bool,
    ready_at: Option<HostTime>,
    sequence: u64,
}

impl BackToBackBeginFrameSource {
    /// Creates a source whose frames advertise `nominal_interval`.
    #[must_use]
    pub const fn new(nominal_interval: Duration) -> Self {
        Self {
            nominal_interval,
            observing: false,
            ready_at: None,
            sequence: 0,
        }
    }
}

impl Default for BackToBackBeginFrameSource {
    fn default() -> Self {
        Self::new(Duration::SIXTY_HZ)
    }
}

impl BeginFrameSource for BackToBackBeginFrameSource {
    fn set_observing(&mut self, observing: bool, now: HostTime) -> Option<BeginFrameArgs> {
        if observing && !self.observing {
            self.ready_at = Some(now);
        }
        if !observing {
            self.ready_at = None;
        }
        self.observing = observing;
        None
    }

    fn is_observing(&self) -> bool {
        self.observing
    }

    fn next_tick_time(&self) -> Option<HostTime> {
        if self.observing { self.ready_at } else { None }
    }

    fn poll(&mut self, now: HostTime) -> Option<BeginFrameArgs> {
        if !self.observing {
            return None;
        }
        self.ready_at.filter(|at| *at <= now)?;
        self.ready_at = None;
        self.sequence += 1;
        Some(BeginFrameArgs::new(
            self.sequence,
            now,
            now + self.nominal_interval,
            self.nominal_interval,
            BeginFrameKind::Normal,
        ))
    }

    fn did_finish_frame(&mut self, now: HostTime) {
        if self.observing {
            self.ready_at = Some(now);
        }
    }
}

// ---------------------------------------------------------------------------
// External
// ---------------------------------------------------------------------------

/// A source fed by platform vsync notifications.
#[derive(Clone, Debug)]
pub struct ExternalBeginFrameSource {
    parent_draw_divisor: u32,
    observing: bool,
    paused: bool,
    pending: Option<BeginFrameArgs>,
    last: Option<BeginFrameArgs>,
    last_delivered_sequence: Option<u64>,
    sequence: u64,
}

impl ExternalBeginFrameSource {
    /// Creates a source; vsync deadlines leave
    /// `interval / parent_draw_divisor` before the next vsync.
    #[must_use]
    pub const fn new(parent_draw_divisor: u32) -> Self {
        Self {
            parent_draw_divisor,
            observing: false,
            paused: false,
            pending: None,
            last: None,
            last_delivered_sequence: None,
            sequence: 0,
        }
    }

    /// Records a vsync at `frame_time` with the display's `interval`.
    pub fn on_vsync(&mut self, frame_time: HostTime, interval: Duration) {
        self.sequence += 1;
        let args = BeginFrameArgs::with_parent_draw_time(
            self.sequence,
            frame_time,
            interval,
            interval.div(self.parent_draw_divisor),
            BeginFrameKind::Normal,
        );
        self.on_begin_frame(args);
    }

    /// Records fully formed args from the platform.
    ///
    /// An undelivered frame is replaced, so bursts collapse to the newest.
    pub fn on_begin_frame(&mut self, args: BeginFrameArgs) {
        self.last = Some(args);
        if self.observing && !self.paused {
            self.pending = Some(args);
        }
    }

    /// Marks the platform source paused or running.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if paused {
            self.pending = None;
        }
    }

    /// The most recent args received, delivered or not.
    #[must_use]
    pub const fn last_args(&self) -> Option<&BeginFrameArgs> {
        self.last.as_ref()
    }
}

impl BeginFrameSource for ExternalBeginFrameSource {
    fn set_observing(&mut self, observing: bool, now: HostTime) -> Option<BeginFrameArgs> {
        let was_observing = self.observing;
        self.observing = observing;
        if !observing {
            self.pending = None;
            return None;
        }
        if was_observing || self.paused {
            return None;
        }
        let last = self.last?;
        if last.deadline() <= now || self.last_delivered_sequence == Some(last.sequence()) {
            return None;
        }
        self.last_delivered_sequence = Some(last.sequence());
        Some(last.as_missed())
    }

    fn is_observing(&self) -> bool {
        self.observing
    }

    fn next_tick_time(&self) -> Option<HostTime> {
        self.pending.map(|args| args.frame_time())
    }

    fn poll(&mut self, _now: HostTime) -> Option<BeginFrameArgs> {
        let args = self.pending.take()?;
        self.last_delivered_sequence = Some(args.sequence());
        Some(args)
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}

// ---------------------------------------------------------------------------
// Vsync with synthetic fallback
// ---------------------------------------------------------------------------

/// Prefers platform vsync; ticks synthetically, aligned to the last known
/// vsync, while vsync has been silent for `fallback_after` intervals.
#[derive(Clone, Debug)]
pub struct VsyncWithFallbackSource {
    vsync: ExternalBeginFrameSource,
    synthetic: SyntheticBeginFrameSource,
    fallback_after: u32,
    last_activity: HostTime,
    using_fallback: bool,
    observing: bool,
}

impl VsyncWithFallbackSource {
    /// Creates a source that assumes `interval` until vsync says otherwise.
    #[must_use]
    pub fn new(interval: Duration, parent_draw_divisor: u32, fallback_after: u32) -> Self {
        Self {
            vsync: ExternalBeginFrameSource::new(parent_draw_divisor),
            synthetic: SyntheticBeginFrameSource::new(
                HostTime::ZERO,
                interval,
                parent_draw_divisor,
            ),
            fallback_after: fallback_after.max(1),
            last_activity: HostTime::ZERO,
            using_fallback: false,
            observing: false,
        }
    }

    /// Records a platform vsync; switches back from the fallback if needed.
    pub fn on_vsync(&mut self, frame_time: HostTime, interval: Duration) {
        self.last_activity = frame_time;
        self.synthetic.update_vsync_parameters(frame_time, interval);
        if self.using_fallback {
            self.using_fallback = false;
            _ = self.synthetic.set_observing(false, frame_time);
        }
        self.vsync.on_vsync(frame_time, interval);
    }

    /// Returns `true` while synthetic ticks stand in for vsync.
    #[must_use]
    pub const fn using_fallback(&self) -> bool {
        self.using_fallback
    }

    fn fallback_time(&self) -> HostTime {
        self.last_activity
            .saturating_add(self.synthetic.interval().saturating_mul(self.fallback_after))
    }
}

impl BeginFrameSource for VsyncWithFallbackSource {
    fn set_observing(&mut self, observing: bool, now: HostTime) -> Option<BeginFrameArgs> {
        if observing == self.observing {
            return None;
        }
        self.observing = observing;
        if !observing {
            self.using_fallback = false;
            _ = self.synthetic.set_observing(false, now);
            return self.vsync.set_observing(false, now);
        }
        self.last_activity = self.last_activity.max(now);
        self.vsync.set_observing(true, now)
    }

    fn is_observing(&self) -> bool {
        self.observing
    }

    fn next_tick_time(&self) -> Option<HostTime> {
        if !self.observing {
            return None;
        }
        if self.using_fallback {
            return self.synthetic.next_tick_time();
        }
        let fallback = self.fallback_time();
        Some(self.vsync.next_tick_time().map_or(fallback, |t| t.min(fallback)))
    }

    fn poll(&mut self, now: HostTime) -> Option<BeginFrameArgs> {
        if !self.observing {
            return None;
        }
        if !self.using_fallback {
            if let Some(args) = self.vsync.poll(now) {
                return Some(args);
            }
            if now < self.fallback_time() {
                return None;
            }
            self.using_fallback = true;
            if let Some(missed) = self.synthetic.set_observing(true, now) {
                return Some(missed);
            }
        }
        self.synthetic.poll(now)
    }

    fn is_paused(&self) -> bool {
        self.vsync.is_paused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration(1_000);

    #[test]
    fn synthetic_ticks_on_grid() {
        let mut source = SyntheticBeginFrameSource::new(HostTime(0), INTERVAL, 3);
        assert_eq!(source.next_tick_time(), None, "not observing");
        assert!(
            source.set_observing(true, HostTime(0)).is_some(),
            "starting exactly on a tick replays it"
        );
        assert_eq!(source.next_tick_time(), Some(HostTime(1_000)));
        assert!(source.poll(HostTime(999)).is_none(), "not due yet");
        let args = source.poll(HostTime(1_000)).expect("tick is due");
        assert_eq!(args.frame_time(), HostTime(1_000));
        assert_eq!(args.deadline(), HostTime(1_667), "a third reserved");
        assert_eq!(args.kind(), BeginFrameKind::Normal);
    }

    #[test]
    fn synthetic_collapses_missed_ticks() {
        let mut source = SyntheticBeginFrameSource::new(HostTime(0), INTERVAL, 3);
        let _ = source.set_observing(true, HostTime(100));
        let args = source.poll(HostTime(5_300)).expect("late poll delivers");
        assert_eq!(args.frame_time(), HostTime(5_000), "only the newest tick");
        assert_eq!(source.next_tick_time(), Some(HostTime(6_000)));
        assert!(source.poll(HostTime(5_900)).is_none(), "no backlog");
    }

    #[test]
    fn synthetic_replays_current_interval_on_start() {
        let mut source = SyntheticBeginFrameSource::new(HostTime(0), INTERVAL, 3);
        let missed = source
            .set_observing(true, HostTime(2_200))
            .expect("deadline still ahead");
        assert_eq!(missed.kind(), BeginFrameKind::Missed);
        assert_eq!(missed.frame_time(), HostTime(2_000));

        let _ = source.set_observing(false, HostTime(2_300));
        assert!(
            source.set_observing(true, HostTime(2_400)).is_none(),
            "an interval is replayed at most once"
        );
        let _ = source.set_observing(false, HostTime(2_500));
        assert!(
            source.set_observing(true, HostTime(3_900)).is_none(),
            "past the deadline there is nothing to replay"
        );
    }

    #[test]
    fn synthetic_realigns_to_vsync() {
        let mut source = SyntheticBeginFrameSource::new(HostTime(0), INTERVAL, 3);
        let _ = source.set_observing(true, HostTime(0));
        let _ = source.poll(HostTime(1_000));
        source.update_vsync_parameters(HostTime(1_250), Duration(500));
        assert_eq!(source.next_tick_time(), Some(HostTime(1_250)));
    }

    #[test]
    fn back_to_back_waits_for_finish() {
        let mut source = BackToBackBeginFrameSource::default();
        assert!(source.set_observing(true, HostTime(10)).is_none(), "no replay");
        assert_eq!(source.next_tick_time(), Some(HostTime(10)));
        assert!(source.poll(HostTime(10)).is_some(), "first frame is immediate");
        assert_eq!(source.next_tick_time(), None, "waits for the frame to finish");
        assert!(source.poll(HostTime(50)).is_none(), "still busy");
        source.did_finish_frame(HostTime(60));
        assert_eq!(
            source.poll(HostTime(60)).map(|a| a.frame_time()),
            Some(HostTime(60))
        );
    }

    #[test]
    fn external_delivers_only_newest_vsync() {
        let mut source = ExternalBeginFrameSource::new(3);
        let _ = source.set_observing(true, HostTime(0));
        source.on_vsync(HostTime(1_000), INTERVAL);
        source.on_vsync(HostTime(2_000), INTERVAL);
        assert_eq!(source.next_tick_time(), Some(HostTime(2_000)));
        let args = source.poll(HostTime(2_100)).expect("pending vsync");
        assert_eq!(args.frame_time(), HostTime(2_000));
        assert!(source.poll(HostTime(2_100)).is_none(), "delivered once");
    }

    #[test]
    fn external_replays_last_vsync_as_missed() {
        let mut source = ExternalBeginFrameSource::new(3);
        source.on_vsync(HostTime(1_000), INTERVAL);
        assert!(source.poll(HostTime(1_100)).is_none(), "not observing");
        let missed = source
            .set_observing(true, HostTime(1_200))
            .expect("deadline still ahead");
        assert_eq!(missed.kind(), BeginFrameKind::Missed);
        let _ = source.set_observing(false, HostTime(1_300));
        assert!(
            source.set_observing(true, HostTime(1_400)).is_none(),
            "already delivered"
        );
    }

    #[test]
    fn external_pause_drops_pending() {
        let mut source = ExternalBeginFrameSource::new(3);
        let _ = source.set_observing(true, HostTime(0));
        source.on_vsync(HostTime(1_000), INTERVAL);
        source.set_paused(true);
        assert!(source.is_paused(), "paused");
        assert!(source.poll(HostTime(1_000)).is_none(), "pause drops frames");
    }

    #[test]
    fn fallback_engages_when_vsync_stops() {
        let mut source = VsyncWithFallbackSource::new(INTERVAL, 3, 2);
        let _ = source.set_observing(true, HostTime(0));
        source.on_vsync(HostTime(1_000), INTERVAL);
        assert!(source.poll(HostTime(1_000)).is_some(), "vsync delivered");
        assert_eq!(
            source.next_tick_time(),
            Some(HostTime(3_000)),
            "fallback after two silent intervals"
        );
        assert!(source.poll(HostTime(2_500)).is_none(), "still waiting on vsync");

        let args = source.poll(HostTime(3_000)).expect("synthetic frame");
        assert!(source.using_fallback(), "fallback engaged");
        assert_eq!(args.frame_time(), HostTime(3_000), "aligned to vsync grid");

        source.on_vsync(HostTime(3_500), INTERVAL);
        assert!(!source.using_fallback(), "vsync resumed");
        let args = source.poll(HostTime(3_500)).expect("vsync frame");
        assert_eq!(args.frame_time(), HostTime(3_500));
    }
}
