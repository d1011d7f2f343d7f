// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame-production scheduling for a two-thread compositor.
//!
//! `cadence_core` decides, on every display refresh, whether the impl
//! (compositor) thread should ask the main thread for new content, commit
//! it, activate it, draw it, or do nothing. It is `no_std` compatible (with
//! `alloc`), performs no I/O, and owns no threads.
//!
//! # Architecture
//!
//! ```text
//!   BeginFrameSource ──► Scheduler::begin_frame() ──► SchedulerStateMachine
//!         ▲                     │                            │
//!         │                     │ deadline timer             │ next_action()
//!   set_observing()             ▼                            ▼
//!         └───────────── Scheduler::run_pending() ──► SchedulerClient
//!                                                     (commit / activate / draw)
//! ```
//!
//! **[`state_machine`]**: the pure decision engine. Given everything
//! reported so far, it returns the single next [`Action`](state_machine::Action).
//!
//! **[`scheduler`]**: owns time. Adjusts begin-frame deadlines with the
//! [`timing_history`], posts the deadline, drains actions into the client,
//! queues frames that arrive while busy, and recovers latency.
//!
//! **[`client`]**: the narrow capabilities the scheduler drives, and the
//! [`DrawResult`](client::DrawResult) a draw reports back.
//!
//! **[`source`]**: synthetic, back-to-back, external vsync, and
//! vsync-with-fallback begin-frame sources.
//!
//! **[`begin_frame`]**: [`BeginFrameArgs`](begin_frame::BeginFrameArgs) and
//! the tracker of the frame in progress.
//!
//! **[`settings`]**: every tunable threshold, in one `Copy` struct.
//!
//! **[`time`]**: nanosecond [`HostTime`](time::HostTime) and
//! [`Duration`](time::Duration), and the [`Clock`](time::Clock) seam.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) and event types for
//! scheduler instrumentation, behind a zero-cost [`Tracer`](trace::Tracer).
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace` (disabled by default): Enables `Tracer` method bodies.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod begin_frame;
pub mod client;
pub mod error;
pub mod scheduler;
pub mod settings;
pub mod source;
pub mod state_machine;
pub mod time;
pub mod timing_history;
pub mod trace;

pub use error::SchedulerError;
