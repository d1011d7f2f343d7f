// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Messages carried between the two actors.

use cadence_core::SchedulerError;
use cadence_core::begin_frame::BeginFrameArgs;
use cadence_core::client::FrameSinkKind;
use cadence_core::state_machine::CommitEarlyOutReason;
use kurbo::Size;

use crate::completion::CompletionSignal;

/// Main thread to impl thread.
pub(crate) enum ImplMessage<C, F> {
    SetVisible(bool),
    SetViewportSize(Size),
    SetNeedsCommit,
    SetNeedsRedraw,
    SetDeferCommits(bool),
    BeginMainFrameStarted,
    BeginMainFrameAborted(CommitEarlyOutReason),
    /// The main thread is blocked on `done` until the commit lands.
    ReadyToCommit {
        content: C,
        done: CompletionSignal,
    },
    /// `None` when the main thread failed to create a sink.
    FrameSink(Option<F>),
    Stop(CompletionSignal),
}

/// Impl thread to main thread.
#[derive(Debug)]
pub(crate) enum MainMessage {
    BeginMainFrame(BeginFrameArgs),
    RequestFrameSink(FrameSinkKind),
    DidLoseFrameSink,
    Fatal(SchedulerError),
}
