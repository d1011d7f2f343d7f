// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! One-shot completion events for synchronous cross-thread hand-offs.

use std::time::Duration;

use crossbeam_channel as channel;

/// Creates a linked signal/event pair.
#[must_use]
pub fn completion() -> (CompletionSignal, CompletionEvent) {
    let (tx, rx) = channel::bounded(1);
    (CompletionSignal { tx }, CompletionEvent { rx })
}

/// The side that finishes the work.
#[derive(Debug)]
pub struct CompletionSignal {
    tx: channel::Sender<()>,
}

impl CompletionSignal {
    /// Wakes the waiter.
    pub fn signal(self) {
        // The waiter may have given up; that is not our concern.
        _ = self.tx.try_send(());
    }
}

/// The side that blocks until the work is done.
///
/// Dropping the [`CompletionSignal`] without signalling abandons the event,
/// which the waiter observes as `false`.
#[derive(Debug)]
pub struct CompletionEvent {
    rx: channel::Receiver<()>,
}

impl CompletionEvent {
    /// Blocks until signalled. Returns `false` if the signal was abandoned.
    #[must_use]
    pub fn wait(self) -> bool {
        self.rx.recv().is_ok()
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// Returns `None` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Some(true),
            Err(channel::RecvTimeoutError::Disconnected) => Some(false),
            Err(channel::RecvTimeoutError::Timeout) => None,
        }
    }
}
