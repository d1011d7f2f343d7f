// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounded, ordered mailboxes with a cancellation token.
//!
//! Each actor owns one [`Mailbox`]. Closing it (explicitly or by dropping
//! it) flips a shared flag that every [`MailboxSender`] checks before
//! delivering, so messages addressed to a stopped actor are dropped instead
//! of queueing behind it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel as channel;

/// How long a blocked send waits before re-checking the token.
const SEND_POLL: Duration = Duration::from_millis(5);

/// Creates a mailbox holding at most `capacity` undelivered messages.
#[must_use]
pub fn mailbox<M>(capacity: usize) -> (MailboxSender<M>, Mailbox<M>) {
    let (tx, rx) = channel::bounded(capacity.max(1));
    let open = Arc::new(AtomicBool::new(true));
    (
        MailboxSender {
            tx,
            open: open.clone(),
        },
        Mailbox { rx, open },
    )
}

/// The sending half. Cheap to clone.
pub struct MailboxSender<M> {
    tx: channel::Sender<M>,
    open: Arc<AtomicBool>,
}

impl<M> Clone for MailboxSender<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            open: self.open.clone(),
        }
    }
}

impl<M> std::fmt::Debug for MailboxSender<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxSender")
            .field("open", &self.is_open())
            .field("queued", &self.tx.len())
            .finish_non_exhaustive()
    }
}

impl<M> MailboxSender<M> {
    /// Returns `true` while the receiving actor accepts messages.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Delivers `message`, waiting for room if the mailbox is full.
    ///
    /// Returns `false`, dropping the message, if the mailbox is closed
    /// before or while waiting.
    pub fn send(&self, mut message: M) -> bool {
        loop {
            if !self.is_open() {
                tracing::trace!("dropped message for a closed mailbox");
                return false;
            }
            match self.tx.send_timeout(message, SEND_POLL) {
                Ok(()) => return true,
                Err(channel::SendTimeoutError::Timeout(returned)) => message = returned,
                Err(channel::SendTimeoutError::Disconnected(_)) => {
                    tracing::trace!("dropped message for a dropped mailbox");
                    return false;
                }
            }
        }
    }
}

/// What a receive produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Received<M> {
    /// The next message, in send order.
    Message(M),
    /// Nothing arrived in time.
    Timeout,
    /// The mailbox is closed or every sender is gone.
    Closed,
}

/// The receiving half, owned by one actor.
pub struct Mailbox<M> {
    rx: channel::Receiver<M>,
    open: Arc<AtomicBool>,
}

impl<M> std::fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("open", &self.is_open())
            .field("queued", &self.rx.len())
            .finish_non_exhaustive()
    }
}

impl<M> Mailbox<M> {
    /// Returns `true` until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Stops accepting messages. Queued messages are discarded on receipt.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Blocks until a message arrives.
    pub fn recv(&self) -> Received<M> {
        if !self.is_open() {
            return Received::Closed;
        }
        match self.rx.recv() {
            Ok(message) => self.deliver(message),
            Err(channel::RecvError) => Received::Closed,
        }
    }

    /// Waits up to `timeout` for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Received<M> {
        if !self.is_open() {
            return Received::Closed;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(message) => self.deliver(message),
            Err(channel::RecvTimeoutError::Timeout) => Received::Timeout,
            Err(channel::RecvTimeoutError::Disconnected) => Received::Closed,
        }
    }

    /// Returns a queued message without blocking.
    pub fn try_recv(&self) -> Received<M> {
        if !self.is_open() {
            return Received::Closed;
        }
        match self.rx.try_recv() {
            Ok(message) => self.deliver(message),
            Err(channel::TryRecvError::Empty) => Received::Timeout,
            Err(channel::TryRecvError::Disconnected) => Received::Closed,
        }
    }

    fn deliver(&self, message: M) -> Received<M> {
        // The token may have flipped while the message was in flight.
        if self.is_open() {
            Received::Message(message)
        } else {
            Received::Closed
        }
    }
}

impl<M> Drop for Mailbox<M> {
    fn drop(&mut self) {
        self.close();
    }
}
