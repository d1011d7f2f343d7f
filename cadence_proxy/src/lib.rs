// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Main/impl thread split for the `cadence_core` scheduler.
//!
//! A [`ProxyMain`] lives on the thread that builds content and owns the impl
//! thread, where the [`Scheduler`](cadence_core::scheduler::Scheduler) runs.
//! The two sides talk only through bounded [`Mailbox`]es:
//!
//! ```text
//!   main thread                           impl thread
//!   LayerTreeHost ◄── BeginMainFrame ──── Scheduler + LayerTreeHostImpl
//!        │                                     ▲
//!        └──── ReadyToCommit (blocks) ─────────┘
//! ```
//!
//! The main thread blocks on a [`CompletionEvent`] only while its commit is
//! copied and while the impl thread shuts down. Each thread registers a
//! [`ThreadContext`] in a [`ThreadRegistry`] created by the process entry
//! point, which the impl side uses to check that the main thread is blocked
//! whenever it touches committed content.

mod completion;
mod context;
mod error;
mod host;
mod mailbox;
mod message;
mod proxy_impl;
mod proxy_main;
mod time;

pub use completion::{CompletionEvent, CompletionSignal, completion};
pub use context::{BlockedGuard, ThreadContext, ThreadRegistry, ThreadRole};
pub use error::ProxyError;
pub use host::{LayerTreeHost, LayerTreeHostImpl};
pub use mailbox::{Mailbox, MailboxSender, Received, mailbox};
pub use proxy_main::{ProxyConfig, ProxyMain};
pub use time::{MonotonicClock, duration_until, now};
