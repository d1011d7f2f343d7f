// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-thread context, created on demand through a registry owned by the
//! process entry point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

/// Which side of the proxy a thread runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThreadRole {
    /// Builds content and commits it.
    Main,
    /// Owns the scheduler and draws.
    Impl,
}

/// State attached to one registered thread.
#[derive(Debug)]
pub struct ThreadContext {
    role: ThreadRole,
    thread: ThreadId,
    blocked: AtomicBool,
}

impl ThreadContext {
    /// The thread's role.
    #[must_use]
    pub const fn role(&self) -> ThreadRole {
        self.role
    }

    /// The registered thread.
    #[must_use]
    pub const fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// Returns `true` while the thread waits on a completion event.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Marks the thread blocked until the guard is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called from another thread, or if already blocked.
    #[must_use = "the thread is unblocked when the guard drops"]
    pub fn block(&self) -> BlockedGuard<'_> {
        assert_eq!(
            thread::current().id(),
            self.thread,
            "a thread can only block itself"
        );
        let was_blocked = self.blocked.swap(true, Ordering::AcqRel);
        assert!(!was_blocked, "thread blocked twice");
        BlockedGuard { context: self }
    }
}

/// Clears the blocked flag on drop.
#[derive(Debug)]
pub struct BlockedGuard<'a> {
    context: &'a ThreadContext,
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.context.blocked.store(false, Ordering::Release);
    }
}

/// Maps threads to their [`ThreadContext`].
///
/// Create one at the process root and pass it down; contexts are created
/// lazily the first time a thread asks for one.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    contexts: Mutex<HashMap<ThreadId, Arc<ThreadContext>>>,
}

impl ThreadRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the calling thread's context, creating it with `role`.
    ///
    /// # Panics
    ///
    /// Panics if the thread was registered with a different role.
    pub fn current(&self, role: ThreadRole) -> Arc<ThreadContext> {
        let id = thread::current().id();
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        let context = contexts.entry(id).or_insert_with(|| {
            tracing::trace!(?role, thread = ?id, "registered thread context");
            Arc::new(ThreadContext {
                role,
                thread: id,
                blocked: AtomicBool::new(false),
            })
        });
        assert_eq!(context.role, role, "thread registered with another role");
        Arc::clone(context)
    }

    /// The first registered context with `role`, if any.
    #[must_use]
    pub fn find(&self, role: ThreadRole) -> Option<Arc<ThreadContext>> {
        let contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        contexts.values().find(|c| c.role == role).cloned()
    }

    /// Returns `true` if a thread with `role` is registered and blocked.
    #[must_use]
    pub fn is_blocked(&self, role: ThreadRole) -> bool {
        self.find(role).is_some_and(|c| c.is_blocked())
    }

    /// Forgets the calling thread.
    pub fn unregister_current(&self) {
        let id = thread::current().id();
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Number of registered threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no thread is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
