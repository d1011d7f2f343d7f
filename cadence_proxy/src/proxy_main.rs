// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The main-thread actor.

use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use cadence_core::begin_frame::BeginFrameArgs;
use cadence_core::settings::SchedulerSettings;
use cadence_core::time::Duration;
use kurbo::Size;

use crate::completion::completion;
use crate::context::{ThreadContext, ThreadRegistry, ThreadRole};
use crate::error::ProxyError;
use crate::host::{LayerTreeHost, LayerTreeHostImpl};
use crate::mailbox::{Mailbox, MailboxSender, Received, mailbox};
use crate::message::{ImplMessage, MainMessage};
use crate::proxy_impl::run_impl_thread;

/// Longest wait in [`ProxyMain::pump_until`] before `done` is re-checked.
const PUMP_POLL: std::time::Duration = std::time::Duration::from_millis(5);

/// Proxy configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProxyConfig {
    /// Scheduler policy for the impl thread.
    pub scheduler: SchedulerSettings,
    /// Begin-frame interval of the synthetic source.
    pub refresh_interval: Duration,
    /// Capacity of each direction's mailbox.
    pub mailbox_capacity: usize,
}

impl ProxyConfig {
    /// 60 Hz with default scheduler settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            scheduler: SchedulerSettings::new(),
            refresh_interval: Duration::from_micros(16_667),
            mailbox_capacity: 64,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a [`LayerTreeHost`] on the calling thread and owns the impl
/// thread its scheduler runs on.
///
/// The proxy is not a decision-maker: it forwards main-thread requests to
/// the impl thread and runs main-thread work when the impl-side scheduler
/// asks for it. Main-thread work only happens inside [`pump`](Self::pump)
/// and [`pump_until`](Self::pump_until), on the thread that started the
/// proxy.
pub struct ProxyMain<H: LayerTreeHost> {
    host: H,
    registry: Arc<ThreadRegistry>,
    context: Arc<ThreadContext>,
    mailbox: Mailbox<MainMessage>,
    to_impl: MailboxSender<ImplMessage<H::Commit, H::FrameSink>>,
    thread: Option<thread::JoinHandle<()>>,
    /// Pinned to the thread registered as main.
    _not_send: PhantomData<Rc<()>>,
}

impl<H: LayerTreeHost> std::fmt::Debug for ProxyMain<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyMain")
            .field("context", &self.context)
            .field("mailbox", &self.mailbox)
            .field("to_impl", &self.to_impl)
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}

impl<H: LayerTreeHost> ProxyMain<H> {
    /// Registers the calling thread as the main thread and spawns the impl
    /// thread running `host_impl`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ImplThreadSpawn`] if the thread cannot start.
    pub fn start<I>(
        registry: Arc<ThreadRegistry>,
        config: ProxyConfig,
        host: H,
        host_impl: I,
    ) -> Result<Self, ProxyError>
    where
        I: LayerTreeHostImpl<Commit = H::Commit, FrameSink = H::FrameSink>,
    {
        let context = registry.current(ThreadRole::Main);
        let (to_main, main_mailbox) = mailbox(config.mailbox_capacity);
        let (to_impl, impl_mailbox) = mailbox(config.mailbox_capacity);

        let thread_registry = Arc::clone(&registry);
        let thread = thread::Builder::new()
            .name("cadence-impl".into())
            .spawn(move || {
                run_impl_thread(host_impl, config, impl_mailbox, to_main, thread_registry);
            })
            .map_err(ProxyError::ImplThreadSpawn)?;
        tracing::debug!("proxy started");

        Ok(Self {
            host,
            registry,
            context,
            mailbox: main_mailbox,
            to_impl,
            thread: Some(thread),
            _not_send: PhantomData,
        })
    }

    /// The main-thread host.
    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The main-thread host, mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// The registry this proxy's threads are registered in.
    #[must_use]
    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    fn send(&self, message: ImplMessage<H::Commit, H::FrameSink>) -> Result<(), ProxyError> {
        if self.to_impl.send(message) {
            Ok(())
        } else {
            Err(ProxyError::ImplThreadGone)
        }
    }

    /// Shows or hides the output.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ImplThreadGone`] if the impl thread has exited.
    pub fn set_visible(&self, visible: bool) -> Result<(), ProxyError> {
        self.send(ImplMessage::SetVisible(visible))
    }

    /// Resizes the viewport. An empty viewport disables drawing.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ImplThreadGone`] if the impl thread has exited.
    pub fn set_viewport_size(&self, size: Size) -> Result<(), ProxyError> {
        self.send(ImplMessage::SetViewportSize(size))
    }

    /// Requests a main frame and commit.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ImplThreadGone`] if the impl thread has exited.
    pub fn set_needs_commit(&self) -> Result<(), ProxyError> {
        self.send(ImplMessage::SetNeedsCommit)
    }

    /// Requests a redraw of the current content.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ImplThreadGone`] if the impl thread has exited.
    pub fn set_needs_redraw(&self) -> Result<(), ProxyError> {
        self.send(ImplMessage::SetNeedsRedraw)
    }

    /// Holds back main frames until cleared.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ImplThreadGone`] if the impl thread has exited.
    pub fn set_defer_commits(&self, defer: bool) -> Result<(), ProxyError> {
        self.send(ImplMessage::SetDeferCommits(defer))
    }

    /// Handles every queued message without blocking.
    ///
    /// Returns the number handled.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::Scheduler`] when the impl side gave up.
    /// - [`ProxyError::ImplThreadGone`] when the impl thread has exited.
    pub fn pump(&mut self) -> Result<usize, ProxyError> {
        let mut handled = 0;
        loop {
            match self.mailbox.try_recv() {
                Received::Message(message) => {
                    self.handle(message)?;
                    handled += 1;
                }
                Received::Timeout => return Ok(handled),
                Received::Closed => return Err(ProxyError::ImplThreadGone),
            }
        }
    }

    /// Handles messages until `done` holds or `timeout` passes.
    ///
    /// `done` is re-checked after every message and at least every few
    /// milliseconds. Returns whether it was satisfied.
    ///
    /// # Errors
    ///
    /// As [`pump`](Self::pump).
    pub fn pump_until(
        &mut self,
        timeout: std::time::Duration,
        mut done: impl FnMut(&H) -> bool,
    ) -> Result<bool, ProxyError> {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.host) {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            match self.mailbox.recv_timeout(remaining.min(PUMP_POLL)) {
                Received::Message(message) => self.handle(message)?,
                Received::Timeout => {}
                Received::Closed => return Err(ProxyError::ImplThreadGone),
            }
        }
    }

    fn handle(&mut self, message: MainMessage) -> Result<(), ProxyError> {
        match message {
            MainMessage::BeginMainFrame(args) => self.begin_main_frame(&args),
            MainMessage::RequestFrameSink(kind) => {
                let sink = self.host.create_frame_sink(kind);
                if sink.is_none() {
                    tracing::warn!(?kind, "frame sink creation failed");
                }
                self.send(ImplMessage::FrameSink(sink))
            }
            MainMessage::DidLoseFrameSink => {
                self.host.did_lose_frame_sink();
                Ok(())
            }
            MainMessage::Fatal(err) => {
                tracing::error!(%err, "impl thread reported a fatal error");
                Err(err.into())
            }
        }
    }

    fn begin_main_frame(&mut self, args: &BeginFrameArgs) -> Result<(), ProxyError> {
        self.send(ImplMessage::BeginMainFrameStarted)?;
        let content = match self.host.begin_main_frame(args) {
            Ok(content) => content,
            Err(reason) => {
                tracing::trace!(?reason, "main frame finished early");
                return self.send(ImplMessage::BeginMainFrameAborted(reason));
            }
        };

        let (signal, event) = completion();
        let committed = {
            let _blocked = self.context.block();
            self.send(ImplMessage::ReadyToCommit {
                content,
                done: signal,
            })?;
            event.wait()
        };
        if committed {
            self.host.did_commit();
            Ok(())
        } else {
            Err(self.pending_fatal().unwrap_or(ProxyError::ImplThreadGone))
        }
    }

    /// A fatal error already queued by the impl thread, if any.
    fn pending_fatal(&self) -> Option<ProxyError> {
        while let Received::Message(message) = self.mailbox.try_recv() {
            if let MainMessage::Fatal(err) = message {
                return Some(err.into());
            }
        }
        None
    }

    /// Stops the impl thread and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ImplThreadGone`] if the impl thread had already
    /// exited or panicked.
    pub fn stop(mut self) -> Result<(), ProxyError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), ProxyError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // Anything the impl thread still sends is dropped from here on.
        self.mailbox.close();

        let (signal, event) = completion();
        let stopped = {
            let _blocked = self.context.block();
            self.to_impl.send(ImplMessage::Stop(signal)) && event.wait()
        };
        let joined = thread.join().is_ok();
        tracing::debug!(stopped, joined, "proxy stopped");
        if stopped && joined {
            Ok(())
        } else {
            Err(ProxyError::ImplThreadGone)
        }
    }
}

impl<H: LayerTreeHost> Drop for ProxyMain<H> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(%err, "proxy dropped after the impl thread failed");
        }
    }
}
