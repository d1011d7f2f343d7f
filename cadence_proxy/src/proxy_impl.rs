// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The impl-thread actor: owns the scheduler and the impl-side host.
//!
//! Client callbacks cannot call back into the scheduler that owns them, so
//! readiness notifications raised while performing an action are queued as
//! [`ImplEvent`]s and applied once the scheduler call returns.

use std::collections::VecDeque;
use std::sync::Arc;

use cadence_core::begin_frame::BeginFrameArgs;
use cadence_core::client::{
    CommitCoordinator, DrawExecutor, DrawResult, FrameObserver, FrameSinkKind, FrameSinkLifecycle,
};
use cadence_core::scheduler::Scheduler;
use cadence_core::source::{BackToBackBeginFrameSource, BeginFrameSource, SyntheticBeginFrameSource};
use cadence_core::time::Clock;
use kurbo::Size;

use crate::completion::CompletionSignal;
use crate::context::{ThreadRegistry, ThreadRole};
use crate::host::LayerTreeHostImpl;
use crate::mailbox::{Mailbox, MailboxSender, Received};
use crate::message::{ImplMessage, MainMessage};
use crate::proxy_main::ProxyConfig;
use crate::time::{MonotonicClock, duration_until};

/// Notifications raised inside a scheduler callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ImplEvent {
    ReadyToActivate,
    ReadyToDraw,
    FrameAck,
    TilesPrepared,
    NeedsRedraw,
    FrameSinkLost,
}

/// The scheduler's client on the impl thread.
struct ImplClient<I: LayerTreeHostImpl> {
    host_impl: I,
    to_main: MailboxSender<MainMessage>,
    registry: Arc<ThreadRegistry>,
    pending_commit: Option<(I::Commit, CompletionSignal)>,
    events: VecDeque<ImplEvent>,
}

impl<I: LayerTreeHostImpl> ImplClient<I> {
    fn after_draw(&mut self, result: DrawResult) -> DrawResult {
        match result {
            DrawResult::Success => self.events.push_back(ImplEvent::FrameAck),
            DrawResult::AbortedContextLost => self.events.push_back(ImplEvent::FrameSinkLost),
            _ => {}
        }
        result
    }
}

impl<I: LayerTreeHostImpl> FrameSinkLifecycle for ImplClient<I> {
    fn begin_frame_sink_creation(&mut self, kind: FrameSinkKind) {
        tracing::debug!(?kind, "requesting frame sink");
        self.to_main.send(MainMessage::RequestFrameSink(kind));
    }
}

impl<I: LayerTreeHostImpl> DrawExecutor for ImplClient<I> {
    fn draw_if_possible(&mut self) -> DrawResult {
        let result = self.host_impl.draw(false);
        self.after_draw(result)
    }

    fn draw_forced(&mut self) -> DrawResult {
        let result = self.host_impl.draw(true);
        self.after_draw(result)
    }

    fn prepare_tiles(&mut self) {
        self.host_impl.prepare_tiles();
        self.events.push_back(ImplEvent::TilesPrepared);
    }
}

impl<I: LayerTreeHostImpl> CommitCoordinator for ImplClient<I> {
    fn send_begin_main_frame(&mut self, args: &BeginFrameArgs) {
        self.to_main.send(MainMessage::BeginMainFrame(*args));
    }

    fn commit(&mut self) {
        let Some((content, done)) = self.pending_commit.take() else {
            tracing::warn!("commit scheduled without committed content");
            return;
        };
        debug_assert!(
            self.registry.is_blocked(ThreadRole::Main),
            "main thread must be blocked during commit"
        );
        self.host_impl.commit(content);
        done.signal();
        self.events.push_back(ImplEvent::ReadyToActivate);
    }

    fn activate_sync_tree(&mut self) {
        self.host_impl.activate();
        self.events.push_back(ImplEvent::ReadyToDraw);
    }
}

impl<I: LayerTreeHostImpl> FrameObserver for ImplClient<I> {
    fn will_begin_impl_frame(&mut self, args: &BeginFrameArgs) {
        if self.host_impl.animate(args) {
            self.events.push_back(ImplEvent::NeedsRedraw);
        }
    }
}

type ImplScheduler<I> = Scheduler<ImplClient<I>, Box<dyn BeginFrameSource>>;

struct ProxyImpl<I: LayerTreeHostImpl> {
    scheduler: ImplScheduler<I>,
    clock: MonotonicClock,
}

/// Whether a viewport has anything to draw into.
fn is_drawable(size: Size) -> bool {
    size.is_finite() && size.width > 0.0 && size.height > 0.0
}

impl<I: LayerTreeHostImpl> ProxyImpl<I> {
    fn new(
        host_impl: I,
        config: &ProxyConfig,
        to_main: MailboxSender<MainMessage>,
        registry: Arc<ThreadRegistry>,
    ) -> Self {
        let clock = MonotonicClock;
        let settings = config.scheduler;
        let source: Box<dyn BeginFrameSource> = if settings.throttle_frame_production {
            Box::new(SyntheticBeginFrameSource::new(
                clock.now(),
                config.refresh_interval,
                settings.parent_draw_divisor,
            ))
        } else {
            Box::new(BackToBackBeginFrameSource::new(config.refresh_interval))
        };
        let client = ImplClient {
            host_impl,
            to_main,
            registry,
            pending_commit: None,
            events: VecDeque::new(),
        };
        Self {
            scheduler: Scheduler::new(settings, client, source, Box::new(clock)),
            clock,
        }
    }

    /// Applies queued callback notifications until none are left.
    fn flush_events(&mut self) {
        while let Some(event) = self.scheduler.client_mut().events.pop_front() {
            match event {
                ImplEvent::ReadyToActivate => self.scheduler.notify_ready_to_activate(),
                ImplEvent::ReadyToDraw => self.scheduler.notify_ready_to_draw(),
                ImplEvent::FrameAck => self.scheduler.did_receive_compositor_frame_ack(),
                ImplEvent::TilesPrepared => self.scheduler.did_prepare_tiles(),
                ImplEvent::NeedsRedraw => self.scheduler.set_needs_redraw(),
                ImplEvent::FrameSinkLost => {
                    tracing::warn!("frame sink lost");
                    self.scheduler.did_lose_frame_sink();
                    self.scheduler
                        .client()
                        .to_main
                        .send(MainMessage::DidLoseFrameSink);
                }
            }
        }
    }

    /// Handles one message. Returns `false` once the actor should exit.
    fn handle(&mut self, message: ImplMessage<I::Commit, I::FrameSink>) -> bool {
        match message {
            ImplMessage::SetVisible(visible) => self.scheduler.set_visible(visible),
            ImplMessage::SetViewportSize(size) => {
                self.scheduler.client_mut().host_impl.set_viewport_size(size);
                self.scheduler.set_can_draw(is_drawable(size));
            }
            ImplMessage::SetNeedsCommit => self.scheduler.set_needs_begin_main_frame(),
            ImplMessage::SetNeedsRedraw => self.scheduler.set_needs_redraw(),
            ImplMessage::SetDeferCommits(defer) => self.scheduler.set_defer_commits(defer),
            ImplMessage::BeginMainFrameStarted => self.scheduler.notify_begin_main_frame_started(),
            ImplMessage::BeginMainFrameAborted(reason) => {
                self.scheduler.begin_main_frame_aborted(reason);
            }
            ImplMessage::ReadyToCommit { content, done } => {
                if self.scheduler.is_stopped() {
                    // Dropping `done` releases the main thread.
                    tracing::debug!("commit dropped by a stopped scheduler");
                    return true;
                }
                self.scheduler.client_mut().pending_commit = Some((content, done));
                self.scheduler.notify_ready_to_commit();
            }
            ImplMessage::FrameSink(sink) => {
                let initialized = match sink {
                    Some(sink) => self.scheduler.client_mut().host_impl.initialize_frame_sink(sink),
                    None => false,
                };
                if initialized {
                    tracing::debug!(kind = ?self.scheduler.frame_sink_kind(), "frame sink ready");
                    self.scheduler.did_create_and_initialize_frame_sink();
                } else if let Err(err) = self.scheduler.did_fail_to_initialize_frame_sink() {
                    tracing::error!(%err, "giving up on frame sink creation");
                    self.scheduler.client().to_main.send(MainMessage::Fatal(err));
                }
            }
            ImplMessage::Stop(done) => {
                self.scheduler.stop();
                self.scheduler.client_mut().pending_commit = None;
                done.signal();
                return false;
            }
        }
        true
    }
}

/// Impl thread entry. Returns once a stop message arrives or the main
/// thread goes away.
#[tracing::instrument(skip_all, name = "cadence_impl")]
pub(crate) fn run_impl_thread<I: LayerTreeHostImpl>(
    host_impl: I,
    config: ProxyConfig,
    mailbox: Mailbox<ImplMessage<I::Commit, I::FrameSink>>,
    to_main: MailboxSender<MainMessage>,
    registry: Arc<ThreadRegistry>,
) {
    let _context = registry.current(ThreadRole::Impl);
    let mut proxy = ProxyImpl::new(host_impl, &config, to_main, Arc::clone(&registry));
    tracing::debug!("impl thread started");

    loop {
        let received = match proxy.scheduler.next_wakeup() {
            Some(at) => mailbox.recv_timeout(duration_until(proxy.clock.now(), at)),
            None => mailbox.recv(),
        };
        match received {
            Received::Message(message) => {
                let keep_running = proxy.handle(message);
                proxy.flush_events();
                if !keep_running {
                    break;
                }
            }
            Received::Timeout => {}
            Received::Closed => {
                tracing::debug!("main thread went away");
                proxy.scheduler.stop();
                break;
            }
        }
        proxy.scheduler.run_pending();
        proxy.flush_events();
    }

    registry.unregister_current();
    tracing::debug!("impl thread stopped");
}
