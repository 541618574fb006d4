// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor runner
//!
//! Drives an event-based actor: one behavior invocation per mailbox
//! message, then yield. A receive attempt walks the cache front to back,
//! then drains the inbox; skipped messages move to the cache in arrival
//! order and a handled message triggers a rescan from the cache front,
//! since a behavior change may make previously skipped messages eligible.
//!
//! Handler panics never unwind into the scheduler: they are caught and
//! converted into an exit with reason `unhandled-exception`.

use crate::behavior::{Behavior, BehaviorStack, HandlerOutcome};
use crate::cell::{AbstractActor, ActorCell, ActorStatus};
use crate::context::{ActorContext, ContextOp};
use crate::envelope::{Content, Envelope};
use crate::error::{Error, ErrorKind, ExitReason};
use tokio_util::sync::CancellationToken;

use tracing::{debug, warn};

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Result of offering one envelope to the dispatch machinery.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Disp {
    /// Consumed (handler, timeout action or continuation ran).
    Handled,
    /// Discarded.
    Dropped,
    /// No handler accepted it; it belongs in the cache.
    Skipped,
    /// The actor transitioned to exited.
    Exited,
}

/// Offers one envelope to `behavior`, handling system content first.
///
/// Shared by the event-based runner and the blocking receive loop. Any
/// deferred context ops the handler recorded are left in `ctx` for the
/// caller to apply.
pub(crate) fn dispatch_envelope(
    cell: &Arc<ActorCell>,
    ctx: &mut ActorContext,
    behavior: &mut Behavior,
    armed_timeout: &mut Option<u64>,
    envelope: &Arc<Envelope>,
) -> Disp {
    match &envelope.content {
        Content::Timeout { id } => {
            if *armed_timeout == Some(*id) {
                *armed_timeout = None;
                ctx.set_current(None);
                let result = catch_unwind(AssertUnwindSafe(|| behavior.run_timeout(ctx)));
                if result.is_err() {
                    warn!("Timeout action of actor {} panicked.", cell.address());
                    cell.begin_exit(ExitReason::UnhandledException);
                    return Disp::Exited;
                }
                return Disp::Handled;
            }
            // Stale timer: an older arming fired after a message won.
            return Disp::Dropped;
        }
        Content::Exit { from, reason } => {
            cell.remove_link(*from);
            if *reason == ExitReason::Kill {
                cell.begin_exit(ExitReason::Kill);
                return Disp::Exited;
            }
            if !cell.trap_exit() {
                if *reason == ExitReason::Normal {
                    return Disp::Dropped;
                }
                cell.begin_exit(*reason);
                return Disp::Exited;
            }
            // Trapped: fall through to ordinary matching.
        }
        _ => {}
    }

    if envelope.mid.is_response() {
        // A response that reached the mailbox belongs to a continuation.
        let Some(continuation) = cell.take_continuation(envelope.mid.request_part()) else {
            debug!("Dropping late response at actor {}.", cell.address());
            return Disp::Dropped;
        };
        let result = match &envelope.content {
            Content::User(payload) => Ok(payload.clone()),
            Content::Error { kind } => Err(Error::from(*kind)),
            _ => Err(Error::Send("unexpected response content".to_owned())),
        };
        ctx.set_current(Some(envelope.clone()));
        let outcome = catch_unwind(AssertUnwindSafe(|| continuation(ctx, result)));
        ctx.set_current(None);
        if outcome.is_err() {
            warn!("Response continuation of actor {} panicked.", cell.address());
            cell.begin_exit(ExitReason::UnhandledException);
            return Disp::Exited;
        }
        return Disp::Handled;
    }

    ctx.set_current(Some(envelope.clone()));
    let outcome = catch_unwind(AssertUnwindSafe(|| behavior.try_handle(ctx, envelope)));
    ctx.set_current(None);
    match outcome {
        Ok(HandlerOutcome::Handled) => {
            *armed_timeout = None;
            Disp::Handled
        }
        Ok(HandlerOutcome::Dropped) => Disp::Dropped,
        Ok(HandlerOutcome::Skipped) => Disp::Skipped,
        Err(_) => {
            warn!("Handler of actor {} panicked.", cell.address());
            cell.begin_exit(ExitReason::UnhandledException);
            Disp::Exited
        }
    }
}

enum ScanOutcome {
    Handled,
    Empty,
    Exited,
}

/// Bounces requests that were in flight when the actor exited, so their
/// requesters observe receiver-down instead of a timeout.
pub(crate) fn bounce_requests(
    cell: &Arc<ActorCell>,
    leftovers: impl IntoIterator<Item = Arc<Envelope>>,
) {
    for envelope in leftovers {
        if let Some(bounce) = Envelope::error_response(&envelope, ErrorKind::ReceiverDown) {
            cell.system().deliver(bounce);
        }
    }
}

/// The event-based actor runner.
pub(crate) struct ActorRunner {
    cell: Arc<ActorCell>,
    ctx: ActorContext,
    stack: BehaviorStack,
    token: CancellationToken,
    armed_timeout: Option<u64>,
    next_timeout_id: u64,
}

impl ActorRunner {
    pub(crate) fn new(cell: Arc<ActorCell>, token: CancellationToken) -> ActorRunner {
        let ctx = ActorContext::new(cell.clone());
        ActorRunner {
            cell,
            ctx,
            stack: BehaviorStack::default(),
            token,
            armed_timeout: None,
            next_timeout_id: 0,
        }
    }

    /// Runs the actor until it exits.
    pub(crate) async fn run<F>(mut self, init: F)
    where
        F: FnOnce(&mut ActorContext) -> Behavior + Send + 'static,
    {
        self.cell.set_status(ActorStatus::Ready);
        debug!("Running actor {}.", self.cell.address());

        match catch_unwind(AssertUnwindSafe(|| init(&mut self.ctx))) {
            Ok(behavior) => self.stack.push(behavior),
            Err(_) => {
                warn!("Init of actor {} panicked.", self.cell.address());
                self.cell.begin_exit(ExitReason::UnhandledException);
                return;
            }
        }
        if !self.apply_ops() {
            return;
        }

        loop {
            self.cell.set_status(ActorStatus::Running);
            match self.scan() {
                ScanOutcome::Handled => {
                    // Cooperative quantum boundary: one message, then yield.
                    tokio::task::yield_now().await;
                }
                ScanOutcome::Exited => return,
                ScanOutcome::Empty => {
                    self.arm_timeout();
                    self.cell.set_status(if self.cell.has_pending() {
                        ActorStatus::AwaitingResponse
                    } else {
                        ActorStatus::AwaitingMessage
                    });
                    tokio::select! {
                        _ = self.cell.mailbox().readable() => {}
                        _ = self.token.cancelled() => {
                            debug!("Actor {} stopped by system shutdown.", self.cell.address());
                            self.cell.begin_exit(ExitReason::Normal);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One receive attempt: cache front to back, then the inbox.
    fn scan(&mut self) -> ScanOutcome {
        let mut cached = self.cell.mailbox().take_cache();
        let mut remaining = VecDeque::new();
        while let Some(envelope) = cached.pop_front() {
            match self.dispatch(&envelope) {
                Disp::Handled => {
                    remaining.append(&mut cached);
                    if self.apply_ops() {
                        self.cell.mailbox().restore_cache(remaining);
                        return ScanOutcome::Handled;
                    }
                    bounce_requests(&self.cell, remaining);
                    return ScanOutcome::Exited;
                }
                Disp::Dropped => {}
                Disp::Skipped => remaining.push_back(envelope),
                Disp::Exited => {
                    remaining.push_back(envelope);
                    remaining.append(&mut cached);
                    bounce_requests(&self.cell, remaining);
                    return ScanOutcome::Exited;
                }
            }
        }
        self.cell.mailbox().restore_cache(remaining);

        while let Some(envelope) = self.cell.mailbox().dequeue() {
            match self.dispatch(&envelope) {
                Disp::Handled => {
                    return if self.apply_ops() {
                        ScanOutcome::Handled
                    } else {
                        ScanOutcome::Exited
                    };
                }
                Disp::Dropped => {}
                Disp::Skipped => self.cell.mailbox().cache_push(envelope),
                Disp::Exited => {
                    bounce_requests(&self.cell, [envelope]);
                    return ScanOutcome::Exited;
                }
            }
        }
        ScanOutcome::Empty
    }

    fn dispatch(&mut self, envelope: &Arc<Envelope>) -> Disp {
        let Some(top) = self.stack.top_mut() else {
            self.cell.begin_exit(ExitReason::Normal);
            return Disp::Exited;
        };
        dispatch_envelope(&self.cell, &mut self.ctx, top, &mut self.armed_timeout, envelope)
    }

    /// Applies deferred context ops. Returns `false` once the actor exited.
    fn apply_ops(&mut self) -> bool {
        for op in self.ctx.take_ops() {
            match op {
                ContextOp::Become(behavior) => {
                    self.stack.pop();
                    self.stack.push(behavior);
                }
                ContextOp::BecomeStacked(behavior) => self.stack.push(behavior),
                ContextOp::Unbecome => {
                    self.stack.pop();
                }
                ContextOp::Quit(reason) => {
                    self.cell.begin_exit(reason);
                    return false;
                }
            }
        }
        if self.stack.is_empty() {
            // Popping the last frame ends the actor normally.
            self.cell.begin_exit(ExitReason::Normal);
            return false;
        }
        true
    }

    /// Arms the active behavior's timeout before parking. Each arming
    /// bumps the timeout id so stale timer messages are ignored.
    fn arm_timeout(&mut self) {
        if self.armed_timeout.is_some() {
            return;
        }
        let Some(duration) = self.stack.top_mut().and_then(|b| b.timeout_duration()) else {
            return;
        };
        self.next_timeout_id += 1;
        let id = self.next_timeout_id;
        self.armed_timeout = Some(id);
        let envelope = Envelope::system(self.cell.address(), Content::Timeout { id });
        self.cell.system().timer().schedule(duration, envelope);
    }
}
