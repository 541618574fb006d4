// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Blocking actors
//!
//! A blocking actor runs on a dedicated carrier thread and may park inside
//! selective-receive waits, using condition-variable parking on its
//! mailbox. It shares the cache/skip semantics of the event-based runner;
//! only the waiting primitive differs.

use crate::behavior::Behavior;
use crate::cell::{AbstractActor, ActorCell, ActorStatus};
use crate::context::{ActorContext, ContextOp};
use crate::envelope::Envelope;
use crate::error::{Error, ExitReason};
use crate::payload::{IntoPayload, Payload};
use crate::runner::{bounce_requests, dispatch_envelope, Disp};
use crate::address::Address;

use tracing::{debug, warn};

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Context of a blocking actor; derefs to [`ActorContext`] for the common
/// operations and adds the parking receive calls.
pub struct BlockingContext {
    ctx: ActorContext,
    armed_timeout: Option<u64>,
    runtime: tokio::runtime::Handle,
}

impl Deref for BlockingContext {
    type Target = ActorContext;

    fn deref(&self) -> &ActorContext {
        &self.ctx
    }
}

impl DerefMut for BlockingContext {
    fn deref_mut(&mut self) -> &mut ActorContext {
        &mut self.ctx
    }
}

impl BlockingContext {
    pub(crate) fn new(cell: Arc<ActorCell>, runtime: tokio::runtime::Handle) -> BlockingContext {
        BlockingContext { ctx: ActorContext::new(cell), armed_timeout: None, runtime }
    }

    /// One selective receive against `behavior`.
    ///
    /// Parks the carrier thread until a message is handled, the behavior's
    /// timeout fires (the timeout action runs, then `Ok`), or the actor
    /// exits (`Err(Error::Exited)`; propagate it out of the actor body).
    pub fn receive(&mut self, behavior: &mut Behavior) -> Result<(), Error> {
        let deadline = behavior.timeout_duration().map(|d| Instant::now() + d);
        let cell = self.ctx.cell().clone();
        loop {
            cell.set_status(ActorStatus::Running);

            // Cache first, in arrival order.
            let mut cached = cell.mailbox().take_cache();
            let mut remaining = VecDeque::new();
            while let Some(envelope) = cached.pop_front() {
                match self.offer(&cell, behavior, &envelope) {
                    Disp::Handled => {
                        remaining.append(&mut cached);
                        cell.mailbox().restore_cache(remaining);
                        return self.apply_ops(&cell);
                    }
                    Disp::Dropped => {}
                    Disp::Skipped => remaining.push_back(envelope),
                    Disp::Exited => {
                        remaining.push_back(envelope);
                        remaining.append(&mut cached);
                        bounce_requests(&cell, remaining);
                        return Err(Error::Exited);
                    }
                }
            }
            cell.mailbox().restore_cache(remaining);

            while let Some(envelope) = cell.mailbox().dequeue() {
                match self.offer(&cell, behavior, &envelope) {
                    Disp::Handled => return self.apply_ops(&cell),
                    Disp::Dropped => {}
                    Disp::Skipped => cell.mailbox().cache_push(envelope),
                    Disp::Exited => {
                        bounce_requests(&cell, [envelope]);
                        return Err(Error::Exited);
                    }
                }
            }

            if cell.mailbox().is_closed() {
                return Err(Error::Exited);
            }
            cell.set_status(if cell.has_pending() {
                ActorStatus::AwaitingResponse
            } else {
                ActorStatus::AwaitingMessage
            });
            if !cell.mailbox().readable_sync(deadline) {
                // Deadline passed with no match.
                cell.set_status(ActorStatus::Running);
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| behavior.run_timeout(&mut self.ctx)));
                if outcome.is_err() {
                    warn!("Timeout action of actor {} panicked.", cell.address());
                    cell.begin_exit(ExitReason::UnhandledException);
                    return Err(Error::Exited);
                }
                return self.apply_ops(&cell);
            }
        }
    }

    /// Sends a request and parks until the response or the timeout.
    pub fn request_sync(
        &mut self,
        target: Address,
        payload: impl IntoPayload,
        timeout: Option<Duration>,
    ) -> Result<Payload, Error> {
        let handle = self.ctx.request(target, payload, timeout);
        self.runtime.block_on(handle.receive())
    }

    fn offer(
        &mut self,
        cell: &Arc<ActorCell>,
        behavior: &mut Behavior,
        envelope: &Arc<Envelope>,
    ) -> Disp {
        dispatch_envelope(cell, &mut self.ctx, behavior, &mut self.armed_timeout, envelope)
    }

    fn apply_ops(&mut self, cell: &Arc<ActorCell>) -> Result<(), Error> {
        for op in self.ctx.take_ops() {
            match op {
                ContextOp::Quit(reason) => {
                    cell.begin_exit(reason);
                    return Err(Error::Exited);
                }
                ContextOp::Become(_) | ContextOp::BecomeStacked(_) | ContextOp::Unbecome => {
                    // Blocking actors select behaviors per receive call.
                    warn!(
                        "Ignoring behavior change of blocking actor {}.",
                        cell.address()
                    );
                }
            }
        }
        Ok(())
    }
}

/// Body of a blocking actor.
pub type BlockingBody = Box<dyn FnOnce(&mut BlockingContext) -> Result<(), Error> + Send>;

/// Runs a blocking actor body on the current (carrier) thread.
pub(crate) fn run_blocking(
    cell: Arc<ActorCell>,
    runtime: tokio::runtime::Handle,
    body: BlockingBody,
) {
    let addr = cell.address();
    debug!("Running blocking actor {}.", addr);
    let body_cell = cell.clone();
    let result = catch_unwind(AssertUnwindSafe(move || {
        let mut ctx = BlockingContext::new(body_cell, runtime);
        body(&mut ctx)
    }));
    match result {
        Ok(Ok(())) => {
            cell.begin_exit(ExitReason::Normal);
        }
        Ok(Err(error)) => {
            // `Exited` means the transition already happened (quit, kill
            // or external exit signal); anything else is a fault.
            if !matches!(error, Error::Exited) {
                debug!("Blocking actor {} failed: {}.", addr, error);
            }
            cell.begin_exit(ExitReason::UnhandledException);
        }
        Err(_) => {
            warn!("Blocking actor {} panicked.", addr);
            cell.begin_exit(ExitReason::UnhandledException);
        }
    }
}
