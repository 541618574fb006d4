// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor context and references
//!
//! [`ActorContext`] is handed to every handler invocation and exposes the
//! operations an actor performs on itself and its surroundings: sending,
//! replying, spawning, linking, monitoring, behavior changes and exit.
//! Behavior changes and `quit` are deferred: they take effect when the
//! current handler returns, so a handler always runs against a stable
//! behavior.
//!
//! [`ActorRef`] is the shareable handle to any actor variant, local or
//! proxy.

use crate::address::Address;
use crate::behavior::Behavior;
use crate::cell::{AbstractActor, ActorCell, ActorKind, ResponseContinuation, ResponseHandle};
use crate::envelope::{Content, Envelope, MessageId};
use crate::error::{Error, ErrorKind, ExitReason};
use crate::mailbox::EnqueueStatus;
use crate::payload::{IntoPayload, Payload};
use crate::system::ActorSystem;

use tracing::debug;

use std::sync::Arc;
use std::time::Duration;

/// Shareable handle to an actor.
pub struct ActorRef {
    inner: Arc<dyn AbstractActor>,
    system: ActorSystem,
}

impl ActorRef {
    pub(crate) fn new(inner: Arc<dyn AbstractActor>, system: ActorSystem) -> ActorRef {
        ActorRef { inner, system }
    }

    /// Wraps an actor implementation into a reference.
    ///
    /// Used by the distribution layer to hand out proxy references.
    pub fn from_abstract(inner: Arc<dyn AbstractActor>, system: ActorSystem) -> ActorRef {
        ActorRef { inner, system }
    }

    /// The actor's address.
    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// The actor variant behind this reference.
    pub fn kind(&self) -> ActorKind {
        self.inner.kind()
    }

    /// Current exit reason (`NotExited` while live).
    pub fn exit_reason(&self) -> ExitReason {
        self.inner.exit_reason()
    }

    /// True once the actor terminated.
    pub fn is_exited(&self) -> bool {
        !self.inner.exit_reason().is_not_exited()
    }

    /// Sends an anonymous asynchronous message.
    pub fn send(&self, payload: impl IntoPayload) -> Result<(), Error> {
        let envelope = Envelope::user(
            None,
            self.address(),
            MessageId::ASYNC,
            payload.into_payload(),
        );
        match self.system.deliver_direct(self.inner.as_ref(), envelope) {
            EnqueueStatus::Rejected => Err(Error::Send("receiver exited".to_owned())),
            _ => Ok(()),
        }
    }

    /// Sends a request and returns a handle for the response.
    ///
    /// Usable from outside any actor; a lightweight requester entity is
    /// registered for the duration of the exchange.
    pub fn request(
        &self,
        payload: impl IntoPayload,
        timeout: Option<Duration>,
    ) -> ResponseHandle {
        self.system.request(self.address(), payload, timeout)
    }

    /// Delivers an unconditional kill signal.
    pub fn kill(&self) {
        let addr = self.address();
        self.system.deliver_direct(
            self.inner.as_ref(),
            Envelope::system(addr, Content::Exit { from: addr, reason: ExitReason::Kill }),
        );
    }

    pub(crate) fn abstract_actor(&self) -> &Arc<dyn AbstractActor> {
        &self.inner
    }

    /// The owning system.
    pub fn system(&self) -> &ActorSystem {
        &self.system
    }
}

impl Clone for ActorRef {
    fn clone(&self) -> Self {
        ActorRef { inner: self.inner.clone(), system: self.system.clone() }
    }
}

impl std::fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef")
            .field("address", &self.inner.address())
            .field("kind", &self.inner.kind())
            .finish()
    }
}

pub(crate) enum ContextOp {
    Become(Behavior),
    BecomeStacked(Behavior),
    Unbecome,
    Quit(ExitReason),
}

/// Execution context of a running handler.
pub struct ActorContext {
    cell: Arc<ActorCell>,
    current: Option<Arc<Envelope>>,
    ops: Vec<ContextOp>,
}

impl ActorContext {
    pub(crate) fn new(cell: Arc<ActorCell>) -> ActorContext {
        ActorContext { cell, current: None, ops: Vec::new() }
    }

    pub(crate) fn cell(&self) -> &Arc<ActorCell> {
        &self.cell
    }

    pub(crate) fn set_current(&mut self, envelope: Option<Arc<Envelope>>) {
        self.current = envelope;
    }

    pub(crate) fn take_ops(&mut self) -> Vec<ContextOp> {
        std::mem::take(&mut self.ops)
    }

    /// Address of this actor.
    pub fn address(&self) -> Address {
        self.cell.address()
    }

    /// The owning actor system.
    pub fn system(&self) -> &ActorSystem {
        self.cell.system()
    }

    /// Sender of the message currently being handled.
    pub fn sender(&self) -> Option<Address> {
        self.current.as_ref().and_then(|envelope| envelope.sender)
    }

    /// Correlation id of the message currently being handled.
    pub fn current_message_id(&self) -> Option<MessageId> {
        self.current.as_ref().map(|envelope| envelope.mid)
    }

    /// Sends an asynchronous message to an address.
    pub fn send_to(&self, target: Address, payload: impl IntoPayload) -> Result<(), Error> {
        let envelope = Envelope::user(
            Some(self.address()),
            target,
            MessageId::ASYNC,
            payload.into_payload(),
        );
        match self.system().deliver(envelope) {
            EnqueueStatus::Rejected => Err(Error::Send("receiver exited".to_owned())),
            _ => Ok(()),
        }
    }

    /// Sends an asynchronous message through a reference.
    pub fn send(&self, target: &ActorRef, payload: impl IntoPayload) -> Result<(), Error> {
        let envelope = Envelope::user(
            Some(self.address()),
            target.address(),
            MessageId::ASYNC,
            payload.into_payload(),
        );
        match self.system().deliver_direct(target.abstract_actor().as_ref(), envelope) {
            EnqueueStatus::Rejected => Err(Error::Send("receiver exited".to_owned())),
            _ => Ok(()),
        }
    }

    /// Responds to the current message.
    ///
    /// For a request, the response carries the paired response id and is
    /// routed to the requester's pending table; for an ordinary message
    /// this is a plain send back to the sender.
    pub fn reply(&self, payload: impl IntoPayload) -> Result<(), Error> {
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| Error::Send("no message is being handled".to_owned()))?;
        let target = current
            .sender
            .ok_or_else(|| Error::Send("current message is anonymous".to_owned()))?;
        let mid = if current.mid.is_request() {
            current.mid.response_id()
        } else {
            MessageId::ASYNC
        };
        let envelope = Envelope::user(Some(self.address()), target, mid, payload.into_payload());
        match self.system().deliver(envelope) {
            EnqueueStatus::Rejected => Err(Error::Send("requester exited".to_owned())),
            _ => Ok(()),
        }
    }

    /// Sends a request; the returned handle can be awaited by blocking
    /// actors or external tasks.
    pub fn request(
        &self,
        target: Address,
        payload: impl IntoPayload,
        timeout: Option<Duration>,
    ) -> ResponseHandle {
        let id = self.cell.next_request_id();
        let rx = match self.cell.register_pending_channel(id) {
            Some(rx) => rx,
            None => {
                // Already exited: a handle that resolves to receiver-down.
                let (_tx, rx) = tokio::sync::oneshot::channel();
                return ResponseHandle {
                    cell: Arc::downgrade(&self.cell),
                    id,
                    rx,
                    timeout,
                    keepalive: None,
                };
            }
        };
        let envelope = Envelope::user(
            Some(self.address()),
            target,
            MessageId::request(id),
            payload.into_payload(),
        );
        self.system().deliver(envelope);
        ResponseHandle { cell: Arc::downgrade(&self.cell), id, rx, timeout, keepalive: None }
    }

    /// Sends a request and runs `then` in this actor's context when the
    /// response (or a synthesized error) arrives.
    ///
    /// This is the event-based form of awaiting a response: the actor
    /// keeps processing nothing until the continuation fires, but never
    /// blocks a worker.
    pub fn request_then<F>(
        &self,
        target: Address,
        payload: impl IntoPayload,
        timeout: Option<Duration>,
        then: F,
    ) where
        F: FnOnce(&mut ActorContext, Result<Payload, Error>) + Send + 'static,
    {
        let id = self.cell.next_request_id();
        let continuation: ResponseContinuation = Box::new(then);
        if !self.cell.register_pending_continuation(id, continuation) {
            return;
        }
        let envelope = Envelope::user(
            Some(self.address()),
            target,
            MessageId::request(id),
            payload.into_payload(),
        );
        self.system().deliver(envelope);
        if let Some(timeout) = timeout {
            let system = self.system().clone();
            let cell = Arc::downgrade(&self.cell);
            let requester = self.address();
            self.system().scheduler().spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(cell) = cell.upgrade() {
                    if cell.is_pending(id) {
                        let synthetic = Arc::new(Envelope {
                            sender: Some(target),
                            receiver: requester,
                            mid: MessageId::request(id).response_id(),
                            content: Content::Error { kind: ErrorKind::RequestTimeout },
                        });
                        system.deliver(synthetic);
                    }
                }
            });
        }
    }

    /// Establishes a bidirectional link with `peer`.
    pub fn link(&self, peer: &ActorRef) {
        let peer_addr = peer.address();
        if self.cell.add_link(peer_addr).is_err() {
            return;
        }
        if let Err(reason) = peer.abstract_actor().add_link(self.address()) {
            // Linking to an exited actor delivers the exit signal at once.
            self.cell.remove_link(peer_addr);
            self.system().deliver(Envelope::system(
                self.address(),
                Content::Exit { from: peer_addr, reason },
            ));
        }
    }

    /// Dissolves a link with `peer`.
    pub fn unlink(&self, peer: &ActorRef) {
        self.cell.remove_link(peer.address());
        peer.abstract_actor().remove_link(self.address());
    }

    /// Subscribes this actor to a down notification for `peer`.
    pub fn monitor(&self, peer: &ActorRef) {
        if let Err(reason) = peer.abstract_actor().add_monitor(self.address()) {
            // Monitoring an exited actor notifies immediately.
            self.system().deliver(Envelope::system(
                self.address(),
                Content::Down { from: peer.address(), reason },
            ));
        }
    }

    /// Cancels a monitor on `peer`.
    pub fn demonitor(&self, peer: &ActorRef) {
        peer.abstract_actor().remove_monitor(self.address());
    }

    /// Sets the trap-exit flag. While set, exit signals (except `Kill`)
    /// are delivered as ordinary messages.
    pub fn trap_exit(&self, trap: bool) {
        self.cell.set_trap_exit(trap);
    }

    /// Spawns a new event-based actor.
    pub fn spawn<F>(&self, init: F) -> ActorRef
    where
        F: FnOnce(&mut ActorContext) -> Behavior + Send + 'static,
    {
        self.system().spawn(init)
    }

    /// Replaces the active behavior when the current handler returns.
    pub fn become_(&mut self, behavior: Behavior) {
        self.ops.push(ContextOp::Become(behavior));
    }

    /// Pushes a behavior frame, keeping the current one below it.
    pub fn become_stacked(&mut self, behavior: Behavior) {
        self.ops.push(ContextOp::BecomeStacked(behavior));
    }

    /// Pops one behavior frame when the current handler returns. Popping
    /// the last frame exits with reason `normal`.
    pub fn unbecome(&mut self) {
        self.ops.push(ContextOp::Unbecome);
    }

    /// Begins the exit transition when the current handler returns.
    pub fn quit(&mut self, reason: ExitReason) {
        debug!("Actor {} quitting: {}.", self.address(), reason);
        self.ops.push(ContextOp::Quit(reason));
    }

    /// Delivers `payload` to `target` after `delay`.
    pub fn delay_send(&self, delay: Duration, target: Address, payload: impl IntoPayload) {
        let envelope = Envelope::user(
            Some(self.address()),
            target,
            MessageId::ASYNC,
            payload.into_payload(),
        );
        self.system().timer().schedule(delay, envelope);
    }
}
