// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor core
//!
//! [`ActorCell`] is the part of an actor reachable from other threads: its
//! mailbox, links, monitors, trap-exit flag, exit reason and the table of
//! pending requests. Everything else (behavior stack, handler state) is
//! private to whichever worker is currently running the actor.
//!
//! [`AbstractActor`] is the capability set shared by the actor variants
//! (local event-based and blocking cells here, remote proxies in the
//! distribution layer), so registries, links and monitors treat them
//! uniformly.

use crate::address::Address;
use crate::envelope::{Content, Envelope};
use crate::error::{Error, ErrorKind, ExitReason};
use crate::mailbox::{EnqueueStatus, Mailbox};
use crate::payload::Payload;
use crate::system::ActorSystem;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Variant of an actor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActorKind {
    /// Reacts to one message per scheduled quantum; never blocks.
    Event,
    /// May park its carrier thread in selective-receive waits.
    Blocking,
    /// Stands in for an actor on a remote node.
    Proxy,
}

/// Lifecycle state of an actor, as observed from outside.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActorStatus {
    /// Created, not yet scheduled.
    Initialized,
    /// Runnable, waiting for a worker.
    Ready,
    /// A worker is executing a quantum.
    Running,
    /// Parked until a mailbox arrival.
    AwaitingMessage,
    /// Parked with outstanding requests and nothing else to run.
    AwaitingResponse,
    /// Terminated.
    Exited,
}

/// Hook invoked exactly once when the actor exits.
pub type ExitHook = Box<dyn FnOnce(ExitReason) + Send>;

/// Continuation invoked in actor context when a response arrives.
pub type ResponseContinuation =
    Box<dyn FnOnce(&mut crate::context::ActorContext, Result<Payload, Error>) + Send>;

/// Capability set common to every actor variant.
pub trait AbstractActor: Send + Sync + 'static {
    /// Universally unique address.
    fn address(&self) -> Address;

    /// Which variant this is.
    fn kind(&self) -> ActorKind;

    /// Appends a message; see [`EnqueueStatus`].
    fn enqueue(&self, envelope: Arc<Envelope>) -> EnqueueStatus;

    /// Current exit reason (`NotExited` while live).
    fn exit_reason(&self) -> ExitReason;

    /// Records a link from `peer`. Fails with the exit reason when the
    /// actor already terminated, so the caller can notify immediately.
    fn add_link(&self, peer: Address) -> Result<(), ExitReason>;

    /// Removes a link entry.
    fn remove_link(&self, peer: Address);

    /// Registers `watcher` for a down notification. Fails with the exit
    /// reason when the actor already terminated.
    fn add_monitor(&self, watcher: Address) -> Result<(), ExitReason>;

    /// Removes a monitor registration.
    fn remove_monitor(&self, watcher: Address);

    /// Attaches a hook that runs on exit (immediately if already exited).
    fn attach_on_exit(&self, hook: ExitHook);
}

/// Delivers the exit/down fan-out for a terminating actor.
///
/// Shared by local cells and remote proxies: one exit signal per linked
/// peer, one down notification per monitor.
pub fn exit_fan_out(
    system: &ActorSystem,
    from: Address,
    reason: ExitReason,
    links: HashSet<Address>,
    monitors: HashSet<Address>,
) {
    for peer in links {
        system.deliver(Envelope::system(peer, Content::Exit { from, reason }));
    }
    for watcher in monitors {
        system.deliver(Envelope::system(watcher, Content::Down { from, reason }));
    }
}

pub(crate) enum PendingSlot {
    /// Response completes a oneshot channel (blocking or external caller).
    Channel(oneshot::Sender<Arc<Envelope>>),
    /// Response re-enters the mailbox and runs a continuation in actor
    /// context (event-based caller).
    Continuation(ResponseContinuation),
}

struct CellState {
    links: HashSet<Address>,
    monitors: HashSet<Address>,
    hooks: Vec<ExitHook>,
    trap_exit: bool,
    exit_reason: ExitReason,
    pending: HashMap<u64, PendingSlot>,
}

/// Shared core of a local actor.
pub struct ActorCell {
    addr: Address,
    kind: ActorKind,
    counted: bool,
    mailbox: Mailbox,
    status: Mutex<ActorStatus>,
    state: Mutex<CellState>,
    next_request_id: AtomicU64,
    system: ActorSystem,
}

impl ActorCell {
    pub(crate) fn new(
        addr: Address,
        kind: ActorKind,
        counted: bool,
        system: ActorSystem,
    ) -> Arc<ActorCell> {
        Arc::new(ActorCell {
            addr,
            kind,
            counted,
            mailbox: Mailbox::default(),
            status: Mutex::new(ActorStatus::Initialized),
            state: Mutex::new(CellState {
                links: HashSet::new(),
                monitors: HashSet::new(),
                hooks: Vec::new(),
                trap_exit: false,
                exit_reason: ExitReason::NotExited,
                pending: HashMap::new(),
            }),
            next_request_id: AtomicU64::new(1),
            system,
        })
    }

    /// The mailbox of this actor.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// The owning actor system.
    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Observable lifecycle state.
    pub fn status(&self) -> ActorStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: ActorStatus) {
        let mut current = self.status.lock();
        // Exited is terminal.
        if *current != ActorStatus::Exited {
            *current = status;
        }
    }

    /// The trap-exit flag.
    pub fn trap_exit(&self) -> bool {
        self.state.lock().trap_exit
    }

    pub(crate) fn set_trap_exit(&self, trap: bool) {
        self.state.lock().trap_exit = trap;
    }

    /// Allocates the next request id.
    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_pending_channel(
        &self,
        id: u64,
    ) -> Option<oneshot::Receiver<Arc<Envelope>>> {
        let mut state = self.state.lock();
        if !state.exit_reason.is_not_exited() {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.pending.insert(id, PendingSlot::Channel(tx));
        Some(rx)
    }

    pub(crate) fn register_pending_continuation(
        &self,
        id: u64,
        continuation: ResponseContinuation,
    ) -> bool {
        let mut state = self.state.lock();
        if !state.exit_reason.is_not_exited() {
            return false;
        }
        state.pending.insert(id, PendingSlot::Continuation(continuation));
        true
    }

    /// Forgets a pending request (timeout or cancellation).
    pub fn abandon_pending(&self, id: u64) {
        self.state.lock().pending.remove(&id);
    }

    /// True while requests are outstanding.
    pub fn has_pending(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    /// True while the given request id is outstanding.
    pub fn is_pending(&self, id: u64) -> bool {
        self.state.lock().pending.contains_key(&id)
    }

    pub(crate) fn take_continuation(&self, id: u64) -> Option<ResponseContinuation> {
        let mut state = self.state.lock();
        match state.pending.remove(&id) {
            Some(PendingSlot::Continuation(continuation)) => Some(continuation),
            Some(slot) => {
                // Not a continuation: put it back untouched.
                state.pending.insert(id, slot);
                None
            }
            None => None,
        }
    }

    /// Routes a response envelope to the pending-request table.
    ///
    /// Late or duplicate responses are dropped. Continuation slots are
    /// satisfied through the mailbox so the closure runs in actor context.
    fn route_response(&self, envelope: Arc<Envelope>) {
        let id = envelope.mid.request_part();
        let mut state = self.state.lock();
        match state.pending.get(&id) {
            Some(PendingSlot::Channel(_)) => {
                if let Some(PendingSlot::Channel(tx)) = state.pending.remove(&id) {
                    // A dropped receiver means the requester gave up.
                    let _ = tx.send(envelope);
                }
            }
            Some(PendingSlot::Continuation(_)) => {
                drop(state);
                self.mailbox.enqueue(envelope);
            }
            None => {
                debug!("Dropping unmatched response for request {}.", id);
            }
        }
    }

    /// Begins the exit transition. Idempotent; returns `true` only for the
    /// call that performed the transition.
    pub fn begin_exit(&self, reason: ExitReason) -> bool {
        let (links, monitors, hooks) = {
            let mut state = self.state.lock();
            if !state.exit_reason.is_not_exited() {
                return false;
            }
            state.exit_reason = reason;
            // Outstanding requests of this actor are abandoned; dropped
            // channel senders surface as receiver-down at the requester.
            state.pending.clear();
            (
                std::mem::take(&mut state.links),
                std::mem::take(&mut state.monitors),
                std::mem::take(&mut state.hooks),
            )
        };
        {
            let mut status = self.status.lock();
            *status = ActorStatus::Exited;
        }
        debug!("Actor {} exited: {}.", self.addr, reason);

        // Bounce undelivered requests before notifying anyone.
        for envelope in self.mailbox.close() {
            if let Some(bounce) = Envelope::error_response(&envelope, ErrorKind::ReceiverDown) {
                self.system.deliver(bounce);
            }
        }
        exit_fan_out(&self.system, self.addr, reason, links, monitors);
        for hook in hooks {
            hook(reason);
        }
        self.system.registry().remove(self.addr.actor, self.counted);
        true
    }
}

impl AbstractActor for ActorCell {
    fn address(&self) -> Address {
        self.addr
    }

    fn kind(&self) -> ActorKind {
        self.kind
    }

    fn enqueue(&self, envelope: Arc<Envelope>) -> EnqueueStatus {
        if envelope.mid.is_response() {
            self.route_response(envelope);
            return EnqueueStatus::Accepted;
        }
        self.mailbox.enqueue(envelope)
    }

    fn exit_reason(&self) -> ExitReason {
        self.state.lock().exit_reason
    }

    fn add_link(&self, peer: Address) -> Result<(), ExitReason> {
        let mut state = self.state.lock();
        if !state.exit_reason.is_not_exited() {
            return Err(state.exit_reason);
        }
        state.links.insert(peer);
        Ok(())
    }

    fn remove_link(&self, peer: Address) {
        self.state.lock().links.remove(&peer);
    }

    fn add_monitor(&self, watcher: Address) -> Result<(), ExitReason> {
        let mut state = self.state.lock();
        if !state.exit_reason.is_not_exited() {
            return Err(state.exit_reason);
        }
        state.monitors.insert(watcher);
        Ok(())
    }

    fn remove_monitor(&self, watcher: Address) {
        self.state.lock().monitors.remove(&watcher);
    }

    fn attach_on_exit(&self, hook: ExitHook) {
        let reason = {
            let mut state = self.state.lock();
            if state.exit_reason.is_not_exited() {
                state.hooks.push(hook);
                return;
            }
            state.exit_reason
        };
        hook(reason);
    }
}

/// Handle to an in-flight request.
///
/// Await [`ResponseHandle::receive`] for the response payload. At most one
/// outcome is produced per request id: the response, a synthesized
/// receiver-down error, or a request-timeout error when the deadline
/// passes first.
pub struct ResponseHandle {
    pub(crate) cell: Weak<ActorCell>,
    pub(crate) id: u64,
    pub(crate) rx: oneshot::Receiver<Arc<Envelope>>,
    pub(crate) timeout: Option<Duration>,
    /// Keeps a temporary requester cell alive and deregisters it when the
    /// request settles.
    pub(crate) keepalive: Option<Arc<ActorCell>>,
}

impl ResponseHandle {
    /// Waits for the response.
    pub async fn receive(mut self) -> Result<Payload, Error> {
        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    if let Some(cell) = self.cell.upgrade() {
                        cell.abandon_pending(self.id);
                    }
                    self.settle();
                    return Err(Error::RequestTimeout);
                }
            },
            None => (&mut self.rx).await,
        };
        self.settle();
        match result {
            Ok(envelope) => match &envelope.content {
                Content::User(payload) => Ok(payload.clone()),
                Content::Error { kind } => Err((*kind).into()),
                _ => Err(Error::Send("unexpected response content".to_owned())),
            },
            Err(_) => Err(Error::ReceiverDown),
        }
    }

    fn settle(&mut self) {
        if let Some(cell) = self.keepalive.take() {
            cell.begin_exit(ExitReason::Normal);
        }
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        if let Some(cell) = self.keepalive.take() {
            cell.abandon_pending(self.id);
            cell.begin_exit(ExitReason::Normal);
        }
    }
}
