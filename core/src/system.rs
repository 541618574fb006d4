// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! The `system` module provides the `ActorSystem` type: the factory and
//! directory for everything else. It owns the scheduler, the timer, the
//! registry, the codec registry and the group directory, and it is the
//! single delivery path every message (local, delayed or remote) goes
//! through.

use crate::address::{ActorId, Address, NodeId};
use crate::behavior::Behavior;
use crate::blocking::{run_blocking, BlockingContext};
use crate::cell::{AbstractActor, ActorCell, ActorKind, ResponseHandle};
use crate::context::{ActorContext, ActorRef};
use crate::envelope::{Content, Envelope, MessageId};
use crate::error::{Error, ErrorKind, ExitReason};
use crate::group::{spawn_broker, Group, GroupOp};
use crate::mailbox::EnqueueStatus;
use crate::payload::{Codec, CodecRegistry, IntoPayload};
use crate::registry::Registry;
use crate::runner::ActorRunner;
use crate::scheduler::Scheduler;
use crate::timer::Timer;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Recognized configuration options of an actor system.
pub struct SystemConfig {
    /// Size of the dedicated worker pool; `None` borrows the ambient
    /// runtime.
    pub workers: Option<usize>,
    /// Coalescing window of the timer.
    pub timer_resolution: Duration,
    /// Additional payload codecs, registered by stable type name.
    pub codecs: Vec<(&'static str, Arc<dyn Codec>)>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            workers: None,
            timer_resolution: Duration::from_millis(1),
            codecs: Vec::new(),
        }
    }
}

/// Hook installed by the distribution layer to resolve remote addresses
/// into proxy actors.
pub trait RemoteNode: Send + Sync {
    /// Returns (or creates) the local surrogate for a remote actor.
    fn resolve(&self, address: Address) -> Option<Arc<dyn AbstractActor>>;
}

pub(crate) struct SystemInner {
    node: NodeId,
    registry: Registry,
    codecs: CodecRegistry,
    scheduler: Scheduler,
    timer: Timer,
    groups: RwLock<HashMap<String, Group>>,
    next_actor_id: AtomicU64,
    remote: RwLock<Option<Arc<dyn RemoteNode>>>,
    token: CancellationToken,
}

/// The actor system.
///
/// Cheap to clone; all clones share one underlying system.
#[derive(Clone)]
pub struct ActorSystem {
    inner: Arc<SystemInner>,
}

impl ActorSystem {
    /// Creates an actor system from a configuration.
    pub fn new(config: SystemConfig) -> Result<ActorSystem, Error> {
        let scheduler = Scheduler::new(config.workers)?;
        let codecs = CodecRegistry::with_defaults();
        codecs.register::<GroupOp>();
        for (name, codec) in config.codecs {
            codecs.register_with(name, codec);
        }
        let handle = scheduler.handle().clone();
        let resolution = config.timer_resolution;
        let inner = Arc::new_cyclic(|weak| {
            let timer = Timer::start(resolution, &handle, weak.clone());
            SystemInner {
                node: NodeId::generate(),
                registry: Registry::default(),
                codecs,
                scheduler,
                timer,
                groups: RwLock::new(HashMap::new()),
                next_actor_id: AtomicU64::new(1),
                remote: RwLock::new(None),
                token: CancellationToken::new(),
            }
        });
        debug!("Actor system created on node {}.", inner.node);
        Ok(ActorSystem { inner })
    }

    pub(crate) fn from_inner(inner: Arc<SystemInner>) -> ActorSystem {
        ActorSystem { inner }
    }

    /// Fingerprint of this node.
    pub fn node_id(&self) -> NodeId {
        self.inner.node
    }

    /// The local actor directory.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// The payload codec registry.
    pub fn codecs(&self) -> &CodecRegistry {
        &self.inner.codecs
    }

    /// The timer entity.
    pub fn timer(&self) -> &Timer {
        &self.inner.timer
    }

    /// The worker pool.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Installs the distribution layer's address resolver.
    pub fn install_remote(&self, remote: Arc<dyn RemoteNode>) {
        *self.inner.remote.write() = Some(remote);
    }

    pub(crate) fn next_actor_id(&self) -> ActorId {
        ActorId(self.inner.next_actor_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Spawns an event-based actor from its init closure.
    ///
    /// `init` runs as the actor's first quantum and returns the initial
    /// behavior; it may already send, spawn and link.
    pub fn spawn<F>(&self, init: F) -> ActorRef
    where
        F: FnOnce(&mut ActorContext) -> Behavior + Send + 'static,
    {
        self.spawn_with(true, init)
    }

    /// Spawns an event-based helper entity excluded from the
    /// all-actors-done barrier (group brokers, relays, request stubs).
    pub fn spawn_service<F>(&self, init: F) -> ActorRef
    where
        F: FnOnce(&mut ActorContext) -> Behavior + Send + 'static,
    {
        self.spawn_with(false, init)
    }

    pub(crate) fn spawn_with<F>(&self, counted: bool, init: F) -> ActorRef
    where
        F: FnOnce(&mut ActorContext) -> Behavior + Send + 'static,
    {
        let address = Address::new(self.inner.node, self.next_actor_id());
        let cell = ActorCell::new(address, ActorKind::Event, counted, self.clone());
        let abstract_cell: Arc<dyn AbstractActor> = cell.clone();
        self.inner
            .registry
            .insert(address.actor, Arc::downgrade(&abstract_cell), counted);
        debug!("Spawning actor {}.", address);

        let runner = ActorRunner::new(cell, self.inner.token.child_token());
        self.inner.scheduler.spawn(async move {
            runner.run(init).await;
        });
        ActorRef::new(abstract_cell, self.clone())
    }

    /// Spawns a blocking actor on a dedicated carrier thread.
    ///
    /// The body should propagate `Err(Error::Exited)` out of receive
    /// calls; returning `Ok(())` exits with reason `normal`.
    pub fn spawn_blocking_actor<F>(&self, body: F) -> ActorRef
    where
        F: FnOnce(&mut BlockingContext) -> Result<(), Error> + Send + 'static,
    {
        let address = Address::new(self.inner.node, self.next_actor_id());
        let cell = ActorCell::new(address, ActorKind::Blocking, true, self.clone());
        let abstract_cell: Arc<dyn AbstractActor> = cell.clone();
        self.inner
            .registry
            .insert(address.actor, Arc::downgrade(&abstract_cell), true);
        debug!("Spawning blocking actor {}.", address);

        let handle = self.inner.scheduler.handle().clone();
        self.inner.scheduler.spawn_blocking(move || {
            run_blocking(cell, handle, Box::new(body));
        });
        ActorRef::new(abstract_cell, self.clone())
    }

    /// Sends an anonymous asynchronous message to an address.
    pub fn send(&self, target: Address, payload: impl IntoPayload) -> Result<(), Error> {
        let envelope = Envelope::user(None, target, MessageId::ASYNC, payload.into_payload());
        match self.deliver(envelope) {
            EnqueueStatus::Rejected => Err(Error::Send("receiver exited".to_owned())),
            _ => Ok(()),
        }
    }

    /// Sends a request from outside any actor.
    ///
    /// A lightweight requester entity is registered so that even remote
    /// responses find their way back; it is released when the returned
    /// handle settles.
    pub fn request(
        &self,
        target: Address,
        payload: impl IntoPayload,
        timeout: Option<Duration>,
    ) -> ResponseHandle {
        let address = Address::new(self.inner.node, self.next_actor_id());
        let cell = ActorCell::new(address, ActorKind::Event, false, self.clone());
        let abstract_cell: Arc<dyn AbstractActor> = cell.clone();
        self.inner
            .registry
            .insert(address.actor, Arc::downgrade(&abstract_cell), false);

        let id = cell.next_request_id();
        let rx = cell
            .register_pending_channel(id)
            .expect("freshly created requester cannot be exited");
        let envelope = Envelope::user(
            Some(address),
            target,
            MessageId::request(id),
            payload.into_payload(),
        );
        self.deliver(envelope);
        ResponseHandle {
            cell: Arc::downgrade(&cell),
            id,
            rx,
            timeout,
            keepalive: Some(cell),
        }
    }

    /// Returns the named local group, creating it on first use.
    pub fn group(&self, name: &str) -> Group {
        if let Some(group) = self.inner.groups.read().get(name) {
            return group.clone();
        }
        let mut groups = self.inner.groups.write();
        if let Some(group) = groups.get(name) {
            return group.clone();
        }
        debug!("Creating group '{}'.", name);
        let broker = spawn_broker(self, name.to_owned());
        let group = Group::new(name.to_owned(), broker);
        groups.insert(name.to_owned(), group.clone());
        group
    }

    /// Resolves an address to an actor: local registry for this node,
    /// the installed remote resolver otherwise.
    pub fn resolve(&self, address: Address) -> Option<Arc<dyn AbstractActor>> {
        if address.node == self.inner.node {
            self.inner.registry.get(address.actor)
        } else {
            let remote = self.inner.remote.read().clone();
            match remote {
                Some(remote) => remote.resolve(address),
                None => {
                    error!("No distribution layer installed; cannot reach {}.", address);
                    None
                }
            }
        }
    }

    /// Delivers an envelope to its receiver.
    ///
    /// An undeliverable request is bounced as a synthesized
    /// receiver-down response to its sender.
    pub fn deliver(&self, envelope: Arc<Envelope>) -> EnqueueStatus {
        match self.resolve(envelope.receiver) {
            Some(target) => self.deliver_direct(target.as_ref(), envelope),
            None => {
                debug!("Dropping message to unknown actor {}.", envelope.receiver);
                if let Some(bounce) = Envelope::error_response(&envelope, ErrorKind::ReceiverDown)
                {
                    self.deliver(bounce);
                }
                EnqueueStatus::Rejected
            }
        }
    }

    /// Delivers an envelope to an already-resolved actor.
    pub fn deliver_direct(
        &self,
        target: &dyn AbstractActor,
        envelope: Arc<Envelope>,
    ) -> EnqueueStatus {
        let status = target.enqueue(envelope.clone());
        if status == EnqueueStatus::Rejected {
            if let Some(bounce) = Envelope::error_response(&envelope, ErrorKind::ReceiverDown) {
                self.deliver(bounce);
            }
        }
        status
    }

    /// Waits until every spawned actor has exited.
    pub async fn await_all_actors_done(&self) {
        self.inner.registry.await_all_done().await;
    }

    /// Shuts the system down: kills remaining actors, waits for them to
    /// drain, stops the timer and releases a dedicated worker pool.
    ///
    /// Must be awaited from outside any actor of this system.
    pub async fn shutdown(&self) {
        debug!("Shutting down actor system on node {}.", self.inner.node);
        self.inner.token.cancel();
        for actor in self.inner.registry.snapshot() {
            let address = actor.address();
            self.deliver_direct(
                actor.as_ref(),
                Envelope::system(
                    address,
                    Content::Exit { from: address, reason: ExitReason::Kill },
                ),
            );
        }
        self.inner.registry.await_all_done().await;
        self.inner.timer.stop();
        self.inner.scheduler.release();
        debug!("Actor system stopped.");
    }
}
