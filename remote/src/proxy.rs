// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Remote-actor proxies
//!
//! A [`ProxyActor`] is the local surrogate for an actor on a remote node.
//! From the outside it is an actor: messages enqueued into it are
//! serialized and forwarded through the owning connection, and links or
//! monitors placed on it are tracked locally, satisfied when the remote
//! side reports the actor's exit (or when the connection is lost).
//!
//! The per-peer [`Namespace`] keeps at most one live proxy per remote
//! actor id; dropping the last reference expires the entry and releases
//! the remote monitor.

use crate::connection::{encode_envelope, ConnectionHandle};
use crate::header::{Header, Operation};

use troupe_core::{
    exit_fan_out, AbstractActor, ActorId, ActorKind, ActorSystem, Address, Content, Envelope,
    EnqueueStatus, ExitHook, ExitReason, NodeId,
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

struct ProxyState {
    links: HashSet<Address>,
    monitors: HashSet<Address>,
    hooks: Vec<ExitHook>,
    exit_reason: ExitReason,
}

/// Local surrogate for a remote actor.
pub struct ProxyActor {
    addr: Address,
    system: ActorSystem,
    conn: ConnectionHandle,
    state: Mutex<ProxyState>,
    namespace: Weak<Namespace>,
}

impl ProxyActor {
    fn new(
        addr: Address,
        system: ActorSystem,
        conn: ConnectionHandle,
        namespace: Weak<Namespace>,
    ) -> Arc<ProxyActor> {
        Arc::new(ProxyActor {
            addr,
            system,
            conn,
            state: Mutex::new(ProxyState {
                links: HashSet::new(),
                monitors: HashSet::new(),
                hooks: Vec::new(),
                exit_reason: ExitReason::NotExited,
            }),
            namespace,
        })
    }

    /// Transitions the proxy to exited and notifies local links and
    /// monitors, exactly as an ordinary actor would. Idempotent.
    pub fn force_exit(&self, reason: ExitReason) {
        let (links, monitors, hooks) = {
            let mut state = self.state.lock();
            if !state.exit_reason.is_not_exited() {
                return;
            }
            state.exit_reason = reason;
            (
                std::mem::take(&mut state.links),
                std::mem::take(&mut state.monitors),
                std::mem::take(&mut state.hooks),
            )
        };
        debug!("Proxy for {} exited: {}.", self.addr, reason);
        exit_fan_out(&self.system, self.addr, reason, links, monitors);
        for hook in hooks {
            hook(reason);
        }
    }
}

impl AbstractActor for ProxyActor {
    fn address(&self) -> Address {
        self.addr
    }

    fn kind(&self) -> ActorKind {
        ActorKind::Proxy
    }

    fn enqueue(&self, envelope: Arc<Envelope>) -> EnqueueStatus {
        if !self.state.lock().exit_reason.is_not_exited() {
            return EnqueueStatus::Rejected;
        }
        // Behavior timeouts never travel.
        if matches!(envelope.content, Content::Timeout { .. }) {
            return EnqueueStatus::Accepted;
        }
        let frame = match encode_envelope(self.system.codecs(), &envelope) {
            Ok(Some(frame)) => frame,
            Ok(None) => return EnqueueStatus::Accepted,
            Err(error) => {
                warn!("Cannot serialize message for {}: {}.", self.addr, error);
                return EnqueueStatus::Rejected;
            }
        };
        match self.conn.send(frame) {
            Ok(()) => EnqueueStatus::Accepted,
            Err(_) => EnqueueStatus::Rejected,
        }
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

impl Drop for ProxyActor {
    fn drop(&mut self) {
        if let Some(namespace) = self.namespace.upgrade() {
            namespace.forget(self.addr.actor);
        }
        // Release the remote monitor installed by announce_proxy.
        if self.state.get_mut().exit_reason.is_not_exited() {
            let header = Header::control(
                Operation::KillMonitorAck,
                Address::new(self.system.node_id(), ActorId::NONE),
                self.addr,
            );
            let _ = self.conn.send(crate::codec::Frame::control(header));
        }
    }
}

/// Per-peer table of remote-actor surrogates.
pub struct Namespace {
    node: NodeId,
    proxies: Mutex<HashMap<ActorId, Weak<ProxyActor>>>,
}

impl Namespace {
    pub(crate) fn new(node: NodeId) -> Arc<Namespace> {
        Arc::new(Namespace { node, proxies: Mutex::new(HashMap::new()) })
    }

    /// The remote node this namespace tracks.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Returns the live proxy for `aid`, creating (and announcing) a new
    /// one if none exists. Idempotent while the proxy is live.
    pub(crate) fn get_or_create(
        self: &Arc<Self>,
        system: &ActorSystem,
        conn: &ConnectionHandle,
        aid: ActorId,
    ) -> Arc<ProxyActor> {
        let mut proxies = self.proxies.lock();
        if let Some(existing) = proxies.get(&aid).and_then(Weak::upgrade) {
            return existing;
        }
        let addr = Address::new(self.node, aid);
        let proxy = ProxyActor::new(addr, system.clone(), conn.clone(), Arc::downgrade(self));
        proxies.insert(aid, Arc::downgrade(&proxy));
        drop(proxies);

        debug!("Created proxy for {}.", addr);
        // Ask the remote node to notify us when the actor exits.
        let announce = Header::control(
            Operation::AnnounceProxy,
            Address::new(system.node_id(), ActorId::NONE),
            addr,
        );
        let _ = conn.send(crate::codec::Frame::control(announce));
        proxy
    }

    /// Looks up a live proxy.
    pub fn get(&self, aid: ActorId) -> Option<Arc<ProxyActor>> {
        self.proxies.lock().get(&aid).and_then(Weak::upgrade)
    }

    /// Number of live proxies.
    pub fn live_count(&self) -> usize {
        self.proxies.lock().values().filter(|weak| weak.strong_count() > 0).count()
    }

    /// Handles a remote `kill_proxy` notification.
    pub(crate) fn kill(&self, aid: ActorId, reason: ExitReason) {
        let proxy = self.proxies.lock().remove(&aid).and_then(|weak| weak.upgrade());
        if let Some(proxy) = proxy {
            proxy.force_exit(reason);
        }
    }

    /// Force-exits every proxy forwarding through `conn`.
    pub(crate) fn kill_by_connection(&self, conn_id: crate::routing::ConnId, reason: ExitReason) {
        let proxies: Vec<Arc<ProxyActor>> = {
            let mut table = self.proxies.lock();
            let doomed: Vec<Arc<ProxyActor>> = table
                .values()
                .filter_map(Weak::upgrade)
                .filter(|proxy| proxy.conn.id() == conn_id)
                .collect();
            table.retain(|_, weak| {
                weak.upgrade().map_or(false, |proxy| proxy.conn.id() != conn_id)
            });
            doomed
        };
        for proxy in proxies {
            proxy.force_exit(reason);
        }
    }

    fn forget(&self, aid: ActorId) {
        let mut proxies = self.proxies.lock();
        if let Some(weak) = proxies.get(&aid) {
            if weak.strong_count() == 0 {
                proxies.remove(&aid);
            }
        }
    }
}
