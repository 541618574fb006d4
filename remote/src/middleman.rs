// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Middleman
//!
//! The remoting subsystem of one actor system: it owns the routing table,
//! the per-peer namespaces, every live connection and the published
//! ports. Installing a middleman hooks remote address resolution into the
//! core delivery path, making remote sends transparent: a message to a
//! remote address materializes a proxy, and the proxy forwards frames
//! through whichever connection routes to that node.

use crate::connection::{drive_client, drive_server, ConnectionHandle};
use crate::error::Error;
use crate::proxy::{Namespace, ProxyActor};
use crate::routing::{ConnId, RoutingTable};
use crate::transport::Transport;

use troupe_core::{
    AbstractActor, ActorId, ActorRef, ActorSystem, Address, ExitReason, NodeId, RemoteNode,
};

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::Frame;

pub(crate) struct PublishedPort {
    actor: ActorId,
    token: CancellationToken,
}

/// State shared between the middleman surface, connection drivers and
/// proxies.
pub(crate) struct MiddlemanShared {
    pub system: ActorSystem,
    pub transport: Arc<dyn Transport>,
    pub routing: RoutingTable,
    pub token: CancellationToken,
    connections: RwLock<HashMap<ConnId, ConnectionHandle>>,
    namespaces: RwLock<HashMap<NodeId, Arc<Namespace>>>,
    /// Strong refs to peer published-actor proxies, held while their
    /// connection lives so connection re-use never yields an expired
    /// proxy.
    pinned: Mutex<HashMap<ConnId, Arc<ProxyActor>>>,
    published: Mutex<HashMap<u16, PublishedPort>>,
    next_conn: AtomicU64,
}

impl MiddlemanShared {
    pub(crate) fn next_conn_id(&self) -> ConnId {
        ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register_connection(&self, handle: ConnectionHandle) {
        debug!("{} ready for node {}.", handle.id(), handle.peer());
        self.routing.add_direct(handle.peer(), handle.id());
        self.connections.write().insert(handle.id(), handle);
    }

    pub(crate) fn connection(&self, id: ConnId) -> Option<ConnectionHandle> {
        self.connections.read().get(&id).cloned()
    }

    pub(crate) fn namespace(&self, node: NodeId) -> Arc<Namespace> {
        if let Some(namespace) = self.namespaces.read().get(&node) {
            return namespace.clone();
        }
        let mut namespaces = self.namespaces.write();
        namespaces.entry(node).or_insert_with(|| Namespace::new(node)).clone()
    }

    pub(crate) fn pin_proxy(&self, conn: ConnId, proxy: Arc<ProxyActor>) {
        self.pinned.lock().insert(conn, proxy);
    }

    /// Forwards a frame towards a node this endpoint is not the final
    /// destination of. Frames without a usable route are dropped.
    pub(crate) fn forward_frame(&self, arrived_on: ConnId, frame: Frame) {
        let dest = frame.header.dest.node;
        let Some(conn) = self.routing.lookup(dest).filter(|conn| *conn != arrived_on) else {
            warn!("No route to forward frame for node {}; dropping.", dest);
            return;
        };
        if let Some(handle) = self.connection(conn) {
            let _ = handle.send(frame);
        }
    }

    /// Teardown bookkeeping for a closed connection: erase and blacklist
    /// its routes and force-exit the proxies it owned.
    pub(crate) fn connection_closed(&self, id: ConnId) {
        self.connections.write().remove(&id);
        self.pinned.lock().remove(&id);
        let lost = self.routing.erase_connection(id);
        for node in &lost {
            debug!("Node {} became unreachable.", node);
        }
        // Exit fan-out may re-enter the namespace table, so snapshot it
        // before force-exiting anything.
        let namespaces: Vec<Arc<Namespace>> =
            self.namespaces.read().values().cloned().collect();
        for namespace in namespaces {
            namespace.kill_by_connection(id, ExitReason::RemoteLinkUnreachable);
        }
    }
}

impl RemoteNode for MiddlemanShared {
    fn resolve(&self, address: Address) -> Option<Arc<dyn AbstractActor>> {
        let conn = self.routing.lookup(address.node)?;
        let handle = self.connection(conn)?;
        let proxy =
            self.namespace(address.node)
                .get_or_create(&self.system, &handle, address.actor);
        Some(proxy)
    }
}

/// The remoting subsystem. One per actor system that wants BASP.
pub struct Middleman {
    shared: Arc<MiddlemanShared>,
}

impl Middleman {
    /// Creates a middleman over `transport` and installs it as the
    /// system's remote resolver.
    pub fn new(system: &ActorSystem, transport: impl Transport) -> Middleman {
        let shared = Arc::new(MiddlemanShared {
            system: system.clone(),
            transport: Arc::new(transport),
            routing: RoutingTable::default(),
            token: CancellationToken::new(),
            connections: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
            pinned: Mutex::new(HashMap::new()),
            published: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
        });
        system.install_remote(shared.clone());
        Middleman { shared }
    }

    /// The owning actor system.
    pub fn system(&self) -> &ActorSystem {
        &self.shared.system
    }

    /// Makes `actor` reachable on `port` (zero picks a free port) and
    /// returns the bound port. A port already in use is an error.
    pub async fn publish(
        &self,
        actor: &ActorRef,
        port: u16,
        host: Option<&str>,
    ) -> Result<u16, Error> {
        let mut listener = self
            .shared
            .transport
            .listen(host.unwrap_or("0.0.0.0"), port)
            .await?;
        let bound = listener.local_port();
        let aid = actor.address().actor;
        let token = self.shared.token.child_token();
        self.shared
            .published
            .lock()
            .insert(bound, PublishedPort { actor: aid, token: token.clone() });
        debug!("Published actor {} on port {}.", actor.address(), bound);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(stream) => {
                            tokio::spawn(drive_server(shared.clone(), stream, aid));
                        }
                        Err(error) => {
                            warn!("Acceptor on port {} failed: {}.", bound, error);
                            break;
                        }
                    },
                }
            }
        });
        Ok(bound)
    }

    /// Stops accepting connections for `actor` on `port`. Existing
    /// connections stay open.
    pub fn unpublish(&self, actor: &ActorRef, port: u16) -> Result<(), Error> {
        let mut published = self.shared.published.lock();
        let Some(entry) = published.remove(&port) else {
            return Err(Error::Publish(format!("port {} is not published", port)));
        };
        if entry.actor != actor.address().actor {
            published.insert(port, entry);
            return Err(Error::Publish(format!(
                "port {} publishes a different actor",
                port
            )));
        }
        entry.token.cancel();
        Ok(())
    }

    /// Connects to `host:port` and returns a reference to the actor
    /// published there.
    pub async fn remote_actor(&self, host: &str, port: u16) -> Result<ActorRef, Error> {
        let stream = self.shared.transport.connect(host, port).await?;
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(drive_client(self.shared.clone(), stream, ready_tx));

        let (node, published) = ready_rx
            .await
            .map_err(|_| Error::ConnectionClosed)??;
        if published.is_none() {
            return Err(Error::Handshake(format!(
                "node {} publishes no actor on that port",
                node
            )));
        }
        let conn = self
            .shared
            .routing
            .lookup(node)
            .ok_or(Error::NoRoute(node))?;
        let handle = self
            .shared
            .connection(conn)
            .ok_or(Error::ConnectionClosed)?;
        let proxy = self
            .shared
            .namespace(node)
            .get_or_create(&self.shared.system, &handle, published);
        self.shared.pin_proxy(conn, proxy.clone());
        Ok(ActorRef::from_abstract(proxy, self.shared.system.clone()))
    }

    /// Shuts the middleman down: acceptors stop, connections close and
    /// their proxies exit with `remote-link-unreachable`.
    pub fn stop(&self) {
        debug!("Stopping middleman.");
        self.shared.token.cancel();
    }
}
