// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Routing table
//!
//! Maps destination nodes to connections: a direct connection when one
//! exists, otherwise any known hop. A blacklist records `(node,
//! connection)` pairs that have failed so a broken route is never
//! re-adopted. When several hops survive, the numerically smallest
//! connection handle is chosen, keeping the pick deterministic.

use parking_lot::RwLock;

use troupe_core::NodeId;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Identifier of one connection within this middleman.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Default)]
struct Inner {
    direct: HashMap<NodeId, ConnId>,
    hops: HashMap<NodeId, BTreeSet<ConnId>>,
    blacklist: HashSet<(NodeId, ConnId)>,
}

/// Node-to-connection routing state.
#[derive(Default)]
pub struct RoutingTable {
    inner: RwLock<Inner>,
}

impl RoutingTable {
    /// Records the direct connection to `node`.
    pub fn add_direct(&self, node: NodeId, conn: ConnId) {
        self.inner.write().direct.insert(node, conn);
    }

    /// Records that frames from `node` have arrived through `conn`.
    pub fn add_hop(&self, node: NodeId, conn: ConnId) {
        self.inner.write().hops.entry(node).or_default().insert(conn);
    }

    /// Looks up the connection to use for `node`: the direct connection
    /// if it is usable, otherwise the smallest non-blacklisted hop.
    pub fn lookup(&self, node: NodeId) -> Option<ConnId> {
        let inner = self.inner.read();
        if let Some(conn) = inner.direct.get(&node) {
            if !inner.blacklist.contains(&(node, *conn)) {
                return Some(*conn);
            }
        }
        inner
            .hops
            .get(&node)
            .into_iter()
            .flatten()
            .find(|conn| !inner.blacklist.contains(&(node, **conn)))
            .copied()
    }

    /// Marks one route as failed.
    pub fn blacklist(&self, node: NodeId, conn: ConnId) {
        self.inner.write().blacklist.insert((node, conn));
    }

    /// Removes a closed connection from every route and blacklists the
    /// pairs it served. Returns the nodes left without any route.
    pub fn erase_connection(&self, conn: ConnId) -> Vec<NodeId> {
        let mut inner = self.inner.write();
        let mut affected: Vec<NodeId> = Vec::new();

        let direct_nodes: Vec<NodeId> = inner
            .direct
            .iter()
            .filter(|(_, c)| **c == conn)
            .map(|(node, _)| *node)
            .collect();
        for node in &direct_nodes {
            inner.direct.remove(node);
            inner.blacklist.insert((*node, conn));
        }

        let hop_nodes: Vec<NodeId> = inner
            .hops
            .iter()
            .filter(|(_, conns)| conns.contains(&conn))
            .map(|(node, _)| *node)
            .collect();
        for node in &hop_nodes {
            if let Some(conns) = inner.hops.get_mut(node) {
                conns.remove(&conn);
                if conns.is_empty() {
                    inner.hops.remove(node);
                }
            }
            inner.blacklist.insert((*node, conn));
        }

        for node in direct_nodes.into_iter().chain(hop_nodes) {
            let unreachable = !inner.direct.contains_key(&node)
                && inner.hops.get(&node).map_or(true, BTreeSet::is_empty);
            if unreachable && !affected.contains(&node) {
                affected.push(node);
            }
        }
        affected
    }
}
