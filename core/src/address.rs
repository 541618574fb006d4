// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor addressing
//!
//! The `address` module provides the identity types of the runtime. An
//! [`ActorId`] is unique within one node; a [`NodeId`] is a 160-bit
//! fingerprint of the running process. Together they form an [`Address`],
//! the universally unique name of an actor, comparable and hashable so it
//! can key registries, link sets and routing tables.

use serde::{Deserialize, Serialize};

use std::fmt;

/// Identifier of an actor, unique per node.
///
/// Ids are assigned from a per-system counter starting at 1; id 0 is
/// reserved to mean "no actor" in wire headers and anonymous senders.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct ActorId(pub u64);

impl ActorId {
    /// The reserved "no actor" id.
    pub const NONE: ActorId = ActorId(0);

    /// True for the reserved id.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of bytes in a node fingerprint.
pub const NODE_ID_LEN: usize = 20;

/// Stable 160-bit fingerprint of a running node.
///
/// The fingerprint combines a boot-unique UUID with the OS process id, so
/// no two running systems (across processes, restarts of the same binary,
/// or several systems inside one process) ever share a `NodeId`. The
/// all-zero value is reserved to mean "no node" in wire headers.
#[derive(
    Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// The reserved "no node" value.
    pub const ZERO: NodeId = NodeId([0u8; NODE_ID_LEN]);

    /// Fingerprint for a freshly started node.
    pub fn generate() -> NodeId {
        let uuid = uuid::Uuid::new_v4();
        let pid = std::process::id();
        let mut bytes = [0u8; NODE_ID_LEN];
        bytes[..16].copy_from_slice(uuid.as_bytes());
        bytes[16..].copy_from_slice(&pid.to_be_bytes());
        NodeId(bytes)
    }

    /// Builds a node id from raw bytes.
    pub fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> NodeId {
        NodeId(bytes)
    }

    /// Raw fingerprint bytes, big-endian rendering order.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// True for the reserved all-zero value.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; NODE_ID_LEN]
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to tell nodes apart in logs.
        write!(f, "NodeId(")?;
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..)")
    }
}

/// Universally unique actor address: `(NodeId, ActorId)`.
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct Address {
    /// Node the actor lives on.
    pub node: NodeId,
    /// Actor id within that node.
    pub actor: ActorId,
}

impl Address {
    /// Builds an address.
    pub fn new(node: NodeId, actor: ActorId) -> Address {
        Address { node, actor }
    }

    /// The reserved "nobody" address used for anonymous senders on the wire.
    pub fn zero() -> Address {
        Address { node: NodeId::ZERO, actor: ActorId::NONE }
    }

    /// True for the reserved "nobody" address.
    pub fn is_zero(&self) -> bool {
        self.node.is_zero() && self.actor.is_none()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.actor, self.node)
    }
}
