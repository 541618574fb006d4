// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Groups
//!
//! A group is a named multi-subscriber channel: anything sent to the
//! group's broker actor is forwarded to every current subscriber, with the
//! original sender preserved. Join/leave use typed protocol tags so the
//! same broker protocol works across node boundaries (the distribution
//! layer builds remote groups on top of it).
//!
//! No ordering is promised across subscribers; per-sender order to any
//! single subscriber follows the usual channel guarantee.

use crate::address::Address;
use crate::behavior::{Behavior, HandlerOutcome};
use crate::context::ActorRef;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::payload::{IntoPayload, Typed};
use crate::system::ActorSystem;

use serde::{Deserialize, Serialize};
use tracing::debug;

use std::collections::HashSet;
use std::sync::Arc;

/// Protocol tags understood by every group broker.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum GroupOp {
    /// Subscribe the given actor.
    Join(Address),
    /// Unsubscribe the given actor.
    Leave(Address),
}

impl Typed for GroupOp {
    const NAME: &'static str = "troupe::group_op";
}

/// Handle to a group.
#[derive(Clone, Debug)]
pub struct Group {
    name: String,
    broker: ActorRef,
}

impl Group {
    /// Builds a group handle over an arbitrary broker actor.
    ///
    /// The distribution layer uses this to wrap relay actors speaking the
    /// same broker protocol.
    pub fn new(name: String, broker: ActorRef) -> Group {
        Group { name, broker }
    }

    /// The group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The broker actor forwarding to subscribers.
    pub fn broker(&self) -> &ActorRef {
        &self.broker
    }

    /// Address messages to the group should be sent to.
    pub fn address(&self) -> Address {
        self.broker.address()
    }

    /// Subscribes `member`.
    pub fn join(&self, member: &ActorRef) -> Result<(), Error> {
        self.broker.send((GroupOp::Join(member.address()),))
    }

    /// Unsubscribes `member`.
    pub fn leave(&self, member: &ActorRef) -> Result<(), Error> {
        self.broker.send((GroupOp::Leave(member.address()),))
    }

    /// Publishes an anonymous message to all subscribers.
    pub fn send(&self, payload: impl IntoPayload) -> Result<(), Error> {
        self.broker.send(payload)
    }
}

/// Spawns the broker actor of a local group.
///
/// The subscriber set is shared between the two handlers of the broker
/// behavior; only the broker's own quantum ever touches it.
pub(crate) fn spawn_broker(system: &ActorSystem, name: String) -> ActorRef {
    system.spawn_with(false, move |_ctx| broker_behavior(name))
}

/// Behavior of a group broker: join/leave bookkeeping plus fan-out of
/// every other user message to the current subscribers.
pub(crate) fn broker_behavior(name: String) -> Behavior {
    let subscribers = Arc::new(parking_lot::Mutex::new(HashSet::<Address>::new()));
    let members = subscribers.clone();
    let forward_name = name.clone();
    Behavior::new()
        .on::<(GroupOp,), _>(move |_ctx, payload| match payload.get::<GroupOp>(0) {
            Some(GroupOp::Join(member)) => {
                debug!("Group {}: {} joined.", name, member);
                members.lock().insert(*member);
            }
            Some(GroupOp::Leave(member)) => {
                debug!("Group {}: {} left.", name, member);
                members.lock().remove(member);
            }
            None => {}
        })
        .catch_all(move |ctx, envelope| {
            if !envelope.content.is_user() {
                return HandlerOutcome::Dropped;
            }
            let targets: Vec<Address> = subscribers.lock().iter().copied().collect();
            debug!(
                "Group {}: forwarding to {} subscribers.",
                forward_name,
                targets.len()
            );
            forward_to_subscribers(ctx.system(), envelope, &targets);
            HandlerOutcome::Handled
        })
}

/// Re-delivers `envelope` to every subscriber, preserving the original
/// sender and request id.
pub(crate) fn forward_to_subscribers(
    system: &ActorSystem,
    envelope: &Envelope,
    subscribers: &[Address],
) {
    for subscriber in subscribers {
        system.deliver(Arc::new(Envelope {
            sender: envelope.sender,
            receiver: *subscriber,
            mid: envelope.mid,
            content: envelope.content.clone(),
        }));
    }
}
