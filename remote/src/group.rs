// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Remote groups
//!
//! A remote group mirrors a group living on another node. The server
//! publishes a *group nameserver* actor; a client resolves the group's
//! broker address through it and installs two local helpers:
//!
//! - the *relay* is the local face of the group: it tracks local
//!   subscribers and forwards local publishes to the remote broker;
//! - the *uplink* joins the remote broker on behalf of this node and
//!   re-broadcasts everything the broker sends to the local subscribers.
//!
//! The relay joins the remote group when the first local subscriber
//! arrives and leaves when the last one goes, so an idle client node
//! costs the server nothing.

use crate::error::Error;
use crate::middleman::Middleman;

use troupe_core::{Address, Behavior, Envelope, Group, GroupOp, HandlerOutcome};

use parking_lot::Mutex;
use tracing::debug;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// How long a client waits for the nameserver to answer.
const NAMESERVER_TIMEOUT: Duration = Duration::from_secs(5);

impl Middleman {
    /// Publishes this system's group directory on `port`.
    ///
    /// Remote nodes resolve brokers through the returned nameserver with
    /// [`Middleman::remote_group`]. Returns the bound port.
    pub async fn publish_groups(&self, port: u16, host: Option<&str>) -> Result<u16, Error> {
        let system = self.system().clone();
        let nameserver = system.clone().spawn_service(move |_ctx| {
            let system = system.clone();
            Behavior::new().on::<(String,), _>(move |ctx, payload| {
                if let Some(name) = payload.get::<String>(0) {
                    let group = system.group(name);
                    debug!("Nameserver resolving group '{}'.", name);
                    let _ = ctx.reply((group.address(),));
                }
            })
        });
        self.publish(&nameserver, port, host).await
    }

    /// Joins the group `module:name` living on `host:port`.
    ///
    /// The returned handle behaves like a local group; subscribers are
    /// local actors, messages flow through the remote broker.
    pub async fn remote_group(
        &self,
        module: &str,
        name: &str,
        host: &str,
        port: u16,
    ) -> Result<Group, Error> {
        let key = format!("{}:{}", module, name);
        let nameserver = self.remote_actor(host, port).await?;
        let response = nameserver
            .request((key.clone(),), Some(NAMESERVER_TIMEOUT))
            .receive()
            .await?;
        let broker = *response
            .get::<Address>(0)
            .ok_or_else(|| Error::Protocol("malformed nameserver response".to_owned()))?;
        debug!("Remote group '{}' has broker {}.", key, broker);

        let system = self.system();
        let subscribers = Arc::new(Mutex::new(HashSet::<Address>::new()));

        // Receives broadcasts from the remote broker and re-delivers them
        // to the local subscribers.
        let downstream = subscribers.clone();
        let uplink = system.spawn_service(move |_ctx| {
            Behavior::new().catch_all(move |ctx, envelope| {
                if !envelope.content.is_user() {
                    return HandlerOutcome::Dropped;
                }
                let targets: Vec<Address> = downstream.lock().iter().copied().collect();
                for target in targets {
                    ctx.system().deliver(Arc::new(Envelope {
                        sender: envelope.sender,
                        receiver: target,
                        mid: envelope.mid,
                        content: envelope.content.clone(),
                    }));
                }
                HandlerOutcome::Handled
            })
        });
        let uplink_addr = uplink.address();

        // The local face of the group: membership bookkeeping plus
        // forwarding of local publishes to the remote broker.
        let members = subscribers.clone();
        let relay = system.spawn_service(move |_ctx| {
            Behavior::new()
                .on::<(GroupOp,), _>(move |ctx, payload| match payload.get::<GroupOp>(0) {
                    Some(GroupOp::Join(member)) => {
                        let mut members = members.lock();
                        members.insert(*member);
                        if members.len() == 1 {
                            // First local subscriber: join the remote group.
                            let _ = ctx.send_to(broker, (GroupOp::Join(uplink_addr),));
                        }
                    }
                    Some(GroupOp::Leave(member)) => {
                        let mut members = members.lock();
                        members.remove(member);
                        if members.is_empty() {
                            let _ = ctx.send_to(broker, (GroupOp::Leave(uplink_addr),));
                        }
                    }
                    None => {}
                })
                .catch_all(move |ctx, envelope| {
                    if !envelope.content.is_user() {
                        return HandlerOutcome::Dropped;
                    }
                    // Publishes go through the remote broker, which is the
                    // ordering authority for the whole group.
                    ctx.system().deliver(Arc::new(Envelope {
                        sender: envelope.sender,
                        receiver: broker,
                        mid: envelope.mid,
                        content: envelope.content.clone(),
                    }));
                    HandlerOutcome::Handled
                })
        });

        Ok(Group::new(key, relay))
    }
}
