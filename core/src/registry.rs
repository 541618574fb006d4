// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor registry
//!
//! Process-wide directory of local actors by id. The registry holds weak
//! references only; ownership stays with the runner and with user-held
//! references. Entries disappear on the exit transition. A running
//! count with an async barrier supports "wait until all actors are done"
//! in tests and shutdown.

use crate::address::ActorId;
use crate::cell::AbstractActor;

use parking_lot::RwLock;
use tokio::sync::Notify;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Directory of live local actors.
pub struct Registry {
    actors: RwLock<HashMap<ActorId, Weak<dyn AbstractActor>>>,
    running: AtomicUsize,
    done: Notify,
}

impl Default for Registry {
    fn default() -> Self {
        Registry {
            actors: RwLock::new(HashMap::new()),
            running: AtomicUsize::new(0),
            done: Notify::new(),
        }
    }
}

impl Registry {
    /// Inserts an actor. `counted` actors participate in the
    /// all-done barrier; helper entities (request stubs, group brokers)
    /// do not.
    pub fn insert(&self, id: ActorId, actor: Weak<dyn AbstractActor>, counted: bool) {
        self.actors.write().insert(id, actor);
        if counted {
            self.running.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Looks up a live actor.
    pub fn get(&self, id: ActorId) -> Option<Arc<dyn AbstractActor>> {
        self.actors.read().get(&id).and_then(Weak::upgrade)
    }

    /// Removes an actor on its exit transition.
    pub fn remove(&self, id: ActorId, counted: bool) {
        self.actors.write().remove(&id);
        if counted && self.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.done.notify_waiters();
        }
    }

    /// Number of counted running actors.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Live actors at this instant.
    pub fn snapshot(&self) -> Vec<Arc<dyn AbstractActor>> {
        self.actors.read().values().filter_map(Weak::upgrade).collect()
    }

    /// Waits until every counted actor has exited.
    pub async fn await_all_done(&self) {
        loop {
            let notified = self.done.notified();
            if self.running.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
