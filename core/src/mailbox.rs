// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailbox
//!
//! Single-consumer, multi-producer mailbox with two partitions: the
//! *inbox* (newly arrived messages, oldest first) and the *cache*
//! (messages skipped by selective receive, in arrival order). A message is
//! in exactly one partition at any time; only the consumer moves messages
//! between partitions.
//!
//! Wakeups are dual-path: an async [`Notify`] for event-based consumers
//! and a condition variable for blocking actors parked on the mailbox.

use crate::envelope::Envelope;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Result of an enqueue attempt, consumed by the actor state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnqueueStatus {
    /// Accepted, and the consumer was parked waiting for messages.
    Unblocked,
    /// Accepted; the consumer was already runnable.
    Accepted,
    /// Rejected: the actor exited. Pending requests must be bounced.
    Rejected,
}

#[derive(Default)]
struct Inner {
    inbox: VecDeque<Arc<Envelope>>,
    cache: VecDeque<Arc<Envelope>>,
    waiting: bool,
    closed: bool,
}

/// The mailbox of one actor.
pub struct Mailbox {
    inner: Mutex<Inner>,
    readable: Condvar,
    notify: Notify,
}

impl Default for Mailbox {
    fn default() -> Self {
        Mailbox {
            inner: Mutex::new(Inner::default()),
            readable: Condvar::new(),
            notify: Notify::new(),
        }
    }
}

impl Mailbox {
    /// Appends a message to the inbox.
    ///
    /// Many producers may call this concurrently; insertion order is
    /// preserved per producer but unspecified across producers.
    pub fn enqueue(&self, envelope: Arc<Envelope>) -> EnqueueStatus {
        let status = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return EnqueueStatus::Rejected;
            }
            inner.inbox.push_back(envelope);
            if inner.waiting {
                inner.waiting = false;
                EnqueueStatus::Unblocked
            } else {
                EnqueueStatus::Accepted
            }
        };
        self.notify.notify_one();
        self.readable.notify_one();
        status
    }

    /// Removes the oldest inbox message.
    pub fn dequeue(&self) -> Option<Arc<Envelope>> {
        self.inner.lock().inbox.pop_front()
    }

    /// Moves a skipped message to the back of the cache.
    pub fn cache_push(&self, envelope: Arc<Envelope>) {
        self.inner.lock().cache.push_back(envelope);
    }

    /// Takes the whole cache partition for a scan.
    pub fn take_cache(&self) -> VecDeque<Arc<Envelope>> {
        std::mem::take(&mut self.inner.lock().cache)
    }

    /// Puts unconsumed cache messages back, preserving arrival order.
    pub fn restore_cache(&self, mut items: VecDeque<Arc<Envelope>>) {
        if items.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        items.append(&mut inner.cache);
        inner.cache = items;
    }

    /// Number of cached (previously skipped) messages.
    pub fn cached_len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    /// Number of inbox messages.
    pub fn inbox_len(&self) -> usize {
        self.inner.lock().inbox.len()
    }

    /// True once [`Mailbox::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Closes the mailbox and drains both partitions.
    ///
    /// Returns the leftover messages so the caller can bounce pending
    /// requests as error responses. Further enqueues are rejected.
    pub fn close(&self) -> Vec<Arc<Envelope>> {
        let leftovers = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.waiting = false;
            let mut drained: Vec<_> = inner.cache.drain(..).collect();
            drained.extend(inner.inbox.drain(..));
            drained
        };
        self.notify.notify_one();
        self.readable.notify_all();
        leftovers
    }

    /// Parks the async consumer until a message arrives or the mailbox
    /// closes. Returns immediately when the inbox is non-empty.
    pub async fn readable(&self) {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if !inner.inbox.is_empty() || inner.closed {
                    inner.waiting = false;
                    return;
                }
                inner.waiting = true;
            }
            notified.await;
        }
    }

    /// Parks a blocking consumer until a message arrives, the mailbox
    /// closes, or `deadline` passes. Returns `false` on timeout.
    pub fn readable_sync(&self, deadline: Option<Instant>) -> bool {
        let mut inner = self.inner.lock();
        loop {
            if !inner.inbox.is_empty() || inner.closed {
                inner.waiting = false;
                return true;
            }
            inner.waiting = true;
            match deadline {
                Some(deadline) => {
                    if self.readable.wait_until(&mut inner, deadline).timed_out() {
                        inner.waiting = false;
                        return false;
                    }
                }
                None => self.readable.wait(&mut inner),
            }
        }
    }
}
