// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Timer
//!
//! A dedicated cooperative entity that owns a sorted multimap of
//! `delivery instant → pending message`. It sleeps until the next
//! instant on a monotonic clock and enqueues due messages into their
//! target mailboxes. Behavior timeouts and `delay_send` both go through
//! here; firings within one resolution window are coalesced.

use crate::envelope::Envelope;
use crate::system::{ActorSystem, SystemInner};

use tokio::sync::mpsc;
use tracing::debug;

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::Instant;

enum TimerCmd {
    Schedule { at: Instant, envelope: Arc<Envelope> },
    Stop,
}

/// Handle to the timer entity.
pub struct Timer {
    tx: mpsc::UnboundedSender<TimerCmd>,
}

impl Timer {
    /// Starts the timer task on the given runtime.
    pub(crate) fn start(
        resolution: Duration,
        handle: &tokio::runtime::Handle,
        system: Weak<SystemInner>,
    ) -> Timer {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(run(resolution, rx, system));
        Timer { tx }
    }

    /// Schedules `envelope` for delivery after `delay`.
    pub fn schedule(&self, delay: Duration, envelope: Arc<Envelope>) {
        let at = Instant::now() + delay;
        // A closed channel means the system is shutting down; the
        // delivery is moot then.
        let _ = self.tx.send(TimerCmd::Schedule { at, envelope });
    }

    /// Stops the timer; queued deliveries are discarded.
    pub(crate) fn stop(&self) {
        let _ = self.tx.send(TimerCmd::Stop);
    }
}

async fn run(
    resolution: Duration,
    mut rx: mpsc::UnboundedReceiver<TimerCmd>,
    system: Weak<SystemInner>,
) {
    // The u64 suffix makes equal instants distinct map keys.
    let mut queue: BTreeMap<(Instant, u64), Arc<Envelope>> = BTreeMap::new();
    let mut seq: u64 = 0;

    loop {
        let next = queue.keys().next().map(|(at, _)| *at);
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(TimerCmd::Schedule { at, envelope }) => {
                    seq += 1;
                    queue.insert((at, seq), envelope);
                }
                Some(TimerCmd::Stop) | None => {
                    debug!("Timer stopped with {} pending deliveries.", queue.len());
                    return;
                }
            },
            _ = sleep_until_opt(next) => {
                let now = Instant::now() + resolution;
                while let Some(entry) = queue.first_entry() {
                    if entry.key().0 > now {
                        break;
                    }
                    let envelope = entry.remove();
                    let Some(inner) = system.upgrade() else { return };
                    ActorSystem::from_inner(inner).deliver(envelope);
                }
            }
        }
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending::<()>().await,
    }
}
