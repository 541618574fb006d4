// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Scheduler
//!
//! Facade over the worker pool that executes actor jobs. With an explicit
//! `workers` count the scheduler owns a dedicated multi-threaded runtime
//! sized accordingly (the M:N work-stealing executor); without one it
//! borrows the ambient runtime of the caller. Either way the unit of work
//! is "an actor with a pending message": the runner processes one message
//! per quantum and yields.
//!
//! Blocking actors are handed to the pool's carrier threads so they may
//! park without starving event-based actors.

use crate::error::Error;

use parking_lot::Mutex;

use std::future::Future;

/// Worker pool facade.
pub struct Scheduler {
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    handle: tokio::runtime::Handle,
}

impl Scheduler {
    /// Creates a scheduler.
    ///
    /// `workers: Some(n)` builds a dedicated pool of `n` worker threads;
    /// `None` uses the runtime the caller is already inside.
    pub fn new(workers: Option<usize>) -> Result<Scheduler, Error> {
        match workers {
            Some(workers) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(workers.max(1))
                    .thread_name("troupe-worker")
                    .enable_all()
                    .build()
                    .map_err(|e| Error::System(e.to_string()))?;
                let handle = runtime.handle().clone();
                Ok(Scheduler { runtime: Mutex::new(Some(runtime)), handle })
            }
            None => {
                let handle = tokio::runtime::Handle::try_current().map_err(|_| {
                    Error::System(
                        "no ambient runtime; set `workers` in the system configuration"
                            .to_owned(),
                    )
                })?;
                Ok(Scheduler { runtime: Mutex::new(None), handle })
            }
        }
    }

    /// Handle to the worker pool.
    pub fn handle(&self) -> &tokio::runtime::Handle {
        &self.handle
    }

    /// Spawns an actor job.
    pub fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(job);
    }

    /// Hands a blocking job to a carrier thread.
    pub fn spawn_blocking<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn_blocking(job);
    }

    /// Releases a dedicated pool without waiting for its threads. Jobs
    /// must have drained beforehand (see the system shutdown sequence).
    pub(crate) fn release(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}
