//! Delayed, cancellable motor-stop tasks keyed by switch-machine id.
//!
//! Each switch machine has at most one pending stop. Scheduling a new one
//! replaces (and cancels) the previous; [`cancel`](MotorStopScheduler::cancel)
//! drops it outright.
//!
//! Cancellation is a dropped channel sender: each task thread selects between
//! its cancel receiver disconnecting and a `crossbeam_channel::after` timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{after, bounded, select, Sender};
use tracing::{trace, warn};

use crate::switch_machine::SwitchMachineId;

#[derive(Debug)]
struct PendingStop {
    generation: u64,
    // Never sent on; dropping it cancels the task
    _cancel: Sender<()>,
}

#[derive(Debug, Default)]
struct Pending {
    next_generation: u64,
    stops: HashMap<SwitchMachineId, PendingStop>,
}

/// Runs one delayed task per switch machine.
#[derive(Clone, Debug, Default)]
pub struct MotorStopScheduler {
    pending: Arc<Mutex<Pending>>,
}

impl MotorStopScheduler {
    /// Creates a scheduler with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `task` after `delay` unless cancelled or replaced first.
    ///
    /// Any stop already pending for `id` is cancelled.
    pub fn schedule<F>(&self, id: SwitchMachineId, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(0);

        let generation = {
            let mut pending = self.lock();
            pending.next_generation += 1;
            let generation = pending.next_generation;
            let previous = pending.stops.insert(
                id,
                PendingStop {
                    generation,
                    _cancel: cancel_tx,
                },
            );
            if previous.is_some() {
                trace!(%id, "replacing pending motor stop");
            }
            generation
        };

        let pending = Arc::clone(&self.pending);
        let spawned = thread::Builder::new()
            .name(format!("motor-stop-{id}"))
            .spawn(move || {
                select! {
                    recv(cancel_rx) -> _ => {
                        trace!(%id, "motor stop cancelled");
                    }
                    recv(after(delay)) -> _ => {
                        let current = {
                            let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
                            let current = pending
                                .stops
                                .get(&id)
                                .is_some_and(|stop| stop.generation == generation);
                            if current {
                                pending.stops.remove(&id);
                            }
                            current
                        };
                        if current {
                            task();
                        }
                    }
                }
            });

        if let Err(err) = spawned {
            warn!(%id, %err, "failed to spawn motor stop task");
            let mut pending = self.lock();
            if pending
                .stops
                .get(&id)
                .is_some_and(|stop| stop.generation == generation)
            {
                pending.stops.remove(&id);
            }
        }
    }

    /// Cancels the pending stop for `id`. Returns true if one was pending.
    pub fn cancel(&self, id: SwitchMachineId) -> bool {
        self.lock().stops.remove(&id).is_some()
    }

    /// Cancels every pending stop.
    pub fn cancel_all(&self) {
        self.lock().stops.clear();
    }

    /// True if a stop is pending for `id`.
    pub fn is_pending(&self, id: SwitchMachineId) -> bool {
        self.lock().stops.contains_key(&id)
    }

    /// Number of pending stops.
    pub fn pending_count(&self) -> usize {
        self.lock().stops.len()
    }
}
