//! Background compaction scheduling.
//!
//! At most one merge runs per `(tenant, layer)`. Scheduling a key that is
//! already running marks it for a rerun instead of starting a second job.
//! Inside a tokio runtime the merge is spawned, waits `merge_delay`, and runs
//! on the blocking pool; without a runtime it runs inline on the caller.

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::Notify};
use tracing::{debug, warn};

use super::compaction::{CompactionOutcome, Compactor};
use crate::error::Result;

type JobKey = (String, u32);

#[derive(Default)]
struct SchedulerState {
    in_flight: HashSet<JobKey>,
    rerun: HashSet<JobKey>,
}

pub(crate) struct CompactionScheduler {
    compactor: Compactor,
    state: Mutex<SchedulerState>,
    /// Held while merging; merges for one root never overlap.
    merge_lock: Mutex<()>,
    idle: Notify,
}

impl CompactionScheduler {
    pub(crate) fn new(compactor: Compactor) -> Self {
        Self {
            compactor,
            state: Mutex::new(SchedulerState::default()),
            merge_lock: Mutex::new(()),
            idle: Notify::new(),
        }
    }

    /// Requests a merge of `(tenant, layer)` if it is over-full.
    pub(crate) fn schedule(self: &Arc<Self>, tenant: &str, layer: u32) {
        if layer >= self.compactor.config().max_layer {
            return;
        }

        let key = (tenant.to_string(), layer);
        {
            let mut state = self.state.lock();
            if state.in_flight.contains(&key) {
                state.rerun.insert(key);
                return;
            }
            state.in_flight.insert(key.clone());
        }

        match Handle::try_current() {
            Ok(handle) => {
                let scheduler = Arc::clone(self);
                let delay = self.compactor.config().merge_delay;
                handle.spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let worker = Arc::clone(&scheduler);
                    let job = key.clone();
                    let result = tokio::task::spawn_blocking(move || worker.run(&job)).await;
                    if let Err(e) = result {
                        warn!(
                            tenant = %key.0,
                            layer = key.1,
                            error = %e,
                            "Compaction task panicked"
                        );
                        scheduler.finish(&key);
                    }
                });
            },
            Err(_) => self.run(&key),
        }
    }

    /// Runs the merge for `key` until no rerun is pending. A merge that
    /// produced output schedules the next layer while `key` is still in
    /// flight, so waiters never observe a gap.
    fn run(self: &Arc<Self>, key: &JobKey) {
        let (tenant, layer) = (key.0.as_str(), key.1);
        loop {
            let result = {
                let _merging = self.merge_lock.lock();
                self.compactor.compact_layer(tenant, layer)
            };
            match result {
                Ok(outcomes) if !outcomes.is_empty() => self.schedule(tenant, layer + 1),
                Ok(_) => {},
                Err(e) => {
                    warn!(tenant, layer, error = %e, "Layer compaction failed");
                },
            }

            let mut state = self.state.lock();
            if !state.rerun.remove(key) {
                state.in_flight.remove(key);
                break;
            }
            debug!(tenant, layer, "Rerunning compaction for writes during merge");
        }
        self.notify_if_idle();
    }

    fn finish(&self, key: &JobKey) {
        {
            let mut state = self.state.lock();
            state.in_flight.remove(key);
            state.rerun.remove(key);
        }
        self.notify_if_idle();
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    /// Returns true when no merge is scheduled or running.
    pub(crate) fn is_idle(&self) -> bool {
        self.state.lock().in_flight.is_empty()
    }

    /// Waits until no merge is scheduled or running.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Runs every pending merge for `tenant` on the calling thread.
    pub(crate) fn compact_now(&self, tenant: &str) -> Result<Vec<CompactionOutcome>> {
        let _merging = self.merge_lock.lock();
        let mut outcomes = Vec::new();
        for layer in 0..self.compactor.config().max_layer {
            outcomes.extend(self.compactor.compact_layer(tenant, layer)?);
        }
        Ok(outcomes)
    }

    pub(crate) fn needs_compaction(&self, tenant: &str, layer: u32) -> Result<bool> {
        self.compactor.needs_compaction(tenant, layer)
    }
}
