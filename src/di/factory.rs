//! Asynchronous factory tracking.
//!
//! A factory provider may hand back a future instead of a value. Such futures
//! are queued while providers are registered, spawned once a runtime is
//! driving initialization, and polled for completion through a bounded wait:
//! the registry waits at most `retries * interval` for the in-flight count to
//! reach zero, then carries on with whatever has finished.

use super::provider::{BoxFuture, Instance};
use super::token::ProviderToken;
use crate::error::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type Slot = (usize, ProviderToken);

/// Decrements the in-flight counter when the task ends, including by panic.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct PendingFactories {
    in_flight: Arc<AtomicUsize>,
    completed: Arc<DashMap<Slot, Result<Instance>>>,
    queued: Vec<(Slot, BoxFuture<Result<Instance>>)>,
}

impl PendingFactories {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueue(
        &mut self,
        module: usize,
        token: ProviderToken,
        computation: BoxFuture<Result<Instance>>,
    ) {
        debug!(provider = %token, "Factory returned a pending value");
        self.queued.push(((module, token), computation));
    }

    /// Spawn every queued computation. Must run inside a tokio runtime.
    pub(crate) fn start(&mut self) {
        for (slot, computation) in self.queued.drain(..) {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let guard = InFlight(Arc::clone(&self.in_flight));
            let completed = Arc::clone(&self.completed);
            tokio::spawn(async move {
                let outcome = computation.await;
                completed.insert(slot, outcome);
                drop(guard);
            });
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn has_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    /// A handle to wait on the in-flight count without borrowing the queue.
    pub(crate) fn gate(&self) -> FactoryGate {
        FactoryGate(Arc::clone(&self.in_flight))
    }

    /// Take every finished computation.
    pub(crate) fn drain_completed(&self) -> Vec<(usize, ProviderToken, Result<Instance>)> {
        let slots: Vec<Slot> = self.completed.iter().map(|entry| entry.key().clone()).collect();
        slots
            .into_iter()
            .filter_map(|slot| self.completed.remove(&slot))
            .map(|((module, token), outcome)| (module, token, outcome))
            .collect()
    }
}

pub(crate) struct FactoryGate(Arc<AtomicUsize>);

impl FactoryGate {
    /// Wait until nothing is in flight or the retry budget runs out.
    ///
    /// Returns `false` when the budget ran out first; that is not an error,
    /// unfinished factories simply stay unresolved.
    pub(crate) async fn wait(self, interval: Duration, retries: u32) -> bool {
        for _ in 0..retries {
            if self.0.load(Ordering::SeqCst) == 0 {
                return true;
            }
            tokio::time::sleep(interval).await;
        }
        let remaining = self.0.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!(
                remaining,
                waited_ms = interval.as_millis() as u64 * u64::from(retries),
                "Pending factories did not settle in time, continuing"
            );
        }
        remaining == 0
    }
}
