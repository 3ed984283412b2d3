//! Per-key coalescing of concurrent loads.
//!
//! The first caller for a key becomes the leader: it registers a flight and
//! spawns the work as its own task. Every caller, leader included, then waits
//! on a `watch` channel for the published result. The work runs detached from
//! any caller, so dropping a waiter never cancels the load that others are
//! still waiting on.
//!
//! The result is published before the flight is removed from the table. A
//! caller that joins in between still reads the published value, and a
//! caller that arrives after removal starts a fresh flight.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use secrets_core::{CacheError, CacheResult};
use tokio::sync::watch;
use tracing::{Instrument, Span};

type Slot<T> = Option<CacheResult<T>>;

struct Flight<T> {
    id: u64,
    rx: watch::Receiver<Slot<T>>,
}

/// Removes its flight from the table when the work task ends, whether the
/// task finished normally or panicked.
struct FlightGuard<T> {
    flights: Arc<DashMap<String, Flight<T>>>,
    key: String,
    id: u64,
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        self.flights.remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}

/// Table of in-flight loads, at most one per key.
pub struct SingleFlight<T> {
    flights: Arc<DashMap<String, Flight<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a flight for `key` is already running, in
    /// which case wait for that flight's result instead.
    ///
    /// `work` is only called by the leader. Must be called from within a
    /// tokio runtime.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let mut leader = None;
        let rx = match self.flights.entry(key.to_string()) {
            Entry::Occupied(existing) => existing.get().rx.clone(),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                vacant.insert(Flight { id, rx: rx.clone() });
                leader = Some((id, tx));
                rx
            }
        };

        if let Some((id, tx)) = leader {
            let guard = FlightGuard {
                flights: Arc::clone(&self.flights),
                key: key.to_string(),
                id,
            };
            let load = work();
            // The load outlives this caller, but keeps its span for logs and trace context.
            let span = Span::current();
            tokio::spawn(
                async move {
                    let result = load.await;
                    let _ = tx.send(Some(result));
                    drop(guard);
                }
                .instrument(span),
            );
        }

        Self::wait(key, rx).await
    }

    async fn wait(key: &str, mut rx: watch::Receiver<Slot<T>>) -> CacheResult<T> {
        let published = rx
            .wait_for(Option::is_some)
            .await
            .map(|slot| slot.clone())
            .ok()
            .flatten();
        published.unwrap_or_else(|| {
            Err(CacheError::FlightAborted {
                key: key.to_string(),
            })
        })
    }

    /// Number of keys with a load currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.flights.contains_key(key)
    }
}
