//! Single-flight deduplication of concurrent fetches for the same key.

use crate::error::MeteoError;
use crate::key::CacheKey;
use log::{debug, warn};
use std::collections::{hash_map::Entry, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Notify};

type Outcome<T> = Option<Result<T, MeteoError>>;

struct Flight<T> {
    id: u64,
    outcome: watch::Receiver<Outcome<T>>,
}

enum Role<'a, T> {
    Leader(LeaderGuard<'a, T>),
    Follower(watch::Receiver<Outcome<T>>),
}

/// Collapses concurrent requests for one [`CacheKey`] into a single fetch.
///
/// The first caller for a key becomes the leader and runs the fetch; callers
/// arriving while it runs wait for and receive a clone of the leader's
/// outcome. Once the leader finishes, or is dropped, the key's slot is cleared
/// and the next caller starts a new fetch.
pub struct RequestCoordinator<T> {
    flights: Mutex<HashMap<CacheKey, Flight<T>>>,
    next_id: AtomicU64,
    idle: Notify,
}

impl<T> Default for RequestCoordinator<T> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            idle: Notify::new(),
        }
    }
}

impl<T> RequestCoordinator<T>
where
    T: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `fetch` if no fetch for `key` is in flight, otherwise waits for
    /// the one that is.
    ///
    /// # Errors
    ///
    /// Returns whatever the leader's fetch returned, or
    /// [`MeteoError::Cancelled`] to followers if the leader was dropped before
    /// it completed. Followers are never promoted to leader.
    pub async fn fetch_or_wait<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<T, MeteoError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MeteoError>>,
    {
        // Leader election happens in one critical section.
        let role = match self.lock_flights().entry(key.clone()) {
            Entry::Occupied(entry) => Role::Follower(entry.get().outcome.clone()),
            Entry::Vacant(entry) => {
                let (sender, receiver) = watch::channel(None);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                entry.insert(Flight {
                    id,
                    outcome: receiver,
                });
                Role::Leader(LeaderGuard {
                    coordinator: self,
                    key: key.clone(),
                    id,
                    sender,
                })
            }
        };

        match role {
            Role::Leader(guard) => {
                debug!("Leading fetch for key {}", key);
                let result = fetch().await;
                guard.publish(result.clone());
                result
            }
            Role::Follower(mut receiver) => {
                debug!("Waiting on in-flight fetch for key {}", key);
                match receiver.wait_for(Option::is_some).await {
                    Ok(outcome) => outcome
                        .clone()
                        .unwrap_or_else(|| Err(MeteoError::Cancelled(key.clone()))),
                    Err(_) => Err(MeteoError::Cancelled(key.clone())),
                }
            }
        }
    }

    /// Number of keys with a fetch in progress.
    pub fn in_flight(&self) -> usize {
        self.lock_flights().len()
    }

    /// Resolves once no fetch is in flight.
    pub async fn drain(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn lock_flights(&self) -> MutexGuard<'_, HashMap<CacheKey, Flight<T>>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owned by the leader for the duration of its fetch. Dropping it, whether
/// after publishing or because the leader was cancelled, clears the slot.
struct LeaderGuard<'a, T> {
    coordinator: &'a RequestCoordinator<T>,
    key: CacheKey,
    id: u64,
    sender: watch::Sender<Outcome<T>>,
}

impl<T> LeaderGuard<'_, T> {
    fn publish(self, result: Result<T, MeteoError>) {
        self.sender.send_replace(Some(result));
    }
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if self.sender.borrow().is_none() {
            warn!("Fetch for key {} was dropped before completing", self.key);
        }
        let mut flights = self
            .coordinator
            .flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if flights.get(&self.key).is_some_and(|f| f.id == self.id) {
            flights.remove(&self.key);
        }
        if flights.is_empty() {
            self.coordinator.idle.notify_waiters();
        }
    }
}
