//! # Per-Key Single-Flight Coordination
//!
//! Two small primitives keyed by cache key:
//!
//! - [`SingleFlight`]: the first caller for a key becomes the leader and runs
//!   the work; everyone who arrives while it runs joins and receives a clone of
//!   the leader's result, errors included.
//! - [`KeyedLocks`]: an async mutex per key, so a forced refresh and a miss
//!   load of the same key never write concurrently.
//!
//! Both keep their per-key state in a map, create it on demand and drop it as
//! soon as nobody holds it, so unrelated keys never wait on each other and the
//! maps only ever contain keys that are currently busy.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, OwnedMutexGuard};

/// How a caller took part in a flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// Ran the work itself
    Leader,
    /// Received the result of another caller's work
    Follower,
}

/// Deduplicates concurrent work per key.
pub struct SingleFlight<V> {
    calls: Mutex<HashMap<String, watch::Receiver<Option<V>>>>,
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

/// Removes the leader's map entry, also when the leader is cancelled
struct CallCleanup<'a, V> {
    calls: &'a Mutex<HashMap<String, watch::Receiver<Option<V>>>>,
    key: &'a str,
}

impl<V> Drop for CallCleanup<'_, V> {
    fn drop(&mut self) {
        self.calls.lock().remove(self.key);
    }
}

impl<V: Clone> SingleFlight<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a run is already in flight, in which case
    /// wait for that run and share its result.
    ///
    /// If the leader is dropped before finishing, its followers race to become
    /// the next leader.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (V, FlightRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let sender = loop {
            let mut receiver = {
                let mut calls = self.calls.lock();
                match calls.get(key) {
                    Some(receiver) => receiver.clone(),
                    None => {
                        let (sender, receiver) = watch::channel(None);
                        calls.insert(key.to_string(), receiver);
                        break sender;
                    }
                }
            };

            let published = match receiver.wait_for(Option::is_some).await {
                Ok(published) => published.as_ref().cloned(),
                Err(_) => None,
            };
            if let Some(value) = published {
                return (value, FlightRole::Follower);
            }
        };

        let cleanup = CallCleanup {
            calls: &self.calls,
            key,
        };
        let value = work().await;
        // publish before unregistering so late joiners still see the result
        let _ = sender.send(Some(value.clone()));
        drop(cleanup);

        (value, FlightRole::Leader)
    }

    /// Number of keys with work in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

/// One async mutex per key, reference counted through the map.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Holds the lock for one key; releases it and prunes the map on drop.
pub struct KeyLockGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> KeyLockGuard<'_> {
        let mutex = {
            let mut locks = self.locks.lock();
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        let mut held = KeyLockGuard {
            owner: self,
            key: key.to_string(),
            guard: None,
        };
        held.guard = Some(mutex.lock_owned().await);
        held
    }

    /// Number of keys currently locked or waited on
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        // hold the map lock so nobody can clone the mutex between release and prune
        let mut locks = self.owner.locks.lock();
        drop(self.guard.take());
        if locks
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.key);
        }
    }
}
