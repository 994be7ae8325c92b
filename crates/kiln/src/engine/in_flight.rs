//! Per-key in-flight markers coalescing concurrent resolutions of one key.

use std::sync::{Arc, OnceLock};

use dashmap::{DashMap, Entry};
use fxhash::FxHashSet;
use parking_lot::Mutex;
use tokio::sync::{Notify, futures::OwnedNotified};

use crate::{config::Config, error::BuildError};

/// The state of a key being computed in the current build.
pub(crate) struct InFlight<C: Config> {
    key: C::Key,
    notify: Arc<Notify>,
    outcome: OnceLock<Result<C::Value, BuildError<C>>>,
    dependencies: Mutex<Vec<C::Key>>,
}

impl<C: Config> InFlight<C> {
    fn new(key: C::Key) -> Self {
        Self {
            key,
            notify: Arc::new(Notify::new()),
            outcome: OnceLock::new(),
            dependencies: Mutex::new(Vec::new()),
        }
    }

    pub const fn key(&self) -> &C::Key { &self.key }

    pub fn notified_owned(&self) -> OwnedNotified {
        self.notify.clone().notified_owned()
    }

    /// Records that the key's task requested `dependency`.
    pub fn record_dependency(&self, dependency: C::Key) {
        self.dependencies.lock().push(dependency);
    }

    /// The dependencies requested so far, in request order.
    pub fn dependencies(&self) -> Vec<C::Key> {
        self.dependencies.lock().clone()
    }

    /// The outcome of the computation, `None` while it is running or if it
    /// was cancelled.
    pub fn outcome(&self) -> Option<Result<C::Value, BuildError<C>>> {
        self.outcome.get().cloned()
    }
}

pub(crate) struct InFlightTable<C: Config> {
    in_flight: DashMap<C::Key, Arc<InFlight<C>>, C::BuildHasher>,
}

/// The result of trying to claim a key's computation.
pub(crate) enum Claim<'a, C: Config> {
    /// The caller owns the computation and must complete it.
    Owner(InFlightGuard<'a, C>),

    /// Another resolution is computing, or has computed, the key.
    Waiter {
        /// Created while the marker was still registered, so it cannot miss
        /// the owner's notification.
        notified: OwnedNotified,
        in_flight: Arc<InFlight<C>>,
    },
}

impl<C: Config> InFlightTable<C> {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::with_hasher_and_shard_amount(
                C::BuildHasher::default(),
                C::shard_amount(),
            ),
        }
    }

    pub fn claim(&self, key: &C::Key) -> Claim<'_, C> {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let in_flight = entry.get().clone();
                let notified = in_flight.notified_owned();

                Claim::Waiter { notified, in_flight }
            }

            Entry::Vacant(entry) => {
                let in_flight = Arc::new(InFlight::new(key.clone()));
                entry.insert(in_flight.clone());

                Claim::Owner(InFlightGuard {
                    table: self,
                    in_flight,
                    defused: false,
                })
            }
        }
    }

    /// Forgets every marker of the previous build.
    pub fn clear(&self) { self.in_flight.clear(); }

    /// Returns the marker of `key` if its computation is still running.
    fn running(&self, key: &C::Key) -> Option<Arc<InFlight<C>>> {
        self.in_flight
            .get(key)
            .map(|entry| entry.value().clone())
            .filter(|in_flight| in_flight.outcome.get().is_none())
    }

    /// Searches the dependency edges of running computations for a path from
    /// `from` to `target`. Returns the keys along the path, both ends
    /// included.
    pub fn find_path(
        &self,
        from: &Arc<InFlight<C>>,
        target: &C::Key,
    ) -> Option<Vec<C::Key>> {
        let mut visited = FxHashSet::default();
        let mut path = Vec::new();

        self.search(from.clone(), target, &mut visited, &mut path)
            .then_some(path)
    }

    fn search(
        &self,
        current: Arc<InFlight<C>>,
        target: &C::Key,
        visited: &mut FxHashSet<C::Key>,
        path: &mut Vec<C::Key>,
    ) -> bool {
        path.push(current.key.clone());

        if current.key == *target {
            return true;
        }

        if visited.insert(current.key.clone()) {
            for dependency in current.dependencies() {
                let Some(next) = self.running(&dependency) else {
                    continue;
                };

                if self.search(next, target, visited, path) {
                    return true;
                }
            }
        }

        path.pop();
        false
    }
}

/// Ownership of a key's computation.
///
/// Completing the guard publishes the outcome; the marker stays in the table
/// until the end of the build so later requests share it. Dropping the guard
/// without completing it (the computation was cancelled) removes the marker
/// so a waiter can take over.
pub(crate) struct InFlightGuard<'a, C: Config> {
    table: &'a InFlightTable<C>,
    in_flight: Arc<InFlight<C>>,
    defused: bool,
}

impl<C: Config> InFlightGuard<'_, C> {
    pub const fn in_flight(&self) -> &Arc<InFlight<C>> { &self.in_flight }

    /// Publishes the outcome to every waiter.
    pub fn complete(
        mut self,
        outcome: Result<C::Value, BuildError<C>>,
    ) -> Result<C::Value, BuildError<C>> {
        assert!(
            self.in_flight.outcome.set(outcome.clone()).is_ok(),
            "the outcome of an in-flight computation should be set only once"
        );

        self.defused = true;
        self.in_flight.notify.notify_waiters();

        outcome
    }
}

impl<C: Config> Drop for InFlightGuard<'_, C> {
    fn drop(&mut self) {
        if self.defused {
            return;
        }

        // the table may have been cleared by a later build already
        self.table.in_flight.remove_if(self.in_flight.key(), |_, in_flight| {
            Arc::ptr_eq(in_flight, &self.in_flight)
        });

        self.in_flight.notify.notify_waiters();
    }
}
