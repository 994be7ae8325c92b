//! The cache of the last known result for every key.

use std::sync::{Arc, OnceLock};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::OnceCell;

use crate::{
    config::Config, database::Database, engine::timestamp::Timestamp,
    error::DatabaseError,
};

/// The outcome of the last computation of a key.
///
/// Results are immutable once committed. Confirming a cached result in a
/// later build commits a copy with a newer [`built_at`](Self::built_at).
///
/// # Invariant
///
/// `built_at >= computed_at`.
#[derive(Debug, Clone)]
pub struct BuildResult<C: Config> {
    value: C::Value,
    computed_at: Timestamp,
    built_at: Timestamp,
    dependencies: Arc<[C::Key]>,
}

impl<C: Config> BuildResult<C> {
    /// Creates a result.
    ///
    /// # Panics
    ///
    /// Panics if `built_at` is older than `computed_at`.
    pub fn new(
        value: C::Value,
        computed_at: Timestamp,
        built_at: Timestamp,
        dependencies: impl Into<Arc<[C::Key]>>,
    ) -> Self {
        assert!(
            built_at >= computed_at,
            "a result cannot be built before it was computed ({built_at} < \
             {computed_at})"
        );

        Self { value, computed_at, built_at, dependencies: dependencies.into() }
    }

    /// The last computed value.
    pub const fn value(&self) -> &C::Value { &self.value }

    /// The build in which the value was last recomputed.
    pub const fn computed_at(&self) -> Timestamp { self.computed_at }

    /// The build in which the value was last confirmed up to date.
    pub const fn built_at(&self) -> Timestamp { self.built_at }

    /// The inputs the producing task requested, in request order.
    pub fn dependencies(&self) -> &[C::Key] { &self.dependencies }

    /// Returns the same result confirmed up to date at `timestamp`.
    #[must_use]
    pub(crate) fn confirmed_at(&self, timestamp: Timestamp) -> Self {
        Self::new(
            self.value.clone(),
            self.computed_at,
            timestamp,
            self.dependencies.clone(),
        )
    }
}

pub(crate) struct ResultStore<C: Config> {
    results: DashMap<C::Key, Arc<BuildResult<C>>, C::BuildHasher>,
    database: OnceLock<Arc<dyn Database<C>>>,
    loaded: OnceCell<Option<Timestamp>>,
}

impl<C: Config> ResultStore<C> {
    pub fn new() -> Self {
        Self {
            results: DashMap::with_hasher_and_shard_amount(
                C::BuildHasher::default(),
                C::shard_amount(),
            ),
            database: OnceLock::new(),
            loaded: OnceCell::new(),
        }
    }

    /// Attaches the backing database. Returns `false` if one is already
    /// attached.
    pub fn attach(&self, database: Arc<dyn Database<C>>) -> bool {
        self.database.set(database).is_ok()
    }

    pub fn has_database(&self) -> bool { self.database.get().is_some() }

    /// Populates the store from the attached database the first time it is
    /// called. Returns the newest `built_at` found in the database.
    pub async fn ensure_loaded(
        &self,
    ) -> Result<Option<Timestamp>, DatabaseError> {
        self.loaded
            .get_or_try_init(|| async {
                let Some(database) = self.database.get() else {
                    return Ok(None);
                };

                let records = database.load()?;
                let newest = records.values().map(BuildResult::built_at).max();

                tracing::debug!(
                    results = records.len(),
                    ?newest,
                    "loaded results from database"
                );

                for (key, result) in records {
                    self.results.insert(key, Arc::new(result));
                }

                Ok::<_, DatabaseError>(newest)
            })
            .await
            .copied()
    }

    pub fn get(&self, key: &C::Key) -> Option<Arc<BuildResult<C>>> {
        self.results.get(key).map(|entry| entry.value().clone())
    }

    /// Commits `result` for `key`, writing through to the database first so
    /// the in-memory entry never runs ahead of the persisted one.
    ///
    /// A result confirmed in a newer build than `result` is kept; `result`
    /// is then discarded without touching the database.
    pub fn put(
        &self,
        key: C::Key,
        result: BuildResult<C>,
    ) -> Result<(), DatabaseError> {
        match self.results.entry(key) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().built_at();

                if current > result.built_at() {
                    tracing::debug!(
                        key = ?entry.key(),
                        %current,
                        discarded = %result.built_at(),
                        "newer result already committed"
                    );

                    return Ok(());
                }

                self.persist(entry.key(), &result)?;
                entry.insert(Arc::new(result));
            }

            Entry::Vacant(entry) => {
                self.persist(entry.key(), &result)?;
                entry.insert(Arc::new(result));
            }
        }

        Ok(())
    }

    fn persist(
        &self,
        key: &C::Key,
        result: &BuildResult<C>,
    ) -> Result<(), DatabaseError> {
        match self.database.get() {
            Some(database) => database.store(key, result),
            None => Ok(()),
        }
    }
}
