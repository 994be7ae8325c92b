//! A simple in-memory database implementation.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    config::Config, database::Database, engine::result_store::BuildResult,
    error::DatabaseError,
};

/// An in-memory database.
///
/// Cloning the database yields another handle to the same storage, so an
/// engine attached to one clone sees everything stored through another.
pub struct InMemoryDatabase<C: Config> {
    results: Arc<Mutex<HashMap<C::Key, BuildResult<C>>>>,
}

impl<C: Config> InMemoryDatabase<C> {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self { Self { results: Arc::default() } }

    /// Returns the stored result for `key`.
    #[must_use]
    pub fn get(&self, key: &C::Key) -> Option<BuildResult<C>> {
        self.results.lock().get(key).cloned()
    }

    /// Returns the number of stored results.
    #[must_use]
    pub fn len(&self) -> usize { self.results.lock().len() }

    /// Returns `true` if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.results.lock().is_empty() }
}

impl<C: Config> Default for InMemoryDatabase<C> {
    fn default() -> Self { Self::new() }
}

impl<C: Config> Clone for InMemoryDatabase<C> {
    fn clone(&self) -> Self { Self { results: self.results.clone() } }
}

impl<C: Config> std::fmt::Debug for InMemoryDatabase<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDatabase").field("len", &self.len()).finish()
    }
}

impl<C: Config> Database<C> for InMemoryDatabase<C> {
    fn load(&self) -> Result<HashMap<C::Key, BuildResult<C>>, DatabaseError> {
        Ok(self.results.lock().clone())
    }

    fn store(
        &self,
        key: &C::Key,
        result: &BuildResult<C>,
    ) -> Result<(), DatabaseError> {
        self.results.lock().insert(key.clone(), result.clone());

        Ok(())
    }
}
