//! The persistence port: durable storage of build results across runs.
//!
//! The engine reads the whole database once, lazily, at the start of the
//! first build after [`attach_db`](crate::Engine::attach_db), and writes every
//! committed result through to it. The engine never deletes results.
//!
//! Two implementations ship with the crate:
//!
//! - [`in_memory::InMemoryDatabase`]: a shared in-process map, useful for
//!   tests and for handing results from one engine to the next.
//! - [`file::FileDatabase`]: an append-only JSON-lines log on disk.

use std::collections::HashMap;

use crate::{
    config::Config, engine::result_store::BuildResult, error::DatabaseError,
};

pub mod file;
pub mod in_memory;

/// A database the engine persists its results to.
///
/// Implementations are called from the engine's worker threads; `store` is
/// called for one key at a time and must make the whole result durable or
/// fail without a partial write.
pub trait Database<C: Config>: Send + Sync + 'static {
    /// Loads every stored result.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored results cannot be read or decoded.
    fn load(&self) -> Result<HashMap<C::Key, BuildResult<C>>, DatabaseError>;

    /// Stores the result committed for `key`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the result cannot be written.
    fn store(
        &self,
        key: &C::Key,
        result: &BuildResult<C>,
    ) -> Result<(), DatabaseError>;
}
