//! Configuration module for customizing the engine's types and behavior.
//!
//! The [`Config`] trait fixes the key, value, and error types a particular
//! build tool plugs into the engine, along with a handful of tuning knobs.
//! Implementations are usually zero-sized marker types.
//!
//! # Example
//!
//! ```rust
//! use fxhash::FxBuildHasher;
//!
//! #[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
//! #[error("compilation failed: {0}")]
//! struct CompileError(String);
//!
//! #[derive(
//!     Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
//! )]
//! struct BuildConfig;
//!
//! impl kiln::Config for BuildConfig {
//!     type Key = String;
//!     type Value = u64;
//!     type Error = CompileError;
//!     type BuildHasher = FxBuildHasher;
//!
//!     // Compile at most four files at a time.
//!     fn worker_count() -> usize { 4 }
//! }
//! ```

use std::{
    fmt::Debug,
    hash::{BuildHasher, Hash},
    sync::OnceLock,
};

/// Configuration trait for the engine.
///
/// # Required Associated Types
///
/// ## `Key`
///
/// The opaque identifier of a producible artifact, such as a file path or a
/// logical target name. The engine only hashes, compares, and clones keys;
/// their `Debug` form appears in logs, traces, and error messages.
///
/// ## `Value`
///
/// The opaque payload computed for a key, such as a content hash or a file
/// signature. The engine clones values to hand them to every dependent.
///
/// ## `Error`
///
/// The error a task may fail with when it cannot produce a value. It must be
/// `Clone` because one failure is reported to every build waiting on the
/// failed key.
///
/// ## `BuildHasher`
///
/// The hasher used by the engine's internal concurrent maps. It does not need
/// to be stable across runs.
///
/// # Thread Safety
///
/// All associated types must be `Send + Sync` since inputs are resolved on
/// multiple worker threads.
pub trait Config:
    Default
    + Debug
    + Clone
    + Copy
    + PartialEq
    + Eq
    + PartialOrd
    + Ord
    + Hash
    + Send
    + Sync
    + 'static
{
    /// The identifier of a producible artifact.
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// The payload computed for a key.
    type Value: Clone + Debug + Send + Sync + 'static;

    /// The error a task reports when it cannot produce a value.
    type Error: std::error::Error + Clone + Send + Sync + 'static;

    /// The standard hasher builder used by the engine.
    type BuildHasher: BuildHasher + Default + Clone + Send + Sync + 'static;

    /// The maximum number of task methods (`start`, `provide_value`,
    /// `finish`) allowed to run at the same time.
    ///
    /// Workers are only held while a task method runs, never while a task
    /// waits for its inputs, so any positive count is deadlock free.
    ///
    /// # Default Value
    ///
    /// The number of logical CPUs reported by
    /// [`std::thread::available_parallelism`].
    #[must_use]
    fn worker_count() -> usize { available_parallelism() }

    /// The number of shards of the engine's concurrent maps. Must be a power
    /// of two.
    ///
    /// # Default Value
    ///
    /// Four shards per logical CPU, rounded up to a power of two.
    #[must_use]
    fn shard_amount() -> usize { default_shard_amount() }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from)
}

pub(crate) fn default_shard_amount() -> usize {
    static SHARD_AMOUNT: OnceLock<usize> = OnceLock::new();
    *SHARD_AMOUNT
        .get_or_init(|| (available_parallelism() * 4).next_power_of_two())
}
