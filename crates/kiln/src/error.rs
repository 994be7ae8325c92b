//! Error types reported by the engine.

use std::{io, path::PathBuf, sync::Arc};

use crate::config::Config;

/// The error type returned by [`Engine`](crate::Engine) operations.
///
/// Structural errors (`NoRuleForKey`, `CyclicDependency`,
/// `TaskProtocolViolation`, `DuplicateRule`, `InvalidAttachState`) are never
/// retried. A [`TaskFailed`](Error::TaskFailed) error is reported for the key
/// whose task failed and for every key that transitively depended on it in
/// the same build.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error<K, E> {
    /// The key has neither a cached result nor a registered rule.
    #[error("no rule registered for key {key:?}")]
    NoRuleForKey {
        /// The key that could not be produced.
        key: K,
    },

    /// A key transitively depends on itself.
    #[error("cyclic dependency detected: {cycle:?}")]
    CyclicDependency {
        /// The keys forming the cycle; the first and last keys are equal.
        cycle: Vec<K>,
    },

    /// A rule was registered for a key that already has one.
    #[error("a rule is already registered for key {key:?}")]
    DuplicateRule {
        /// The key of the rejected rule.
        key: K,
    },

    /// A database was attached at an illegal time.
    #[error("cannot attach a database: {0}")]
    InvalidAttachState(AttachState),

    /// A task broke the lifecycle contract. This is a bug in the rule or task
    /// implementation.
    #[error("task for key {key:?} violated the task protocol: {reason}")]
    TaskProtocolViolation {
        /// The key whose task misbehaved.
        key: K,
        /// What the task did wrong.
        reason: String,
    },

    /// A task could not produce its value.
    #[error("task for key {key:?} failed")]
    TaskFailed {
        /// The key whose task failed.
        key: K,
        /// The error reported by the task.
        #[source]
        source: E,
    },

    /// The attached database failed to load or store a result.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// The [`Error`] type specialized for an engine configuration.
pub type BuildError<C> = Error<<C as Config>::Key, <C as Config>::Error>;

/// Why a database attachment was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttachState {
    /// A database has already been attached to the engine.
    AlreadyAttached,

    /// Rules were added or a build ran before the attachment.
    EngineInUse,
}

impl std::fmt::Display for AttachState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyAttached => {
                f.write_str("a database is already attached")
            }
            Self::EngineInUse => f.write_str(
                "rules were added or a build already ran on this engine",
            ),
        }
    }
}

/// An error raised by a [`Database`](crate::database::Database)
/// implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DatabaseError {
    /// The underlying storage could not be read or written.
    #[error("database I/O failed on {path:?}")]
    Io {
        /// The file the database was accessing.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A stored record could not be decoded.
    #[error("corrupt database record at {path:?}:{line}")]
    Corrupt {
        /// The database file.
        path: PathBuf,
        /// The 1-based line number of the record.
        line: usize,
        /// The decoding error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// A record could not be encoded.
    #[error("failed to encode database record")]
    Encode(#[source] Arc<serde_json::Error>),

    /// A custom backend reported an error.
    #[error("{0}")]
    Backend(String),
}

impl PartialEq for DatabaseError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for DatabaseError {}

/// An error raised when tracing cannot be enabled.
#[derive(Debug, thiserror::Error)]
#[error("failed to open trace destination {path:?}")]
pub struct TraceError {
    /// The requested trace destination.
    pub path: PathBuf,
    /// The I/O error.
    #[source]
    pub source: io::Error,
}
