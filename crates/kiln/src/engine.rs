//! The build engine: rules, cached results, and the scheduler driving tasks.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Engine<C>                              │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌────────────────────┐  │
//! │  │  Rule Table  │  │   Result Store   │  │  In-flight Table   │  │
//! │  │ key → Rule   │  │ key → BuildResult│  │ key → marker of a  │  │
//! │  └──────────────┘  │ (write-through   │  │ running computation│  │
//! │                    │  to a Database)  │  └────────────────────┘  │
//! │                    └──────────────────┘                          │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌────────────────────┐  │
//! │  │  Timestamp   │  │  Worker permits  │  │   Trace port       │  │
//! │  └──────────────┘  └──────────────────┘  └────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. **Create**: instantiate an `Engine` with your configuration.
//! 2. **Attach**: optionally attach a [`Database`] before anything else.
//! 3. **Register**: add a [`Rule`] for every key the engine must produce.
//! 4. **Build**: wrap the engine in an `Arc` and call [`Engine::build`] as
//!    many times as needed. Every call starts a new generation.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tokio::{
    sync::{Mutex, Semaphore},
    task::JoinSet,
};
use tokio_util::task::TaskTracker;

use crate::{
    config::Config,
    database::Database,
    engine::{
        in_flight::InFlightTable,
        result_store::{BuildResult, ResultStore},
        timestamp::{Timestamp, TimestampManager},
    },
    error::{AttachState, BuildError, Error, TraceError},
    rule::{Rule, RuleTable},
    task::{RegisteredTask, Task, TaskId},
    trace::{FileTraceSink, TraceEvent, TraceSink, Tracer, render},
};

mod in_flight;
pub(crate) mod result_store;
mod scheduler;
pub(crate) mod timestamp;

#[cfg(test)]
mod test;

/// A demand-driven incremental build engine.
///
/// The engine produces the value of a key by running the task created by the
/// key's [`Rule`], building every input the task requests first. Results are
/// cached with the generation they were computed and confirmed in, so a
/// later build only reruns tasks whose cached value its rule rejects.
///
/// # Thread Safety
///
/// The engine is `Send + Sync` and is meant to be shared as an
/// `Arc<Engine<C>>`. Inputs requested together are built concurrently on the
/// tokio runtime, while top-level builds of one engine run one at a time.
pub struct Engine<C: Config> {
    rules: RuleTable<C>,
    results: ResultStore<C>,
    in_flight: InFlightTable<C>,
    timestamp: TimestampManager,
    tracer: Tracer,
    workers: Semaphore,
    subtasks: TaskTracker,
    task_ids: AtomicU64,
    in_use: AtomicBool,
    build_lock: Mutex<()>,
}

impl<C: Config> Engine<C> {
    /// Creates an engine with no rules and no database.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: RuleTable::new(),
            results: ResultStore::new(),
            in_flight: InFlightTable::new(),
            timestamp: TimestampManager::new(),
            tracer: Tracer::default(),
            workers: Semaphore::new(C::worker_count().max(1)),
            subtasks: TaskTracker::new(),
            task_ids: AtomicU64::new(0),
            in_use: AtomicBool::new(false),
            build_lock: Mutex::new(()),
        }
    }

    /// Registers the rule producing `rule.key()`.
    ///
    /// Rules may be added between builds. After the first rule is added a
    /// database can no longer be attached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRule`] if a rule is already registered for
    /// the key; the first registration stays in effect.
    pub fn add_rule(&self, rule: Rule<C>) -> Result<(), BuildError<C>> {
        self.in_use.store(true, Ordering::SeqCst);

        let key = rule.key().clone();
        self.rules.add(rule)?;

        tracing::trace!(?key, rules = self.rules.len(), "rule added");

        Ok(())
    }

    /// Attaches the database results are loaded from and persisted to.
    ///
    /// The database is read once, at the start of the next build, and every
    /// result committed afterwards is written through to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAttachState`] if a database is already
    /// attached, or if a rule was added or a build ran before the call.
    pub fn attach_db(
        &self,
        database: impl Database<C>,
    ) -> Result<(), BuildError<C>> {
        if self.results.has_database() {
            return Err(Error::InvalidAttachState(AttachState::AlreadyAttached));
        }

        if self.in_use.load(Ordering::SeqCst) {
            return Err(Error::InvalidAttachState(AttachState::EngineInUse));
        }

        if !self.results.attach(Arc::new(database)) {
            return Err(Error::InvalidAttachState(AttachState::AlreadyAttached));
        }

        Ok(())
    }

    /// Writes a trace of every following build to the file at `path`, as
    /// JSON lines readable with [`read_trace`](crate::trace::read_trace).
    ///
    /// # Errors
    ///
    /// Returns a [`TraceError`] if the file cannot be created.
    pub fn enable_tracing(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<(), TraceError> {
        let path = path.as_ref();
        let sink = FileTraceSink::create(path).map_err(|source| {
            TraceError { path: path.to_path_buf(), source }
        })?;

        self.set_trace_sink(Arc::new(sink));

        Ok(())
    }

    /// Reports every following build to `sink`, replacing any sink installed
    /// before.
    pub fn set_trace_sink(&self, sink: Arc<dyn TraceSink>) {
        self.tracer.install(sink);
    }

    /// Hands a task to the engine. Rule actions return the registered task.
    pub fn register_task<T: Task<C>>(&self, task: T) -> RegisteredTask<C> {
        let id = TaskId(self.task_ids.fetch_add(1, Ordering::Relaxed));

        RegisteredTask::new(id, Box::new(task))
    }

    /// Returns the result last committed for `key`, if any.
    ///
    /// Results persisted in an attached database are only visible once the
    /// first build has loaded them.
    #[must_use]
    pub fn cached_result(&self, key: &C::Key) -> Option<Arc<BuildResult<C>>> {
        self.results.get(key)
    }

    /// The timestamp of the latest build, [`Timestamp::ZERO`] before the
    /// first one.
    #[must_use]
    pub fn current_timestamp(&self) -> Timestamp {
        self.timestamp.get_current()
    }

    /// Builds `key` and returns its value.
    ///
    /// Every call starts a new generation: each key needed by the build is
    /// resolved at most once, either by confirming its cached result or by
    /// running its rule's task. Concurrent calls on one engine run one after
    /// the other.
    ///
    /// # Errors
    ///
    /// Returns the first error that aborted the build. Results committed
    /// before the failure stay in the cache.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn build(
        self: &Arc<Self>,
        key: C::Key,
    ) -> Result<C::Value, BuildError<C>> {
        let _build = self.build_lock.lock().await;
        self.in_use.store(true, Ordering::SeqCst);

        if let Some(newest) = self.results.ensure_loaded().await? {
            self.timestamp.advance_past(newest);
        }

        let timestamp = self.timestamp.increment();
        self.in_flight.clear();

        tracing::debug!(%timestamp, "build started");
        self.tracer.emit(|| TraceEvent::BuildStarted {
            timestamp,
            key: render(&key),
        });

        let outcome = self.resolve_root(key.clone(), timestamp).await;

        // aborted resolutions may still be inside a task method
        self.subtasks.close();
        self.subtasks.wait().await;
        self.subtasks.reopen();

        self.in_flight.clear();

        self.tracer.emit(|| TraceEvent::BuildEnded {
            timestamp,
            key: render(&key),
            success: outcome.is_ok(),
        });
        self.tracer.flush();

        match &outcome {
            Ok(_) => tracing::debug!(%timestamp, "build succeeded"),
            Err(error) => tracing::debug!(%timestamp, %error, "build failed"),
        }

        outcome
    }
}

impl<C: Config> Engine<C> {
    /// Runs the resolution of the build's root as a task of its own, so a
    /// failing input is noticed as soon as it is reported.
    async fn resolve_root(
        self: &Arc<Self>,
        key: C::Key,
        timestamp: Timestamp,
    ) -> Result<C::Value, BuildError<C>> {
        let mut root = JoinSet::new();

        root.spawn(
            self.subtasks
                .track_future(self.clone().resolve(key, None, timestamp)),
        );

        match root.join_next().await {
            Some(Ok(outcome)) => outcome,

            Some(Err(error)) if error.is_panic() => {
                std::panic::resume_unwind(error.into_panic())
            }

            Some(Err(error)) => unreachable!(
                "the root resolution should only be aborted together with \
                 its build: {error}"
            ),

            None => unreachable!("the root resolution should be spawned"),
        }
    }
}

impl<C: Config> Default for Engine<C> {
    fn default() -> Self { Self::new() }
}

impl<C: Config> std::fmt::Debug for Engine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("rules", &self.rules.len())
            .field("timestamp", &self.timestamp.get_current())
            .field("has_database", &self.results.has_database())
            .finish_non_exhaustive()
    }
}
