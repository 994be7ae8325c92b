//! # kiln - a demand-driven incremental build engine
//!
//! kiln produces the value of a requested key by running the task of the
//! key's rule, building every input the task asks for first. Tasks discover
//! their inputs while they run: a task may request further inputs after
//! seeing the values of earlier ones. Every result is cached together with
//! the dependencies it was computed from, so later builds only rerun the
//! tasks whose cached value is no longer valid.
//!
//! Typical use cases include:
//! - Build systems whose targets are files, libraries, or logical steps
//! - Code generators and asset pipelines with data-dependent inputs
//! - Any dependency graph that is only known once its nodes are evaluated
//!
//! ## Key Features
//!
//! - **Dynamic dependencies**: inputs are requested by running tasks, not
//!   declared up front
//! - **At most one computation per key per build**, even when many tasks
//!   request the same key concurrently
//! - **Cycle detection** that reports the offending keys instead of
//!   deadlocking
//! - **Async-first**: independent inputs are built concurrently on tokio,
//!   with a bounded number of task methods running at once
//! - **Persistence**: results are written through to a pluggable
//!   [`Database`] and reloaded by later runs
//! - **Build traces**: every scheduling decision can be recorded and the
//!   dependency graph of a build rebuilt from the trace
//!
//! ## Core Concepts
//!
//! ### Rules and tasks
//!
//! A [`Rule`] is the recipe for one key. Whenever the key must be computed,
//! its action creates a fresh [`Task`], which requests inputs through
//! [`Inputs::needs_input`], receives their values through
//! [`Task::provide_value`], and finally returns the key's value from
//! [`Task::finish`].
//!
//! ### Generations
//!
//! Every call to [`Engine::build`] starts a new generation, labelled with a
//! [`Timestamp`]. A key's [`BuildResult`] remembers when its value was last
//! computed and when it was last confirmed up to date. A cached result is
//! reused when the rule's validity check accepts its value; otherwise the
//! rule's task runs again.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use fxhash::FxBuildHasher;
//! use kiln::{Config, Engine, FnTask, InputId, Inputs, Rule, Task};
//!
//! #[derive(
//!     Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
//! )]
//! struct Example;
//!
//! impl Config for Example {
//!     type Key = &'static str;
//!     type Value = i64;
//!     type Error = std::fmt::Error;
//!     type BuildHasher = FxBuildHasher;
//! }
//!
//! struct Doubled(i64);
//!
//! impl Task<Example> for Doubled {
//!     fn start(&mut self, inputs: &mut Inputs<Example>) {
//!         inputs.needs_input("leaf", 0);
//!     }
//!
//!     fn provide_value(
//!         &mut self,
//!         _: &mut Inputs<Example>,
//!         _: InputId,
//!         value: &i64,
//!     ) {
//!         self.0 = value * 2;
//!     }
//!
//!     fn finish(self: Box<Self>) -> Result<i64, std::fmt::Error> {
//!         Ok(self.0)
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = Arc::new(Engine::<Example>::new());
//!
//! engine
//!     .add_rule(Rule::new("leaf", |engine| {
//!         engine.register_task(FnTask::new("leaf", || Ok(5)))
//!     }))
//!     .unwrap();
//! engine
//!     .add_rule(Rule::new("doubled", |engine| {
//!         engine.register_task(Doubled(0))
//!     }))
//!     .unwrap();
//!
//! assert_eq!(engine.build("doubled").await, Ok(10));
//! # });
//! ```
//!
//! For more scenarios, see the `integration_test` crate.

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod rule;
pub mod task;
pub mod trace;

pub use config::Config;
pub use database::{Database, file::FileDatabase, in_memory::InMemoryDatabase};
pub use engine::{Engine, result_store::BuildResult, timestamp::Timestamp};
pub use error::{AttachState, BuildError, DatabaseError, Error, TraceError};
pub use rule::{Action, Rule, ValidityCheck};
pub use task::{FnTask, InputId, Inputs, RegisteredTask, Task, TaskId};
pub use trace::{
    DependencyGraph, FileTraceSink, MemoryTraceSink, TraceEvent, TraceSink,
};
