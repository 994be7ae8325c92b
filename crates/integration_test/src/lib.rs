//! Common test utilities and shared rule/task definitions for kiln
//! integration tests.
//!
//! Keys are strings and values are integers. A [`Tracker`] shared by the
//! fixtures records which tasks started and finished, and a [`Sources`] map
//! stands in for the files of a real build: leaf rules read their value from
//! it and consider a cached value valid while the source is unchanged.

#![allow(missing_docs)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::missing_panics_doc)]

use std::{sync::Arc, time::Duration};

use fxhash::{FxBuildHasher, FxHashMap};
use kiln::{Config, Engine, FnTask, InputId, Inputs, Rule, Task};
use parking_lot::Mutex;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TestError {
    #[error("task for `{0}` failed on purpose")]
    Failed(String),

    #[error("source `{0}` is missing")]
    MissingSource(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TestConfig;

impl Config for TestConfig {
    type Key = String;
    type Value = i64;
    type Error = TestError;
    type BuildHasher = FxBuildHasher;

    fn worker_count() -> usize { 4 }
}

/// A configuration allowing a single task method to run at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SingleWorkerConfig;

impl Config for SingleWorkerConfig {
    type Key = String;
    type Value = i64;
    type Error = TestError;
    type BuildHasher = FxBuildHasher;

    fn worker_count() -> usize { 1 }
}

/// The configurations the fixtures work with.
pub trait FixtureConfig:
    Config<Key = String, Value = i64, Error = TestError>
{
}

impl<C: Config<Key = String, Value = i64, Error = TestError>> FixtureConfig
    for C
{
}

pub fn key(name: &str) -> String { name.to_string() }

pub fn create_test_engine<C: Config>() -> Arc<Engine<C>> {
    Arc::new(Engine::new())
}

// ============================================================================
// Bookkeeping
// ============================================================================

/// Records the lifecycle of every task created by the fixtures.
#[derive(Debug, Default)]
pub struct Tracker {
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
}

impl Tracker {
    pub fn new() -> Arc<Self> { Arc::default() }

    fn start(&self, key: &str) { self.started.lock().push(key.to_string()); }

    fn finish(&self, key: &str) { self.finished.lock().push(key.to_string()); }

    /// How many tasks were created for `key`.
    pub fn runs(&self, key: &str) -> usize {
        self.started.lock().iter().filter(|started| *started == key).count()
    }

    /// How many tasks were created in total.
    pub fn total_runs(&self) -> usize { self.started.lock().len() }

    /// Whether a task for `key` reached `finish`.
    pub fn finished(&self, key: &str) -> bool {
        self.finished.lock().iter().any(|finished| finished == key)
    }

    /// The keys whose task reached `finish`, in order.
    pub fn finish_order(&self) -> Vec<String> { self.finished.lock().clone() }

    pub fn reset(&self) {
        self.started.lock().clear();
        self.finished.lock().clear();
    }
}

/// The mutable inputs of a build, such as the contents of source files.
#[derive(Debug, Default)]
pub struct Sources {
    values: Mutex<FxHashMap<String, i64>>,
}

impl Sources {
    pub fn new() -> Arc<Self> { Arc::default() }

    pub fn set(&self, key: &str, value: i64) {
        self.values.lock().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.values.lock().get(key).copied()
    }
}

// ============================================================================
// Leaf Rules
// ============================================================================

/// A leaf producing `value`, recomputed in every build.
pub fn constant<C: FixtureConfig>(
    name: &str,
    value: i64,
    tracker: &Arc<Tracker>,
) -> Rule<C> {
    let tracker = tracker.clone();
    let name = name.to_string();

    Rule::new(name.clone(), move |engine| {
        let tracker = tracker.clone();
        let name = name.clone();

        engine.register_task(FnTask::new("constant", move || {
            tracker.start(&name);
            tracker.finish(&name);
            Ok(value)
        }))
    })
}

/// A leaf reading its value from `sources`. The cached value stays valid
/// while the source is unchanged.
pub fn source<C: FixtureConfig>(
    name: &str,
    sources: &Arc<Sources>,
    tracker: &Arc<Tracker>,
) -> Rule<C> {
    let read_sources = sources.clone();
    let check_sources = sources.clone();
    let tracker = tracker.clone();
    let name = name.to_string();
    let check_name = name.clone();

    Rule::new(name.clone(), move |engine| {
        let sources = read_sources.clone();
        let tracker = tracker.clone();
        let name = name.clone();

        engine.register_task(FnTask::new("source", move || {
            tracker.start(&name);

            let value = sources
                .get(&name)
                .ok_or_else(|| TestError::MissingSource(name.clone()));

            if value.is_ok() {
                tracker.finish(&name);
            }

            value
        }))
    })
    .with_validity(move |_, value| {
        check_sources.get(&check_name) == Some(*value)
    })
}

/// A leaf that always fails.
pub fn failing<C: FixtureConfig>(
    name: &str,
    tracker: &Arc<Tracker>,
) -> Rule<C> {
    let tracker = tracker.clone();
    let name = name.to_string();

    Rule::new(name.clone(), move |engine| {
        let tracker = tracker.clone();
        let name = name.clone();

        engine.register_task(FnTask::new("failing", move || {
            tracker.start(&name);
            Err(TestError::Failed(name))
        }))
    })
}

/// A leaf that blocks its worker for `delay` and then fails.
pub fn failing_after<C: FixtureConfig>(
    name: &str,
    delay: Duration,
    tracker: &Arc<Tracker>,
) -> Rule<C> {
    let tracker = tracker.clone();
    let name = name.to_string();

    Rule::new(name.clone(), move |engine| {
        let tracker = tracker.clone();
        let name = name.clone();

        engine.register_task(FnTask::new("failing_after", move || {
            tracker.start(&name);
            std::thread::sleep(delay);
            Err(TestError::Failed(name))
        }))
    })
}

/// A leaf that blocks its worker for `delay` before producing `value`.
pub fn slow<C: FixtureConfig>(
    name: &str,
    value: i64,
    delay: Duration,
    tracker: &Arc<Tracker>,
) -> Rule<C> {
    let tracker = tracker.clone();
    let name = name.to_string();

    Rule::new(name.clone(), move |engine| {
        let tracker = tracker.clone();
        let name = name.clone();

        engine.register_task(FnTask::new("slow", move || {
            tracker.start(&name);
            std::thread::sleep(delay);
            tracker.finish(&name);
            Ok(value)
        }))
    })
}

// ============================================================================
// Composite Tasks
// ============================================================================

/// Adds up the values of its inputs, requested all at once in `start`.
pub struct Sum {
    name: String,
    inputs: Vec<String>,
    total: i64,
    tracker: Arc<Tracker>,
}

impl<C: FixtureConfig> Task<C> for Sum {
    fn start(&mut self, inputs: &mut Inputs<C>) {
        self.tracker.start(&self.name);

        for (index, input) in self.inputs.iter().enumerate() {
            inputs.needs_input(input.clone(), index);
        }
    }

    fn provide_value(&mut self, _: &mut Inputs<C>, _: InputId, value: &i64) {
        self.total += value;
    }

    fn finish(self: Box<Self>) -> Result<i64, TestError> {
        self.tracker.finish(&self.name);
        Ok(self.total)
    }
}

pub fn sum<C: FixtureConfig>(
    name: &str,
    inputs: &[&str],
    tracker: &Arc<Tracker>,
) -> Rule<C> {
    let inputs = inputs.iter().map(ToString::to_string).collect::<Vec<_>>();
    let tracker = tracker.clone();
    let name = name.to_string();

    Rule::new(name.clone(), move |engine| {
        engine.register_task(Sum {
            name: name.clone(),
            inputs: inputs.clone(),
            total: 0,
            tracker: tracker.clone(),
        })
    })
}

/// Doubles the value of its single input.
pub struct Doubled {
    name: String,
    input: String,
    value: Option<i64>,
    tracker: Arc<Tracker>,
}

impl<C: FixtureConfig> Task<C> for Doubled {
    fn start(&mut self, inputs: &mut Inputs<C>) {
        self.tracker.start(&self.name);
        inputs.needs_input(self.input.clone(), 0);
    }

    fn provide_value(&mut self, _: &mut Inputs<C>, _: InputId, value: &i64) {
        self.value = Some(value * 2);
    }

    fn finish(self: Box<Self>) -> Result<i64, TestError> {
        self.tracker.finish(&self.name);
        Ok(self.value.expect("the input should be delivered before finish"))
    }
}

pub fn doubled<C: FixtureConfig>(
    name: &str,
    input: &str,
    tracker: &Arc<Tracker>,
) -> Rule<C> {
    let input = input.to_string();
    let tracker = tracker.clone();
    let name = name.to_string();

    Rule::new(name.clone(), move |engine| {
        engine.register_task(Doubled {
            name: name.clone(),
            input: input.clone(),
            value: None,
            tracker: tracker.clone(),
        })
    })
}

/// Reads a count from `index`, then requests `item-0` up to `item-{count-1}`
/// and adds their values up. The items are only known once the index has
/// been delivered.
pub struct Discover {
    name: String,
    index: String,
    total: i64,
    tracker: Arc<Tracker>,
}

impl<C: FixtureConfig> Task<C> for Discover {
    fn start(&mut self, inputs: &mut Inputs<C>) {
        self.tracker.start(&self.name);
        inputs.needs_input(self.index.clone(), 0);
    }

    fn provide_value(
        &mut self,
        inputs: &mut Inputs<C>,
        input_id: InputId,
        value: &i64,
    ) {
        if input_id == InputId(0) {
            for item in 0..usize::try_from(*value).unwrap_or_default() {
                inputs.needs_input(format!("item-{item}"), item + 1);
            }
        } else {
            self.total += value;
        }
    }

    fn finish(self: Box<Self>) -> Result<i64, TestError> {
        self.tracker.finish(&self.name);
        Ok(self.total)
    }
}

pub fn discover<C: FixtureConfig>(
    name: &str,
    index: &str,
    tracker: &Arc<Tracker>,
) -> Rule<C> {
    let index = index.to_string();
    let tracker = tracker.clone();
    let name = name.to_string();

    Rule::new(name.clone(), move |engine| {
        engine.register_task(Discover {
            name: name.clone(),
            index: index.clone(),
            total: 0,
            tracker: tracker.clone(),
        })
    })
}

/// Like [`sum`], but the inputs are declared by the rule's action on the
/// registered task instead of being requested in `start`.
pub fn declared_sum<C: FixtureConfig>(
    name: &str,
    inputs: &[&str],
    tracker: &Arc<Tracker>,
) -> Rule<C> {
    let inputs = inputs.iter().map(ToString::to_string).collect::<Vec<_>>();
    let tracker = tracker.clone();
    let name = name.to_string();

    Rule::new(name.clone(), move |engine| {
        let mut task = engine.register_task(Sum {
            name: name.clone(),
            inputs: Vec::new(),
            total: 0,
            tracker: tracker.clone(),
        });

        for (index, input) in inputs.iter().enumerate() {
            task.needs_input(input.clone(), index);
        }

        task
    })
}

/// Requests two inputs under the same input id.
pub struct ReusedInputId;

impl<C: FixtureConfig> Task<C> for ReusedInputId {
    fn start(&mut self, inputs: &mut Inputs<C>) {
        inputs.needs_input(key("first"), 7);
        inputs.needs_input(key("second"), 7);
    }

    fn provide_value(&mut self, _: &mut Inputs<C>, _: InputId, _: &i64) {}

    fn finish(self: Box<Self>) -> Result<i64, TestError> { Ok(0) }
}

pub fn reused_input_id<C: FixtureConfig>(name: &str) -> Rule<C> {
    Rule::new(key(name), |engine| engine.register_task(ReusedInputId))
}
