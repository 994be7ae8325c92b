use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use fxhash::FxBuildHasher;

use crate::{
    config::Config,
    database::in_memory::InMemoryDatabase,
    engine::{Engine, in_flight::Claim, timestamp::Timestamp},
    error::{AttachState, Error},
    rule::Rule,
    task::{FnTask, InputId, Inputs, Task},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TestConfig;

impl Config for TestConfig {
    type Key = &'static str;
    type Value = i64;
    type Error = std::fmt::Error;
    type BuildHasher = FxBuildHasher;

    fn worker_count() -> usize { 2 }
}

static_assertions::assert_impl_all!(Engine<TestConfig>: Send, Sync);

/// Adds up the values of its inputs.
pub struct Sum {
    inputs: Vec<&'static str>,
    total: i64,
}

impl Task<TestConfig> for Sum {
    fn start(&mut self, inputs: &mut Inputs<TestConfig>) {
        for (index, key) in self.inputs.iter().enumerate() {
            inputs.needs_input(*key, index);
        }
    }

    fn provide_value(
        &mut self,
        _: &mut Inputs<TestConfig>,
        _: InputId,
        value: &i64,
    ) {
        self.total += value;
    }

    fn finish(self: Box<Self>) -> Result<i64, std::fmt::Error> {
        Ok(self.total)
    }
}

fn constant(
    key: &'static str,
    value: i64,
    runs: &Arc<AtomicUsize>,
) -> Rule<TestConfig> {
    let runs = runs.clone();

    Rule::new(key, move |engine| {
        let runs = runs.clone();

        engine.register_task(FnTask::new("constant", move || {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }))
    })
}

fn sum(key: &'static str, inputs: &[&'static str]) -> Rule<TestConfig> {
    let inputs = inputs.to_vec();

    Rule::new(key, move |engine| {
        engine.register_task(Sum { inputs: inputs.clone(), total: 0 })
    })
}

#[tokio::test]
async fn diamond_resolves_shared_leaf_once() {
    let engine = Arc::new(Engine::<TestConfig>::new());
    let runs = Arc::new(AtomicUsize::new(0));

    engine.add_rule(constant("leaf", 5, &runs)).unwrap();
    engine.add_rule(sum("left", &["leaf"])).unwrap();
    engine.add_rule(sum("right", &["leaf"])).unwrap();
    engine.add_rule(sum("top", &["left", "right"])).unwrap();

    assert_eq!(engine.build("top").await, Ok(10));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let top = engine.cached_result(&"top").unwrap();
    assert_eq!(top.dependencies(), &["left", "right"]);
    assert_eq!(top.computed_at(), Timestamp::new(1));
    assert_eq!(top.built_at(), Timestamp::new(1));
}

#[tokio::test]
async fn every_build_starts_a_new_generation() {
    let engine = Arc::new(Engine::<TestConfig>::new());
    let runs = Arc::new(AtomicUsize::new(0));

    engine.add_rule(constant("leaf", 1, &runs)).unwrap();

    assert_eq!(engine.current_timestamp(), Timestamp::ZERO);

    engine.build("leaf").await.unwrap();
    engine.build("leaf").await.unwrap();

    // no validity check, so the leaf reruns in every build
    assert_eq!(engine.current_timestamp(), Timestamp::new(2));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn valid_result_is_confirmed_without_rerunning() {
    let engine = Arc::new(Engine::<TestConfig>::new());
    let runs = Arc::new(AtomicUsize::new(0));

    engine
        .add_rule(constant("leaf", 3, &runs).with_validity(|_, _| true))
        .unwrap();

    engine.build("leaf").await.unwrap();
    assert_eq!(engine.build("leaf").await, Ok(3));

    let leaf = engine.cached_result(&"leaf").unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(leaf.computed_at(), Timestamp::new(1));
    assert_eq!(leaf.built_at(), Timestamp::new(2));
}

#[tokio::test]
async fn self_dependency_is_a_cycle() {
    let engine = Arc::new(Engine::<TestConfig>::new());

    engine.add_rule(sum("loop", &["loop"])).unwrap();

    assert_eq!(
        engine.build("loop").await,
        Err(Error::CyclicDependency { cycle: vec!["loop", "loop"] })
    );
    assert!(engine.cached_result(&"loop").is_none());
}

#[tokio::test]
async fn attach_is_rejected_once_rules_exist() {
    let engine = Engine::<TestConfig>::new();
    let runs = Arc::new(AtomicUsize::new(0));

    engine.add_rule(constant("leaf", 1, &runs)).unwrap();

    assert_eq!(
        engine.attach_db(InMemoryDatabase::new()),
        Err(Error::InvalidAttachState(AttachState::EngineInUse))
    );
}

#[tokio::test]
async fn waiter_takes_over_from_an_aborted_owner() {
    let engine = Arc::new(Engine::<TestConfig>::new());
    let runs = Arc::new(AtomicUsize::new(0));

    engine.add_rule(constant("gate", 4, &runs)).unwrap();
    engine.add_rule(sum("shared", &["gate"])).unwrap();

    let timestamp = engine.timestamp.increment();

    // holding `gate` parks every computation of `shared` on its input
    let Claim::Owner(gate) = engine.in_flight.claim(&"gate") else {
        panic!("nothing else should have claimed the gate yet");
    };

    let owner =
        tokio::spawn(engine.clone().resolve("shared", None, timestamp));
    let waiter =
        tokio::spawn(engine.clone().resolve("shared", None, timestamp));

    for _ in 0..16 {
        tokio::task::yield_now().await;
    }

    owner.abort();
    assert!(owner.await.unwrap_err().is_cancelled());
    assert!(!waiter.is_finished());

    drop(gate);

    assert_eq!(waiter.await.unwrap(), Ok(4));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(engine.cached_result(&"shared").unwrap().built_at(), timestamp);
}

#[test]
fn build_future_is_send() {
    fn assert_send<T: Send>(_: &T) {}

    let engine = Arc::new(Engine::<TestConfig>::new());
    let future = engine.build("anything");

    assert_send(&future);
}
