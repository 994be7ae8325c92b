//! Tests for task failures and their propagation to dependents.

use std::{
    error::Error as _,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use kiln::{Error, FnTask, Rule, Timestamp};
use kiln_integration_test::{
    SingleWorkerConfig, TestConfig, TestError, Tracker, constant,
    create_test_engine, discover, doubled, failing, failing_after, key, slow,
    sum,
};

#[tokio::test]
async fn failure_is_reported_with_the_failing_key() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(failing("bad", &tracker)).unwrap();
    engine.add_rule(doubled("doubled", "bad", &tracker)).unwrap();
    engine.add_rule(doubled("top", "doubled", &tracker)).unwrap();

    let error = engine.build(key("top")).await.unwrap_err();

    assert_eq!(error, Error::TaskFailed {
        key: key("bad"),
        source: TestError::Failed(key("bad")),
    });
    assert_eq!(error.to_string(), "task for key \"bad\" failed");
    assert_eq!(
        error.source().map(ToString::to_string),
        Some("task for `bad` failed on purpose".to_string())
    );
}

#[tokio::test]
async fn dependents_of_a_failure_never_finish() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(failing("bad", &tracker)).unwrap();
    engine.add_rule(doubled("left", "bad", &tracker)).unwrap();
    engine.add_rule(doubled("right", "bad", &tracker)).unwrap();
    engine.add_rule(sum("top", &["left", "right"], &tracker)).unwrap();

    assert!(engine.build(key("top")).await.is_err());

    assert_eq!(tracker.runs("bad"), 1);
    assert!(!tracker.finished("left"));
    assert!(!tracker.finished("right"));
    assert!(!tracker.finished("top"));

    for name in ["bad", "left", "right", "top"] {
        assert!(engine.cached_result(&key(name)).is_none());
    }
}

#[tokio::test]
async fn siblings_committed_before_the_failure_stay_cached() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(constant("good", 1, &tracker)).unwrap();
    engine.add_rule(failing("bad", &tracker)).unwrap();
    engine.add_rule(sum("top", &["good", "bad"], &tracker)).unwrap();

    assert!(engine.build(key("top")).await.is_err());

    // inputs are resolved in request order on the current-thread runtime
    let good = engine.cached_result(&key("good")).unwrap();
    assert_eq!(*good.value(), 1);
    assert!(engine.cached_result(&key("top")).is_none());
}

#[tokio::test]
async fn failed_build_does_not_poison_later_builds() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(failing("bad", &tracker)).unwrap();
    engine.add_rule(constant("good", 4, &tracker)).unwrap();
    engine.add_rule(doubled("doubled", "good", &tracker)).unwrap();

    assert!(engine.build(key("bad")).await.is_err());
    assert_eq!(engine.build(key("doubled")).await, Ok(8));
    assert!(engine.build(key("bad")).await.is_err());

    assert_eq!(tracker.runs("bad"), 2);
}

#[tokio::test]
async fn siblings_of_a_failure_are_cancelled_before_their_inputs_start() {
    let engine = create_test_engine::<SingleWorkerConfig>();
    let tracker = Tracker::new();

    let mut inputs = vec![key("bad")];

    engine.add_rule(failing("bad", &tracker)).unwrap();
    for index in 0..5 {
        let middle = format!("middle-{index}");
        let leaf = format!("leaf-{index}");

        engine.add_rule(constant(&leaf, 1, &tracker)).unwrap();
        engine.add_rule(doubled(&middle, &leaf, &tracker)).unwrap();
        inputs.push(middle);
    }

    let inputs = inputs.iter().map(String::as_str).collect::<Vec<_>>();
    engine.add_rule(sum("root", &inputs, &tracker)).unwrap();

    assert!(engine.build(key("root")).await.is_err());

    for index in 0..5 {
        assert_eq!(tracker.runs(&format!("leaf-{index}")), 0);
        assert!(!tracker.finished(&format!("middle-{index}")));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inputs_discovered_after_a_failure_never_start() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(failing("bad", &tracker)).unwrap();
    engine
        .add_rule(slow("count", 2, Duration::from_millis(300), &tracker))
        .unwrap();
    engine.add_rule(constant("item-0", 1, &tracker)).unwrap();
    engine.add_rule(constant("item-1", 1, &tracker)).unwrap();
    engine.add_rule(discover("items", "count", &tracker)).unwrap();
    engine.add_rule(sum("root", &["bad", "items"], &tracker)).unwrap();

    let error = engine.build(key("root")).await.unwrap_err();

    assert_eq!(error, Error::TaskFailed {
        key: key("bad"),
        source: TestError::Failed(key("bad")),
    });
    assert_eq!(tracker.runs("item-0"), 0);
    assert_eq!(tracker.runs("item-1"), 0);
    assert!(!tracker.finished("items"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn build_ends_after_its_cancelled_task_methods() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();
    let calls = Arc::new(AtomicUsize::new(0));

    // the first computation is still running when its sibling fails
    engine
        .add_rule(
            Rule::new(key("slow"), {
                let calls = calls.clone();

                move |engine| {
                    let calls = calls.clone();

                    engine.register_task(FnTask::new("slow", move || {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            std::thread::sleep(Duration::from_millis(300));
                            Ok(1)
                        } else {
                            Ok(2)
                        }
                    }))
                }
            })
            .with_validity(|_, _| true),
        )
        .unwrap();
    engine
        .add_rule(failing_after("late", Duration::from_millis(50), &tracker))
        .unwrap();
    engine.add_rule(sum("first", &["slow", "late"], &tracker)).unwrap();
    engine.add_rule(doubled("second", "slow", &tracker)).unwrap();

    assert!(engine.build(key("first")).await.is_err());

    // committed before the failed build returned
    let committed = engine.cached_result(&key("slow")).unwrap();
    assert_eq!(*committed.value(), 1);
    assert_eq!(committed.built_at(), Timestamp::new(1));

    assert_eq!(engine.build(key("second")).await, Ok(2));
    assert_eq!(engine.build(key("second")).await, Ok(2));

    let confirmed = engine.cached_result(&key("slow")).unwrap();
    assert_eq!(confirmed.computed_at(), Timestamp::new(1));
    assert_eq!(confirmed.built_at(), Timestamp::new(3));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
