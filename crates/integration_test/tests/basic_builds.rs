//! Tests for single builds: values, memoization, and recorded results.

use kiln::{Error, Timestamp};
use kiln_integration_test::{
    TestConfig, Tracker, constant, create_test_engine, declared_sum, discover,
    doubled, key, sum,
};

#[tokio::test]
async fn doubled_leaf() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(constant("leaf", 5, &tracker)).unwrap();
    engine.add_rule(doubled("doubled", "leaf", &tracker)).unwrap();

    assert_eq!(engine.build(key("doubled")).await, Ok(10));

    let doubled = engine.cached_result(&key("doubled")).unwrap();
    assert_eq!(*doubled.value(), 10);
    assert_eq!(doubled.dependencies(), [key("leaf")]);

    let leaf = engine.cached_result(&key("leaf")).unwrap();
    assert_eq!(*leaf.value(), 5);
    assert!(leaf.dependencies().is_empty());
}

#[tokio::test]
async fn key_built_twice_in_one_build_runs_once() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(constant("leaf", 2, &tracker)).unwrap();
    engine.add_rule(sum("left", &["leaf"], &tracker)).unwrap();
    engine.add_rule(sum("right", &["leaf", "leaf"], &tracker)).unwrap();
    engine.add_rule(sum("top", &["left", "right"], &tracker)).unwrap();

    assert_eq!(engine.build(key("top")).await, Ok(6));

    assert_eq!(tracker.runs("leaf"), 1);
    assert_eq!(tracker.runs("left"), 1);
    assert_eq!(tracker.runs("right"), 1);
    assert_eq!(tracker.runs("top"), 1);
}

#[tokio::test]
async fn dependencies_keep_request_order_and_duplicates() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(constant("a", 1, &tracker)).unwrap();
    engine.add_rule(constant("b", 10, &tracker)).unwrap();
    engine.add_rule(sum("root", &["b", "a", "b"], &tracker)).unwrap();

    assert_eq!(engine.build(key("root")).await, Ok(21));

    let root = engine.cached_result(&key("root")).unwrap();
    assert_eq!(root.dependencies(), [key("b"), key("a"), key("b")]);
}

#[tokio::test]
async fn inputs_finish_before_their_dependents() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(constant("leaf", 1, &tracker)).unwrap();
    engine.add_rule(doubled("middle", "leaf", &tracker)).unwrap();
    engine.add_rule(doubled("top", "middle", &tracker)).unwrap();

    assert_eq!(engine.build(key("top")).await, Ok(4));
    assert_eq!(tracker.finish_order(), [
        key("leaf"),
        key("middle"),
        key("top")
    ]);
}

#[tokio::test]
async fn results_of_one_build_share_its_timestamp() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(constant("leaf", 5, &tracker)).unwrap();
    engine.add_rule(doubled("doubled", "leaf", &tracker)).unwrap();

    engine.build(key("doubled")).await.unwrap();

    for name in ["leaf", "doubled"] {
        let result = engine.cached_result(&key(name)).unwrap();

        assert_eq!(result.computed_at(), Timestamp::new(1));
        assert_eq!(result.built_at(), Timestamp::new(1));
    }

    engine.build(key("doubled")).await.unwrap();

    for name in ["leaf", "doubled"] {
        let result = engine.cached_result(&key(name)).unwrap();

        assert!(result.built_at() >= result.computed_at());
        assert_eq!(result.built_at(), engine.current_timestamp());
    }
}

#[tokio::test]
async fn missing_rule() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(doubled("doubled", "nowhere", &tracker)).unwrap();

    assert_eq!(
        engine.build(key("nowhere")).await,
        Err(Error::NoRuleForKey { key: key("nowhere") })
    );
    assert_eq!(
        engine.build(key("doubled")).await,
        Err(Error::NoRuleForKey { key: key("nowhere") })
    );

    assert!(!tracker.finished("doubled"));
    assert!(engine.cached_result(&key("doubled")).is_none());
}

#[tokio::test]
async fn inputs_discovered_from_delivered_values() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(constant("index", 3, &tracker)).unwrap();
    engine.add_rule(constant("item-0", 1, &tracker)).unwrap();
    engine.add_rule(constant("item-1", 20, &tracker)).unwrap();
    engine.add_rule(constant("item-2", 300, &tracker)).unwrap();
    engine.add_rule(constant("item-3", 4000, &tracker)).unwrap();
    engine.add_rule(discover("total", "index", &tracker)).unwrap();

    assert_eq!(engine.build(key("total")).await, Ok(321));

    let total = engine.cached_result(&key("total")).unwrap();
    assert_eq!(total.dependencies(), [
        key("index"),
        key("item-0"),
        key("item-1"),
        key("item-2"),
    ]);
    assert_eq!(tracker.runs("item-3"), 0);
}

#[tokio::test]
async fn inputs_declared_by_the_action() {
    let engine = create_test_engine::<TestConfig>();
    let tracker = Tracker::new();

    engine.add_rule(constant("a", 1, &tracker)).unwrap();
    engine.add_rule(constant("b", 2, &tracker)).unwrap();
    engine.add_rule(declared_sum("sum", &["a", "b"], &tracker)).unwrap();

    assert_eq!(engine.build(key("sum")).await, Ok(3));
    assert_eq!(
        engine.cached_result(&key("sum")).unwrap().dependencies(),
        [key("a"), key("b")]
    );
}
