//! Rules: the recipes the engine uses to produce values.

use std::sync::Arc;

use dashmap::{DashMap, Entry};

use crate::{
    config::Config,
    engine::Engine,
    error::{BuildError, Error},
    task::RegisteredTask,
};

/// Creates the task computing a rule's key.
pub type Action<C> =
    Arc<dyn Fn(&Engine<C>) -> RegisteredTask<C> + Send + Sync + 'static>;

/// Decides whether a cached value can be reused without recomputation.
pub type ValidityCheck<C> = Arc<
    dyn Fn(&Rule<C>, &<C as Config>::Value) -> bool + Send + Sync + 'static,
>;

/// The recipe for producing the value of one key.
///
/// A rule pairs an action, which creates a fresh [`Task`](crate::Task)
/// whenever the key must be recomputed, with an optional validity check
/// consulted when a result from an earlier build is cached. A rule without a
/// validity check is recomputed once in every build that needs it.
///
/// # Example
///
/// ```rust
/// # use fxhash::FxBuildHasher;
/// # #[derive(
/// #     Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
/// # )]
/// # struct MyConfig;
/// # impl kiln::Config for MyConfig {
/// #     type Key = &'static str;
/// #     type Value = i64;
/// #     type Error = std::fmt::Error;
/// #     type BuildHasher = FxBuildHasher;
/// # }
/// use kiln::{FnTask, Rule};
///
/// let rule = Rule::<MyConfig>::new("answer", |engine| {
///     engine.register_task(FnTask::new("answer", || Ok(42)))
/// })
/// .with_validity(|_, value| *value == 42);
///
/// assert_eq!(*rule.key(), "answer");
/// assert!(rule.is_result_valid(&42));
/// ```
pub struct Rule<C: Config> {
    key: C::Key,
    action: Action<C>,
    is_result_valid: Option<ValidityCheck<C>>,
}

impl<C: Config> Rule<C> {
    /// Creates a rule producing `key` with tasks created by `action`.
    pub fn new(
        key: C::Key,
        action: impl Fn(&Engine<C>) -> RegisteredTask<C>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self { key, action: Arc::new(action), is_result_valid: None }
    }

    /// Sets the check deciding whether a cached value is still up to date.
    #[must_use]
    pub fn with_validity(
        mut self,
        is_result_valid: impl Fn(&Self, &C::Value) -> bool
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.is_result_valid = Some(Arc::new(is_result_valid));
        self
    }

    /// The key this rule produces.
    pub const fn key(&self) -> &C::Key { &self.key }

    /// Returns `true` if `value`, cached from an earlier build, can be reused.
    ///
    /// Rules without a validity check never reuse values across builds.
    pub fn is_result_valid(&self, value: &C::Value) -> bool {
        self.is_result_valid.as_ref().is_some_and(|check| check(self, value))
    }

    pub(crate) fn instantiate(&self, engine: &Engine<C>) -> RegisteredTask<C> {
        (self.action)(engine)
    }
}

impl<C: Config> Clone for Rule<C> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            action: self.action.clone(),
            is_result_valid: self.is_result_valid.clone(),
        }
    }
}

impl<C: Config> std::fmt::Debug for Rule<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("key", &self.key)
            .field("has_validity_check", &self.is_result_valid.is_some())
            .finish_non_exhaustive()
    }
}

/// Maps each key to the rule producing it.
pub(crate) struct RuleTable<C: Config> {
    rules: DashMap<C::Key, Arc<Rule<C>>, C::BuildHasher>,
}

impl<C: Config> RuleTable<C> {
    pub fn new() -> Self {
        Self {
            rules: DashMap::with_hasher_and_shard_amount(
                C::BuildHasher::default(),
                C::shard_amount(),
            ),
        }
    }

    /// Registers `rule`. The first registration for a key wins.
    pub fn add(&self, rule: Rule<C>) -> Result<(), BuildError<C>> {
        match self.rules.entry(rule.key.clone()) {
            Entry::Occupied(entry) => {
                Err(Error::DuplicateRule { key: entry.key().clone() })
            }

            Entry::Vacant(entry) => {
                entry.insert(Arc::new(rule));
                Ok(())
            }
        }
    }

    pub fn lookup(&self, key: &C::Key) -> Option<Arc<Rule<C>>> {
        self.rules.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize { self.rules.len() }
}
