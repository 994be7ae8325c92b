//! Defines the [`Task`] trait and the input-declaration protocol.
//!
//! A task is an in-progress computation of one key's value. The engine drives
//! every task through the same lifecycle:
//!
//! ```text
//! Created ──start──▶ Running ──needs_input──▶ AwaitingInputs(n)
//!                                 ▲                 │
//!                                 └──provide_value──┘
//!                                                   │ n == 0
//!                                                   ▼
//!                                        finish ──▶ Finished
//! ```
//!
//! Inputs are requested through the [`Inputs`] handle passed to
//! [`Task::start`] and [`Task::provide_value`], so a task can discover new
//! dependencies from the values it has already received.

use std::{borrow::Cow, collections::hash_map::Entry};

use fxhash::FxHashMap;

use crate::config::Config;

/// A caller-chosen tag correlating an input request with its delivered value.
///
/// Input ids must be unique per task instance; they need not be unique across
/// tasks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub struct InputId(pub usize);

impl From<usize> for InputId {
    fn from(value: usize) -> Self { Self(value) }
}

/// An engine-assigned identifier of a registered task, used in logs and
/// traces.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub struct TaskId(pub u64);

/// An in-progress computation of a key's value.
///
/// # Protocol
///
/// - [`start`](Task::start) is called exactly once, right after the rule's
///   action created the task.
/// - [`provide_value`](Task::provide_value) is called exactly once for every
///   requested input, in no particular order, after that input was built.
/// - [`finish`](Task::finish) is called exactly once, after every requested
///   input was delivered and no request is pending.
///
/// The engine never calls two methods of the same task at the same time.
/// Reusing an input id within one task aborts the build with
/// [`Error::TaskProtocolViolation`](crate::Error::TaskProtocolViolation).
pub trait Task<C: Config>: Send + 'static {
    /// The name of the task, for debugging purposes.
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }

    /// Starts the computation. The task may request inputs through `inputs`.
    fn start(&mut self, inputs: &mut Inputs<C>);

    /// Delivers the value of the input requested with `input_id`. The task
    /// may request further inputs through `inputs`.
    fn provide_value(
        &mut self,
        inputs: &mut Inputs<C>,
        input_id: InputId,
        value: &C::Value,
    );

    /// Completes the computation and returns the task's value.
    ///
    /// # Errors
    ///
    /// Returns the client error if the value cannot be produced. The error
    /// fails the build of this key and of every key depending on it.
    fn finish(self: Box<Self>) -> Result<C::Value, C::Error>;
}

/// The handle through which a task requests its inputs.
pub struct Inputs<C: Config> {
    queued: Vec<(C::Key, InputId)>,
    registered: FxHashMap<InputId, C::Key>,
    violation: Option<String>,
}

impl<C: Config> Inputs<C> {
    pub(crate) fn new() -> Self {
        Self {
            queued: Vec::new(),
            registered: FxHashMap::default(),
            violation: None,
        }
    }

    /// Requests the value of `key`. The value is delivered later through
    /// [`Task::provide_value`] tagged with `input_id`.
    pub fn needs_input(&mut self, key: C::Key, input_id: impl Into<InputId>) {
        let input_id = input_id.into();

        match self.registered.entry(input_id) {
            Entry::Occupied(entry) => {
                if self.violation.is_none() {
                    self.violation = Some(format!(
                        "input id {} was requested for {key:?} but is already \
                         used for {:?}",
                        input_id.0,
                        entry.get()
                    ));
                }
            }

            Entry::Vacant(entry) => {
                entry.insert(key.clone());
                self.queued.push((key, input_id));
            }
        }
    }

    /// Returns the requests made since the last call, in request order.
    pub(crate) fn take_queued(&mut self) -> Vec<(C::Key, InputId)> {
        std::mem::take(&mut self.queued)
    }

    pub(crate) fn take_violation(&mut self) -> Option<String> {
        self.violation.take()
    }
}

impl<C: Config> std::fmt::Debug for Inputs<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inputs")
            .field("queued", &self.queued)
            .field("registered", &self.registered.len())
            .finish_non_exhaustive()
    }
}

/// A task registered with an engine, ready to be returned from a rule's
/// action.
///
/// Created by [`Engine::register_task`](crate::Engine::register_task). The
/// action may declare inputs with [`needs_input`](Self::needs_input) before
/// returning the task; they are requested before anything the task asks for
/// in [`Task::start`].
pub struct RegisteredTask<C: Config> {
    id: TaskId,
    task: Box<dyn Task<C>>,
    inputs: Inputs<C>,
}

impl<C: Config> RegisteredTask<C> {
    pub(crate) fn new(id: TaskId, task: Box<dyn Task<C>>) -> Self {
        Self { id, task, inputs: Inputs::new() }
    }

    /// The engine-assigned id of this task.
    #[must_use]
    pub const fn id(&self) -> TaskId { self.id }

    /// Declares that the task needs the value of `key`, tagged with
    /// `input_id`.
    pub fn needs_input(
        &mut self,
        key: C::Key,
        input_id: impl Into<InputId>,
    ) -> &mut Self {
        self.inputs.needs_input(key, input_id);
        self
    }

    pub(crate) fn into_parts(self) -> (TaskId, Box<dyn Task<C>>, Inputs<C>) {
        (self.id, self.task, self.inputs)
    }
}

impl<C: Config> std::fmt::Debug for RegisteredTask<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTask")
            .field("id", &self.id)
            .field("name", &self.task.name())
            .field("inputs", &self.inputs)
            .finish()
    }
}

/// A task with no inputs whose value is computed by a closure.
///
/// Useful for leaves of the dependency graph, such as reading a file or
/// returning a constant.
pub struct FnTask<F> {
    name: &'static str,
    compute: F,
}

impl<F> FnTask<F> {
    /// Creates a leaf task computing its value with `compute`.
    pub const fn new(name: &'static str, compute: F) -> Self {
        Self { name, compute }
    }
}

impl<C, F> Task<C> for FnTask<F>
where
    C: Config,
    F: FnOnce() -> Result<C::Value, C::Error> + Send + 'static,
{
    fn name(&self) -> Cow<'_, str> { Cow::Borrowed(self.name) }

    fn start(&mut self, _: &mut Inputs<C>) {}

    fn provide_value(
        &mut self,
        _: &mut Inputs<C>,
        input_id: InputId,
        _: &C::Value,
    ) {
        unreachable!(
            "leaf task `{}` never requests input {input_id:?}",
            self.name
        )
    }

    fn finish(self: Box<Self>) -> Result<C::Value, C::Error> {
        (self.compute)()
    }
}
