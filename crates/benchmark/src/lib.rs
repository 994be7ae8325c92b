#![allow(missing_docs)]

use std::{convert::Infallible, sync::Arc};

use fxhash::FxBuildHasher;
use kiln::{Engine, InputId, Inputs, Rule, Task, config};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Config;

impl config::Config for Config {
    type Key = u64;
    type Value = u64;
    type Error = Infallible;
    type BuildHasher = FxBuildHasher;
}

#[must_use]
pub fn create_test_engine() -> Arc<Engine<Config>> { Arc::new(Engine::new()) }

/// Adds up the values of `inputs`, plus one.
pub struct Sum {
    inputs: Vec<u64>,
    total: u64,
}

impl Task<Config> for Sum {
    fn start(&mut self, inputs: &mut Inputs<Config>) {
        for (index, input) in self.inputs.iter().enumerate() {
            inputs.needs_input(*input, index);
        }
    }

    fn provide_value(
        &mut self,
        _: &mut Inputs<Config>,
        _: InputId,
        value: &u64,
    ) {
        self.total += value;
    }

    fn finish(self: Box<Self>) -> Result<u64, Infallible> {
        Ok(self.total + 1)
    }
}

/// The rule for `key`, summing `inputs`. Results of keys without inputs are
/// always reused.
#[must_use]
pub fn sum(key: u64, inputs: Vec<u64>) -> Rule<Config> {
    let leaf = inputs.is_empty();
    let rule = Rule::new(key, move |engine| {
        engine.register_task(Sum { inputs: inputs.clone(), total: 0 })
    });

    if leaf { rule.with_validity(|_, _| true) } else { rule }
}
