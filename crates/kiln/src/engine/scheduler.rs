//! Resolves keys within a build: cache checks, coalescing, cycle detection,
//! and driving tasks through their lifecycle.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::{sync::SemaphorePermit, task::JoinSet};

use crate::{
    config::Config,
    engine::{
        Engine,
        in_flight::{Claim, InFlight},
        result_store::BuildResult,
        timestamp::Timestamp,
    },
    error::{BuildError, Error},
    rule::Rule,
    trace::{TraceEvent, render},
};

type Resolution<C> = Pin<
    Box<
        dyn Future<Output = Result<<C as Config>::Value, BuildError<C>>>
            + Send,
    >,
>;

impl<C: Config> Engine<C> {
    /// Resolves `key` in the generation `timestamp`.
    ///
    /// `requester` is the running computation whose task asked for `key`,
    /// `None` for the root of the build. Its dependency edge to `key` must
    /// already be recorded.
    pub(super) fn resolve(
        self: Arc<Self>,
        key: C::Key,
        requester: Option<Arc<InFlight<C>>>,
        timestamp: Timestamp,
    ) -> Resolution<C> {
        Box::pin(async move {
            self.tracer.emit(|| TraceEvent::ResolveStarted {
                key: render(&key),
                requested_by: requester.as_ref().map(|r| render(r.key())),
            });

            loop {
                if let Some(result) = self.results.get(&key)
                    && result.built_at() == timestamp
                {
                    tracing::trace!(?key, "cache hit");
                    self.tracer.emit(|| TraceEvent::CacheHit {
                        key: render(&key),
                    });

                    return Ok(result.value().clone());
                }

                match self.in_flight.claim(&key) {
                    Claim::Waiter { notified, in_flight } => {
                        if let Some(outcome) = in_flight.outcome() {
                            return outcome;
                        }

                        if let Some(requester) = &requester
                            && let Some(path) = self
                                .in_flight
                                .find_path(&in_flight, requester.key())
                        {
                            let mut cycle = Vec::with_capacity(path.len() + 1);
                            cycle.push(requester.key().clone());
                            cycle.extend(path);

                            tracing::debug!(?cycle, "cyclic dependency");

                            return Err(Error::CyclicDependency { cycle });
                        }

                        notified.await;

                        if let Some(outcome) = in_flight.outcome() {
                            return outcome;
                        }

                        // the owner was cancelled, try to take over
                    }

                    Claim::Owner(guard) => {
                        let outcome = self
                            .compute(&key, guard.in_flight(), timestamp)
                            .await;

                        if let Err(error) = &outcome {
                            self.tracer.emit(|| TraceEvent::ComputeFailed {
                                key: render(&key),
                                error: error.to_string(),
                            });
                        }

                        return guard.complete(outcome);
                    }
                }
            }
        })
    }

    async fn compute(
        self: &Arc<Self>,
        key: &C::Key,
        in_flight: &Arc<InFlight<C>>,
        timestamp: Timestamp,
    ) -> Result<C::Value, BuildError<C>> {
        let cached = self.results.get(key);

        // committed by an owner that finished just before we claimed the key
        if let Some(result) = &cached
            && result.built_at() == timestamp
        {
            return Ok(result.value().clone());
        }

        let rule = self.rules.lookup(key);

        if let Some(result) = cached {
            let valid = match &rule {
                Some(rule) => {
                    let _permit = self.worker().await;
                    rule.is_result_valid(result.value())
                }

                // externally supplied leaf
                None => true,
            };

            if valid {
                tracing::trace!(?key, "cached result is still valid");

                self.results.put(key.clone(), result.confirmed_at(timestamp))?;
                self.tracer.emit(|| TraceEvent::ResultValid {
                    key: render(key),
                });

                return Ok(result.value().clone());
            }
        }

        let Some(rule) = rule else {
            return Err(Error::NoRuleForKey { key: key.clone() });
        };

        self.recompute(key, &rule, in_flight, timestamp).await
    }

    #[tracing::instrument(skip(self, rule, in_flight), level = "debug")]
    async fn recompute(
        self: &Arc<Self>,
        key: &C::Key,
        rule: &Rule<C>,
        in_flight: &Arc<InFlight<C>>,
        timestamp: Timestamp,
    ) -> Result<C::Value, BuildError<C>> {
        let (task_id, mut task, mut inputs) = {
            let _permit = self.worker().await;

            let (task_id, mut task, mut inputs) =
                rule.instantiate(self).into_parts();

            self.tracer.emit(|| TraceEvent::ComputeStarted {
                key: render(key),
                task: task_id.0,
                name: task.name().into_owned(),
            });

            task.start(&mut inputs);

            (task_id, task, inputs)
        };

        tracing::trace!(?task_id, name = %task.name(), "task started");

        let mut pending = JoinSet::new();

        loop {
            if let Some(reason) = inputs.take_violation() {
                return Err(Error::TaskProtocolViolation {
                    key: key.clone(),
                    reason,
                });
            }

            for (dependency, input_id) in inputs.take_queued() {
                in_flight.record_dependency(dependency.clone());

                self.tracer.emit(|| TraceEvent::InputRequested {
                    key: render(key),
                    input: render(&dependency),
                    input_id: input_id.0,
                });

                let engine = self.clone();
                let requester = in_flight.clone();

                pending.spawn(self.subtasks.track_future(async move {
                    let value = engine
                        .resolve(dependency, Some(requester), timestamp)
                        .await;

                    (input_id, value)
                }));
            }

            // dropping `pending` on an early return aborts the siblings; the
            // build waits for them in `Engine::build`
            let Some(joined) = pending.join_next().await else {
                break;
            };

            let (input_id, value) = match joined {
                Ok(delivery) => delivery,

                Err(error) if error.is_panic() => {
                    std::panic::resume_unwind(error.into_panic())
                }

                Err(error) => unreachable!(
                    "input resolutions should only be aborted together with \
                     their requester: {error}"
                ),
            };

            let value = value?;

            let _permit = self.worker().await;
            task.provide_value(&mut inputs, input_id, &value);
        }

        let value = {
            let _permit = self.worker().await;
            task.finish()
        }
        .map_err(|source| Error::TaskFailed { key: key.clone(), source })?;

        let dependencies = in_flight.dependencies();

        self.tracer.emit(|| TraceEvent::ComputeFinished {
            key: render(key),
            dependencies: dependencies.iter().map(render).collect(),
        });

        self.results.put(
            key.clone(),
            BuildResult::new(value.clone(), timestamp, timestamp, dependencies),
        )?;

        tracing::trace!(?task_id, "task finished");

        Ok(value)
    }

    async fn worker(&self) -> SemaphorePermit<'_> {
        self.workers
            .acquire()
            .await
            .expect("the worker semaphore should never be closed")
    }
}
