//! Rebuilds per-build dependency graphs from recorded trace events.

use std::collections::{BTreeMap, BTreeSet};

use crate::{engine::timestamp::Timestamp, trace::TraceEvent};

/// The dependency graph of one build, rebuilt from its trace.
///
/// Only keys recomputed in the build have edges; keys served from the cache
/// are listed in [`reused`](Self::reused).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyGraph {
    timestamp: Timestamp,
    root: String,
    success: Option<bool>,
    edges: BTreeMap<String, Vec<String>>,
    reused: BTreeSet<String>,
    failed: BTreeSet<String>,
}

impl DependencyGraph {
    /// Splits `events` into builds and rebuilds the graph of each, in order.
    ///
    /// Events outside a `build-started`/`build-ended` pair are ignored. A
    /// trace cut off in the middle of a build yields a graph whose
    /// [`success`](Self::success) is `None`.
    #[must_use]
    pub fn from_events(events: &[TraceEvent]) -> Vec<Self> {
        let mut graphs = Vec::new();
        let mut current: Option<Self> = None;

        for event in events {
            match event {
                TraceEvent::BuildStarted { timestamp, key } => {
                    graphs.extend(current.take());
                    current = Some(Self {
                        timestamp: *timestamp,
                        root: key.clone(),
                        ..Self::default()
                    });
                }

                TraceEvent::BuildEnded { success, .. } => {
                    if let Some(mut graph) = current.take() {
                        graph.success = Some(*success);
                        graphs.push(graph);
                    }
                }

                event => {
                    if let Some(graph) = current.as_mut() {
                        graph.apply(event);
                    }
                }
            }
        }

        graphs.extend(current);
        graphs
    }

    fn apply(&mut self, event: &TraceEvent) {
        match event {
            TraceEvent::ResultValid { key } => {
                self.reused.insert(key.clone());
            }

            TraceEvent::ComputeFinished { key, dependencies } => {
                self.edges.insert(key.clone(), dependencies.clone());
            }

            TraceEvent::ComputeFailed { key, .. } => {
                self.failed.insert(key.clone());
            }

            _ => {}
        }
    }

    /// The timestamp of the build.
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp { self.timestamp }

    /// The key the build was asked for.
    #[must_use]
    pub fn root(&self) -> &str { &self.root }

    /// Whether the build succeeded, `None` if the trace ends mid-build.
    #[must_use]
    pub const fn success(&self) -> Option<bool> { self.success }

    /// The dependencies of a key recomputed in this build, in request order.
    #[must_use]
    pub fn dependencies(&self, key: &str) -> Option<&[String]> {
        self.edges.get(key).map(Vec::as_slice)
    }

    /// The keys recomputed in this build.
    pub fn recomputed(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// The keys whose cached result was confirmed up to date.
    pub fn reused(&self) -> impl Iterator<Item = &str> {
        self.reused.iter().map(String::as_str)
    }

    /// The keys that could not be produced.
    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(String::as_str)
    }
}
