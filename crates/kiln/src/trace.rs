//! The trace port: an ordered record of scheduling decisions.
//!
//! Once a [`TraceSink`] is installed, through
//! [`Engine::enable_tracing`](crate::Engine::enable_tracing) or
//! [`Engine::set_trace_sink`](crate::Engine::set_trace_sink), the engine
//! reports every [`TraceEvent`] of every build to it. The events carry keys in
//! their `Debug` form and are detailed enough to rebuild the dependency graph
//! of a finished build, see [`DependencyGraph`].
//!
//! [`FileTraceSink`] writes one JSON object per line; [`read_trace`] parses
//! such a file back.
//!
//! Tracing is a diagnostic aid: once enabled, a failure to write an event is
//! logged and otherwise ignored.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::Path,
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::engine::timestamp::Timestamp;

mod graph;

pub use graph::DependencyGraph;

/// A scheduling event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TraceEvent {
    /// A top-level build started.
    BuildStarted {
        /// The timestamp of the new generation.
        timestamp: Timestamp,
        /// The requested key.
        key: String,
    },

    /// The engine started resolving a key.
    ResolveStarted {
        /// The key being resolved.
        key: String,
        /// The key whose task requested it, `None` for the build root.
        requested_by: Option<String>,
    },

    /// The key was already built in this generation.
    CacheHit {
        /// The key.
        key: String,
    },

    /// A cached result from an earlier generation was confirmed up to date.
    ResultValid {
        /// The key.
        key: String,
    },

    /// The key's task was created and started.
    ComputeStarted {
        /// The key.
        key: String,
        /// The id of the task.
        task: u64,
        /// The debug name of the task.
        name: String,
    },

    /// A task requested an input.
    InputRequested {
        /// The key whose task made the request.
        key: String,
        /// The requested key.
        input: String,
        /// The task's tag for the request.
        input_id: usize,
    },

    /// The key's task finished and its result was committed.
    ComputeFinished {
        /// The key.
        key: String,
        /// The recorded dependencies, in request order.
        dependencies: Vec<String>,
    },

    /// The key could not be produced.
    ComputeFailed {
        /// The key.
        key: String,
        /// The error message.
        error: String,
    },

    /// A top-level build ended.
    BuildEnded {
        /// The timestamp of the generation.
        timestamp: Timestamp,
        /// The requested key.
        key: String,
        /// Whether the build produced a value.
        success: bool,
    },
}

/// A destination for trace events.
pub trait TraceSink: Send + Sync + 'static {
    /// Records one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be written.
    fn record(&self, event: &TraceEvent) -> io::Result<()>;

    /// Flushes buffered events. Called at the end of every build.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered events cannot be written.
    fn flush(&self) -> io::Result<()> { Ok(()) }
}

/// A trace sink writing JSON lines to a file.
#[derive(Debug)]
pub struct FileTraceSink {
    writer: Mutex<BufWriter<File>>,
}

impl FileTraceSink {
    /// Creates (or truncates) the trace file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self { writer: Mutex::new(BufWriter::new(File::create(path)?)) })
    }
}

impl TraceSink for FileTraceSink {
    fn record(&self, event: &TraceEvent) -> io::Result<()> {
        let mut writer = self.writer.lock();

        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")
    }

    fn flush(&self) -> io::Result<()> { self.writer.lock().flush() }
}

/// A trace sink keeping events in memory.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemoryTraceSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Returns the events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> { self.events.lock().clone() }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, event: &TraceEvent) -> io::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Reads a trace written by [`FileTraceSink`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line is not a valid
/// event.
pub fn read_trace(path: impl AsRef<Path>) -> io::Result<Vec<TraceEvent>> {
    let mut events = Vec::new();

    for line in BufReader::new(File::open(path)?).lines() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        events.push(serde_json::from_str(&line)?);
    }

    Ok(events)
}

/// The engine side of the trace port.
#[derive(Default)]
pub(crate) struct Tracer {
    sink: RwLock<Option<Arc<dyn TraceSink>>>,
}

impl Tracer {
    pub fn install(&self, sink: Arc<dyn TraceSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Records the event built by `event` if a sink is installed.
    pub fn emit(&self, event: impl FnOnce() -> TraceEvent) {
        let Some(sink) = self.sink.read().clone() else {
            return;
        };

        let event = event();

        if let Err(error) = sink.record(&event) {
            tracing::warn!(%error, ?event, "failed to record trace event");
        }
    }

    pub fn flush(&self) {
        let Some(sink) = self.sink.read().clone() else {
            return;
        };

        if let Err(error) = sink.flush() {
            tracing::warn!(%error, "failed to flush trace sink");
        }
    }
}

pub(crate) fn render<K: std::fmt::Debug>(key: &K) -> String {
    format!("{key:?}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn events_round_trip_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");

        let sink = FileTraceSink::create(&path).unwrap();
        let events = vec![
            TraceEvent::BuildStarted {
                timestamp: Timestamp::new(1),
                key: "\"root\"".to_string(),
            },
            TraceEvent::ComputeFinished {
                key: "\"root\"".to_string(),
                dependencies: vec!["\"leaf\"".to_string()],
            },
        ];

        for event in &events {
            sink.record(event).unwrap();
        }
        sink.flush().unwrap();

        assert_eq!(read_trace(&path).unwrap(), events);
    }

    #[test]
    fn events_are_tagged_in_kebab_case() {
        let line = serde_json::to_string(&TraceEvent::CacheHit {
            key: "k".to_string(),
        })
        .unwrap();

        assert_eq!(line, r#"{"event":"cache-hit","key":"k"}"#);
    }
}
