//! Build generations and the counter handing them out.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A logical build timestamp.
///
/// The engine increments its timestamp once per top-level
/// [`build`](crate::Engine::build) call; every key resolved during that call
/// shares the same timestamp. Timestamp zero never labels a build.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The timestamp before the first build.
    pub const ZERO: Self = Self(0);

    /// Creates a timestamp from its raw generation number.
    #[must_use]
    pub const fn new(generation: u64) -> Self { Self(generation) }

    /// Returns the raw generation number.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct TimestampManager {
    current_timestamp: AtomicU64,
}

impl TimestampManager {
    pub const fn new() -> Self {
        Self { current_timestamp: AtomicU64::new(0) }
    }

    /// Starts a new generation and returns its timestamp.
    pub fn increment(&self) -> Timestamp {
        Timestamp(self.current_timestamp.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Moves the counter forward so the next generation comes after
    /// `timestamp`. Never moves it backward.
    pub fn advance_past(&self, timestamp: Timestamp) {
        self.current_timestamp.fetch_max(timestamp.0, Ordering::SeqCst);
    }

    pub fn get_current(&self) -> Timestamp {
        Timestamp(self.current_timestamp.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn advance_never_moves_backward() {
        let manager = TimestampManager::new();

        manager.advance_past(Timestamp::new(7));
        manager.advance_past(Timestamp::new(3));

        assert_eq!(manager.get_current(), Timestamp::new(7));
        assert_eq!(manager.increment(), Timestamp::new(8));
    }
}
