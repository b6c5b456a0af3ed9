//! Stream identification and versioning for the event store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of an event stream.
///
/// The admission aggregates each own exactly one stream, so stream ids are
/// fixed names rather than per-entity keys.
///
/// ```
/// use visitgate_core::stream::StreamId;
///
/// let stream_id = StreamId::new("queue-manager");
/// assert_eq!(stream_id.as_str(), "queue-manager");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// Create a new `StreamId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the stream name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Number of events in a stream.
///
/// ```
/// use visitgate_core::stream::Version;
///
/// let v = Version::INITIAL.next().next();
/// assert_eq!(v.value(), 2);
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a stream with no events.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version`.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
