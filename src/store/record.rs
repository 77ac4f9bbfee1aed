// ABOUTME: SessionRecord: one tracked sleep interval with start/end timestamps and a quality rating.
// ABOUTME: A record is open while its end time still equals its start time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Quality value of a record that has not been rated yet.
pub const UNRATED: i32 = -1;

/// Highest accepted quality rating; the lowest is 0.
pub const MAX_QUALITY: i32 = 5;

/// Store-assigned identifier of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One tracked sleep interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Assigned by the store on insert. `None` until then.
    pub id: Option<RecordId>,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub quality: i32,
}

impl SessionRecord {
    /// A fresh, unsaved, open record starting at `now_ms`.
    pub fn begin(now_ms: i64) -> Self {
        Self {
            id: None,
            start_time_ms: now_ms,
            end_time_ms: now_ms,
            quality: UNRATED,
        }
    }

    /// Whether the session has not ended yet.
    ///
    /// A session ended in the same millisecond it started is indistinguishable
    /// from an open one.
    pub fn is_open(&self) -> bool {
        self.end_time_ms == self.start_time_ms
    }

    pub fn is_rated(&self) -> bool {
        self.quality != UNRATED
    }

    /// Duration of an ended session in milliseconds; zero while open.
    pub fn duration_ms(&self) -> i64 {
        (self.end_time_ms - self.start_time_ms).max(0)
    }
}

/// Whether `quality` is an accepted rating.
pub fn is_valid_quality(quality: i32) -> bool {
    (0..=MAX_QUALITY).contains(&quality)
}
