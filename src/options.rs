#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tuning knobs for a [`CollabService`](crate::CollabService).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct CollabOptions {
    /// Once the history holds more entries than this, entries which undo can no longer reach are
    /// evicted.
    pub max_cached_records: usize,

    /// How many undoable records we try to keep cached ahead of the user. When fewer are cached,
    /// the service asks for more.
    pub undo_prefetch: usize,

    /// How many records to ask for in each history fetch.
    pub fetch_page_size: usize,

    /// If set, an acknowledgement must carry exactly the changeset we submitted. Otherwise only
    /// the revision and lengths are checked.
    pub strict_acknowledgments: bool,
}

pub const DEFAULT_OPTIONS: CollabOptions = CollabOptions {
    max_cached_records: 1000,
    undo_prefetch: 10,
    fetch_page_size: 50,
    strict_acknowledgments: true,
};

impl Default for CollabOptions {
    fn default() -> Self {
        DEFAULT_OPTIONS
    }
}

impl CollabOptions {
    pub fn with_max_cached_records(mut self, max: usize) -> Self {
        self.max_cached_records = max;
        self
    }

    pub fn with_undo_prefetch(mut self, count: usize) -> Self {
        self.undo_prefetch = count;
        self
    }

    pub fn with_fetch_page_size(mut self, size: usize) -> Self {
        self.fetch_page_size = size;
        self
    }

    pub fn with_strict_acknowledgments(mut self, strict: bool) -> Self {
        self.strict_acknowledgments = strict;
        self
    }
}
