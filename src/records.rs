//! Server records, and queries over which of them are cached locally.

use std::ops::RangeInclusive;

use crate::changeset::Changeset;
use crate::history::{History, HistoryEntry};
use crate::selection::SelectionRange;
use crate::{Revision, UserId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One accepted change in the server's linear history. Record `n` applies to the document at
/// revision `n - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServerRecord {
    pub revision: Revision,
    pub author: UserId,
    pub changeset: Changeset,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub before_selection: Option<SelectionRange>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub after_selection: Option<SelectionRange>,
}

/// A contiguous run of records, oldest first, along with the document text before the first one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecordsPage {
    pub base_text: String,
    pub records: Vec<ServerRecord>,
}

/// Ask for (up to) the `count` newest records with revisions before `before_revision`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FetchRequest {
    pub before_revision: Revision,
    pub count: usize,
}

/// Something which can load older records - usually a request to the server.
pub trait RecordSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn fetch_records(&mut self, request: &FetchRequest) -> Result<RecordsPage, Self::Error>;
}

/// A read only view over a user's cached history.
#[derive(Debug, Copy, Clone)]
pub struct UserRecords<'a> {
    history: &'a History,
}

impl<'a> UserRecords<'a> {
    pub fn new(history: &'a History) -> Self {
        Self { history }
    }

    pub fn user(&self) -> &'a UserId { self.history.user() }

    /// Are all the records in the range cached? An empty range is trivially cached.
    pub fn has_records(&self, range: RangeInclusive<Revision>) -> bool {
        if range.is_empty() { return true; }
        *range.start() > self.history.tail_revision()
            && *range.end() <= self.history.head_revision()
    }

    /// Own records which undo could still act on, newest first.
    pub fn own_older_records(&self, before_revision: Revision) -> impl Iterator<Item = &'a HistoryEntry> + 'a {
        let history = self.history;
        history.iter().rev()
            .filter(move |e| e.revision < before_revision && history.is_undoable(e))
    }

    /// Are at least `count` undoable own records before `before_revision` cached?
    pub fn has_own_older_records(&self, before_revision: Revision, count: usize) -> bool {
        self.own_older_records(before_revision).take(count).count() >= count
    }

    /// What to fetch so that `count` more undos are possible. Returns `None` if that many are
    /// already cached, or if there's nothing older left on the server.
    pub fn fetch_request(&self, before_revision: Revision, count: usize, page_size: usize) -> Option<FetchRequest> {
        if self.has_own_older_records(before_revision, count) || self.history.is_complete() {
            return None;
        }
        Some(FetchRequest {
            before_revision: self.history.tail_revision() + 1,
            count: page_size.max(1),
        })
    }
}
