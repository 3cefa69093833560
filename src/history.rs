//! The history is a window over the document's server records, used for undo.
//!
//! To undo one of our own edits we need its inverse, rebased over everything which happened
//! since. So the window holds *every* record after the tail revision, not just our own ones - the
//! external records are what the inverse gets transformed through.
//!
//! The window only covers a suffix of the document's life. Older records are fetched in pages
//! (see [`UserRecords`](crate::records::UserRecords)) and spliced onto the tail.

use std::collections::{BTreeSet, VecDeque};
use humansize::{format_size, DECIMAL};
use tracing::{debug, trace};

use crate::changeset::Changeset;
use crate::error::CollabError;
use crate::records::{RecordsPage, ServerRecord};
use crate::selection::SelectionRange;
use crate::{Revision, UserId};

/// Was a record made by the user typing, or by undo / redo? Only typed entries are undo targets.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EntryOrigin { Typing, UndoRedo }

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub revision: Revision,
    pub author: UserId,
    /// Applies to the document at `revision - 1`.
    pub changeset: Changeset,
    /// Applies to the document at `revision`, and undoes `changeset`.
    pub inverse: Changeset,
    pub origin: EntryOrigin,
    pub before_selection: Option<SelectionRange>,
    pub after_selection: Option<SelectionRange>,
}

impl HistoryEntry {
    fn from_record(record: ServerRecord, inverse: Changeset, origin: EntryOrigin) -> Self {
        HistoryEntry {
            revision: record.revision,
            author: record.author,
            changeset: record.changeset,
            inverse,
            origin,
            before_selection: record.before_selection,
            after_selection: record.after_selection,
        }
    }
}

#[derive(Debug, Clone)]
pub struct History {
    user: UserId,

    /// Contiguous run of records. entries[i] has revision tail_revision + 1 + i.
    entries: VecDeque<HistoryEntry>,

    /// The revision of `tail_text`. Everything after this is cached.
    tail_revision: Revision,
    tail_text: String,

    /// Index into entries of the newest entry undo would act on, or -1 if there's nothing cached
    /// to undo.
    local_index: isize,

    /// This outlives eviction. If an entry gets evicted and refetched, it should still be undone.
    undone: BTreeSet<Revision>,

    /// Our own records which came from undo or redo. Records don't say where they came from, so
    /// this is how refetched entries get their origin back.
    undo_redo: BTreeSet<Revision>,
}

impl History {
    /// Create an empty history window starting at the document state (revision, text).
    pub fn new(user: UserId, revision: Revision, text: &str) -> Self {
        Self {
            user,
            entries: VecDeque::new(),
            tail_revision: revision,
            tail_text: text.into(),
            local_index: -1,
            undone: BTreeSet::new(),
            undo_redo: BTreeSet::new(),
        }
    }

    pub fn user(&self) -> &UserId { &self.user }

    pub fn tail_revision(&self) -> Revision { self.tail_revision }

    /// The document text at the tail revision.
    pub fn tail_text(&self) -> &str { &self.tail_text }

    pub fn head_revision(&self) -> Revision {
        self.tail_revision + self.entries.len() as Revision
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// True when the window reaches all the way back to the empty document. There's nothing more
    /// to fetch.
    pub fn is_complete(&self) -> bool { self.tail_revision == 0 }

    pub fn local_index(&self) -> isize { self.local_index }

    pub fn get(&self, revision: Revision) -> Option<&HistoryEntry> {
        if revision <= self.tail_revision { return None; }
        self.entries.get((revision - self.tail_revision - 1) as usize)
    }

    /// All cached entries, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry> + '_ {
        self.entries.iter()
    }

    /// Entries with a revision strictly after `revision`, oldest first.
    pub fn entries_after(&self, revision: Revision) -> impl Iterator<Item = &HistoryEntry> + '_ {
        self.entries.iter().skip(revision.saturating_sub(self.tail_revision) as usize)
    }

    pub fn is_own(&self, entry: &HistoryEntry) -> bool {
        entry.author == self.user
    }

    pub fn is_undone(&self, revision: Revision) -> bool {
        self.undone.contains(&revision)
    }

    pub(crate) fn is_undoable(&self, entry: &HistoryEntry) -> bool {
        self.is_own(entry)
            && entry.origin == EntryOrigin::Typing
            && !self.undone.contains(&entry.revision)
    }

    fn settle_local_index(&mut self) {
        self.local_index = self.entries.iter()
            .rposition(|e| self.is_undoable(e))
            .map_or(-1, |i| i as isize);
    }

    /// Add the next record on top of the history. `inverse` must undo the record's changeset.
    pub fn append(&mut self, record: ServerRecord, inverse: Changeset, origin: EntryOrigin) -> Result<(), CollabError> {
        let expected = self.head_revision() + 1;
        if record.revision != expected {
            return Err(CollabError::UnexpectedRevision { expected, actual: record.revision });
        }
        debug_assert_eq!(record.changeset.target_len(), inverse.source_len());

        let entry = HistoryEntry::from_record(record, inverse, origin);
        if origin == EntryOrigin::UndoRedo && self.is_own(&entry) {
            self.undo_redo.insert(entry.revision);
        }
        let undoable = self.is_undoable(&entry);
        self.entries.push_back(entry);
        if undoable {
            self.local_index = self.entries.len() as isize - 1;
        }
        Ok(())
    }

    /// The entry the next undo would act on.
    pub fn undo_target(&self) -> Option<&HistoryEntry> {
        if self.local_index < 0 { return None; }
        self.entries.get(self.local_index as usize)
    }

    /// Pop the entry undo should act on. The entry is marked as undone and `local_index` moves
    /// back to the next candidate.
    pub fn undo_entry(&mut self) -> Option<HistoryEntry> {
        if self.local_index < 0 { return None; }

        let entry = self.entries.get(self.local_index as usize)?.clone();
        self.undone.insert(entry.revision);
        self.settle_local_index();
        Some(entry)
    }

    /// Clear the undone mark on an entry, making it an undo target again.
    pub fn mark_redone(&mut self, revision: Revision) {
        if self.undone.remove(&revision) {
            self.settle_local_index();
        }
    }

    /// Drop cached entries older than `revision`. Returns the number of entries evicted.
    ///
    /// Entries which undo can still reach (the one at `local_index` and everything after it) are
    /// never evicted, since they're needed to rebase the undo.
    pub fn evict_before(&mut self, revision: Revision) -> Result<usize, CollabError> {
        let limit = if self.local_index >= 0 {
            self.entries[self.local_index as usize].revision
        } else {
            self.head_revision() + 1
        };
        let target = revision.min(limit);

        let mut evicted = 0;
        let mut freed = 0;
        while let Some(front) = self.entries.front() {
            if front.revision >= target { break; }
            let text = front.changeset.apply(&self.tail_text)?;
            freed += front.changeset.approx_size() + front.inverse.approx_size();

            self.tail_text = text;
            self.tail_revision = front.revision;
            self.entries.pop_front();
            evicted += 1;
        }

        if evicted > 0 {
            self.settle_local_index();
            debug!(evicted, tail = self.tail_revision, freed = %format_size(freed, DECIMAL), "evicted history");
        }
        Ok(evicted)
    }

    /// Splice a page of older records onto the tail of the history.
    ///
    /// The page must end exactly at the current tail revision, and replaying it on top of the
    /// page's base text must produce the current tail text.
    ///
    /// Own records appended earlier as undo / redo keep that origin. Anything else is treated as
    /// typing, including undo records made in an earlier session, which can then be undone.
    pub fn prepend_page(&mut self, page: RecordsPage) -> Result<usize, CollabError> {
        let RecordsPage { base_text, records } = page;
        let Some(first) = records.first() else { return Ok(0); };
        let first_revision = first.revision;

        if first_revision == 0 {
            return Err(CollabError::HistoryGap { expected: self.tail_revision, actual: 0 });
        }
        for (i, record) in records.iter().enumerate() {
            if record.revision != first_revision + i as Revision {
                return Err(CollabError::HistoryGap {
                    expected: first_revision + i as Revision,
                    actual: record.revision,
                });
            }
        }
        let last_revision = first_revision + records.len() as Revision - 1;
        if last_revision != self.tail_revision {
            return Err(CollabError::HistoryGap { expected: self.tail_revision, actual: last_revision });
        }

        let mut text = base_text.clone();
        let mut new_entries = Vec::with_capacity(records.len());
        for record in records {
            let inverse = record.changeset.invert(&text)?;
            text = record.changeset.apply(&text)?;
            let origin = if self.undo_redo.contains(&record.revision) {
                EntryOrigin::UndoRedo
            } else {
                EntryOrigin::Typing
            };
            new_entries.push(HistoryEntry::from_record(record, inverse, origin));
        }
        if text != self.tail_text {
            return Err(CollabError::PageMismatch { revision: self.tail_revision });
        }

        let count = new_entries.len();
        for entry in new_entries.into_iter().rev() {
            self.entries.push_front(entry);
        }
        self.tail_revision = first_revision - 1;
        self.tail_text = base_text;
        self.settle_local_index();

        trace!(count, tail = self.tail_revision, "prepended older records");
        Ok(count)
    }

    /// Rough memory used by cached changesets.
    pub fn approx_size(&self) -> usize {
        self.tail_text.len() + self.entries.iter()
            .map(|e| e.changeset.approx_size() + e.inverse.approx_size())
            .sum::<usize>()
    }

    /// Check the internal invariants. Panics if something is wrong. This is used by tests.
    #[allow(unused)]
    pub fn check(&self, head_text: &str) {
        let mut text = self.tail_text.clone();
        for (i, e) in self.entries.iter().enumerate() {
            assert_eq!(e.revision, self.tail_revision + 1 + i as Revision);
            let next = e.changeset.apply(&text).unwrap();
            assert_eq!(e.inverse.apply(&next).unwrap(), text);
            text = next;
        }
        assert_eq!(text, head_text);

        let expected_index = self.entries.iter()
            .rposition(|e| self.is_undoable(e))
            .map_or(-1, |i| i as isize);
        assert_eq!(self.local_index, expected_index);
    }
}

#[cfg(test)]
mod test {
    use smartstring::alias::String as SmartString;
    use crate::changeset::Changeset;
    use crate::error::CollabError;
    use crate::records::{RecordsPage, ServerRecord};
    use super::*;

    fn record(revision: Revision, author: &str, changeset: Changeset) -> ServerRecord {
        ServerRecord {
            revision,
            author: SmartString::from(author),
            changeset,
            before_selection: None,
            after_selection: None,
        }
    }

    /// Build a history for "me" from a list of (author, pos, text) insertions, starting from
    /// an empty document at revision 0.
    fn build(edits: &[(&str, usize, &str)]) -> (History, String) {
        let mut history = History::new("me".into(), 0, "");
        let mut text = String::new();
        for (i, (author, pos, ins)) in edits.iter().enumerate() {
            let op = Changeset::from_insertion(text.chars().count(), *pos, ins).unwrap();
            let inverse = op.invert(&text).unwrap();
            text = op.apply(&text).unwrap();
            history.append(record(i as Revision + 1, author, op), inverse, EntryOrigin::Typing).unwrap();
        }
        (history, text)
    }

    #[test]
    fn append_and_undo_own_entries() {
        let (mut history, text) = build(&[("me", 0, "a"), ("them", 1, "b"), ("me", 2, "c")]);
        history.check(&text);
        assert_eq!(history.head_revision(), 3);
        assert_eq!(history.local_index(), 2);

        assert_eq!(history.undo_entry().unwrap().revision, 3);
        assert_eq!(history.local_index(), 0);
        assert_eq!(history.undo_entry().unwrap().revision, 1);
        assert_eq!(history.local_index(), -1);
        assert!(history.undo_entry().is_none());

        history.mark_redone(1);
        assert_eq!(history.local_index(), 0);
        history.check(&text);
    }

    #[test]
    fn append_rejects_gaps() {
        let (mut history, _) = build(&[("me", 0, "a")]);
        let op = Changeset::from_insertion(1, 1, "b").unwrap();
        let inv = op.invert("a").unwrap();
        assert!(matches!(
            history.append(record(5, "me", op), inv, EntryOrigin::Typing),
            Err(CollabError::UnexpectedRevision { expected: 2, actual: 5 })
        ));
    }

    #[test]
    fn undo_redo_entries_are_not_targets() {
        let mut history = History::new("me".into(), 0, "");
        let op = Changeset::from_insertion(0, 0, "x").unwrap();
        let inv = op.invert("").unwrap();
        history.append(record(1, "me", op), inv, EntryOrigin::UndoRedo).unwrap();
        assert_eq!(history.local_index(), -1);
    }

    #[test]
    fn evict_keeps_reachable_entries() {
        let (mut history, text) = build(&[
            ("them", 0, "a"), ("me", 1, "b"), ("them", 2, "c"), ("them", 3, "d"),
        ]);
        // The own entry at revision 2 is still reachable, so we can only evict revision 1.
        assert_eq!(history.evict_before(4).unwrap(), 1);
        assert_eq!(history.tail_revision(), 1);
        assert_eq!(history.tail_text(), "a");
        assert_eq!(history.local_index(), 0);
        history.check(&text);

        history.undo_entry().unwrap();
        assert_eq!(history.evict_before(4).unwrap(), 2);
        assert_eq!(history.tail_text(), "abc");
        history.check(&text);
        // Evicted entries stay undone if they ever come back.
        assert!(history.is_undone(2));
    }

    #[test]
    fn prepend_older_page() {
        let (full, text) = build(&[("me", 0, "a"), ("them", 1, "b"), ("me", 2, "c")]);
        let records: Vec<ServerRecord> = full.iter().map(|e| ServerRecord {
            revision: e.revision,
            author: e.author.clone(),
            changeset: e.changeset.clone(),
            before_selection: None,
            after_selection: None,
        }).collect();

        // Start with only the last record cached.
        let mut history = History::new("me".into(), 2, "ab");
        let op = records[2].changeset.clone();
        history.append(records[2].clone(), op.invert("ab").unwrap(), EntryOrigin::Typing).unwrap();

        // A page which doesn't end at the tail is rejected.
        let bad = RecordsPage { base_text: String::new(), records: records[..1].to_vec() };
        assert!(matches!(history.prepend_page(bad), Err(CollabError::HistoryGap { .. })));

        // So is one that doesn't reproduce the tail text.
        let wrong = RecordsPage { base_text: "zz".into(), records: vec![] };
        assert_eq!(history.prepend_page(wrong).unwrap(), 0);
        let mut mangled = records[..2].to_vec();
        mangled[1].changeset = Changeset::from_insertion(1, 0, "b").unwrap();
        let wrong = RecordsPage { base_text: String::new(), records: mangled };
        assert!(matches!(history.prepend_page(wrong), Err(CollabError::PageMismatch { revision: 2 })));

        let page = RecordsPage { base_text: String::new(), records: records[..2].to_vec() };
        assert_eq!(history.prepend_page(page).unwrap(), 2);
        assert!(history.is_complete());
        assert_eq!(history.len(), 3);
        history.check(&text);
        assert_eq!(history.get(1).unwrap().inverse, full.get(1).unwrap().inverse);
    }

    #[test]
    fn refetched_undo_records_stay_undo_records() {
        let mut history = History::new("me".into(), 0, "");
        let records = [
            record(1, "me", Changeset::from_insertion(0, 0, "a").unwrap()),
            record(2, "me", Changeset::from_deletion(1, 0..1).unwrap()),
            record(3, "me", Changeset::from_insertion(0, 0, "b").unwrap()),
        ];
        let mut text = String::new();
        for (r, origin) in records.iter().zip([EntryOrigin::Typing, EntryOrigin::UndoRedo, EntryOrigin::Typing]) {
            let inverse = r.changeset.invert(&text).unwrap();
            text = r.changeset.apply(&text).unwrap();
            history.append(r.clone(), inverse, origin).unwrap();
        }

        assert_eq!(history.evict_before(3).unwrap(), 2);
        assert_eq!(history.tail_text(), "");

        let page = RecordsPage { base_text: String::new(), records: records[..2].to_vec() };
        assert_eq!(history.prepend_page(page).unwrap(), 2);
        assert_eq!(history.get(2).unwrap().origin, EntryOrigin::UndoRedo);
        history.check(&text);

        assert_eq!(history.undo_entry().unwrap().revision, 3);
        assert_eq!(history.undo_entry().unwrap().revision, 1);
        assert!(history.undo_entry().is_none());
    }

    #[test]
    fn entries_after() {
        let (history, _) = build(&[("me", 0, "a"), ("me", 1, "b"), ("me", 2, "c")]);
        let revs: Vec<Revision> = history.entries_after(1).map(|e| e.revision).collect();
        assert_eq!(revs, vec![2, 3]);
        assert_eq!(history.entries_after(3).count(), 0);
        assert_eq!(history.entries_after(0).count(), 3);
    }
}
