//! The client side of a collaborative text document.
//!
//! A [`CollabService`] keeps four versions of the document consistent:
//!
//! - **server**: the text at `head_revision`, exactly as the server has it.
//! - **submitted**: a changeset on top of server which has been sent to the server but not yet
//!   acknowledged. At most one is in flight at a time.
//! - **local**: a changeset on top of submitted holding edits which haven't been sent yet.
//! - **view**: what the user sees, always `local(submitted(server))`.
//!
//! Changes from other users arrive as server records in revision order and are transformed past
//! submitted and local before being applied to the view.

use std::collections::BTreeMap;
use std::mem;
use std::ops::Range;
use jumprope::JumpRope;
use tracing::{debug, trace, warn};

use crate::changeset::{Changeset, Side};
use crate::encoding::{CollabSnapshot, SNAPSHOT_VERSION};
use crate::error::{check_len, CollabError};
use crate::event::{CollabEvent, Subscription, Topic};
use crate::history::{EntryOrigin, History};
use crate::options::CollabOptions;
use crate::records::{FetchRequest, RecordSource, RecordsPage, ServerRecord, UserRecords};
use crate::selection::{SelectionId, SelectionRange};
use crate::unicount::count_chars;
use crate::{Revision, UserId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A changeset ready to be sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Submission {
    /// The server revision the changeset applies to.
    pub base_revision: Revision,
    pub changeset: Changeset,
    pub before_selection: Option<SelectionRange>,
    pub after_selection: Option<SelectionRange>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ResyncOutcome {
    /// Unacknowledged local edits survived the resync.
    KeptLocal,
    /// The server text didn't line up with our state, so unacknowledged edits were thrown away.
    DiscardedLocal,
}

/// Where a service is in the submit / acknowledge cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    PendingLocal,
    InFlight,
    InFlightWithPending,
}

#[derive(Debug, Clone)]
struct Submitted {
    changeset: Changeset,
    /// Did any of this come from typing? If not, its undo / redo only.
    has_typing: bool,
    before_selection: Option<SelectionRange>,
    after_selection: Option<SelectionRange>,
}

/// Redo entries are kept rebased so they always apply to the current view.
#[derive(Debug, Clone)]
struct RedoEntry {
    revision: Revision,
    changeset: Changeset,
}

#[derive(Debug)]
pub struct CollabService {
    user: UserId,
    options: CollabOptions,

    head_revision: Revision,
    server: String,
    submitted: Option<Submitted>,
    /// Applies to the document after submitted. Identity when there's nothing local.
    local: Changeset,
    local_has_typing: bool,
    /// The caret when local was last empty.
    local_before_selection: Option<SelectionRange>,
    view: JumpRope,

    history: History,
    redo_stack: Vec<RedoEntry>,
    /// Inverses of redone entries, kept rebased to the view. Undoing a redone entry uses these
    /// instead of rebasing the entry's original inverse, which the undo and redo would cancel out.
    redone: BTreeMap<Revision, Changeset>,

    selections: BTreeMap<SelectionId, SelectionRange>,
    next_selection_id: u32,

    pending_fetch: Option<FetchRequest>,
    needs_resync: bool,

    events: Topic,
}

impl CollabService {
    /// Open a document which is at `revision` on the server with the given text.
    pub fn new(user: impl Into<UserId>, revision: Revision, text: &str, options: CollabOptions) -> Self {
        let user = user.into();
        debug!(user = %user, revision, "opening document");

        let mut selections = BTreeMap::new();
        selections.insert(SelectionId::CARET, SelectionRange::caret(0));

        Self {
            history: History::new(user.clone(), revision, text),
            user,
            options,
            head_revision: revision,
            server: text.into(),
            submitted: None,
            local: Changeset::identity(count_chars(text)),
            local_has_typing: false,
            local_before_selection: None,
            view: JumpRope::from(text),
            redo_stack: Vec::new(),
            redone: BTreeMap::new(),
            selections,
            next_selection_id: 1,
            pending_fetch: None,
            needs_resync: false,
            events: Topic::default(),
        }
    }

    /// Bring back a service from a snapshot. A submission which was in flight when the snapshot
    /// was taken is still in flight, and should be sent again (see
    /// [`pending_submission`](Self::pending_submission)).
    pub fn from_snapshot(user: impl Into<UserId>, options: CollabOptions, snapshot: CollabSnapshot) -> Result<Self, CollabError> {
        snapshot.validate()?;
        let CollabSnapshot { head_revision, server_text, submitted, local, .. } = snapshot;

        let mut result = Self::new(user, head_revision, &server_text, options);
        if let Some(changeset) = submitted {
            changeset.apply_to_rope(&mut result.view)?;
            result.submitted = Some(Submitted {
                changeset,
                has_typing: true,
                before_selection: None,
                after_selection: None,
            });
            result.local = Changeset::identity(result.view.len_chars());
        }
        if let Some(local) = local {
            local.apply_to_rope(&mut result.view)?;
            result.local_has_typing = !local.is_identity();
            result.local = local;
        }
        debug!(revision = head_revision, in_flight = result.submitted.is_some(), "restored from snapshot");
        result.debug_check();
        Ok(result)
    }

    pub fn snapshot(&self) -> CollabSnapshot {
        CollabSnapshot {
            version: SNAPSHOT_VERSION,
            head_revision: self.head_revision,
            server_text: self.server.clone(),
            submitted: self.submitted.as_ref().map(|s| s.changeset.clone()),
            local: if self.local.is_identity() { None } else { Some(self.local.clone()) },
        }
    }

    pub fn user(&self) -> &UserId { &self.user }

    pub fn options(&self) -> &CollabOptions { &self.options }

    pub fn head_revision(&self) -> Revision { self.head_revision }

    /// The document at `head_revision`.
    pub fn server_text(&self) -> &str { &self.server }

    pub fn submitted(&self) -> Option<&Changeset> {
        self.submitted.as_ref().map(|s| &s.changeset)
    }

    pub fn local(&self) -> &Changeset { &self.local }

    pub fn view(&self) -> &JumpRope { &self.view }

    pub fn view_text(&self) -> String { self.view.to_string() }

    pub fn view_len(&self) -> usize { self.view.len_chars() }

    pub fn history(&self) -> &History { &self.history }

    pub fn records(&self) -> UserRecords<'_> { UserRecords::new(&self.history) }

    pub fn needs_resync(&self) -> bool { self.needs_resync }

    pub fn sync_state(&self) -> SyncState {
        match (self.submitted.is_some(), !self.local.is_identity()) {
            (false, false) => SyncState::Synced,
            (false, true) => SyncState::PendingLocal,
            (true, false) => SyncState::InFlight,
            (true, true) => SyncState::InFlightWithPending,
        }
    }

    pub fn subscribe(&mut self) -> Subscription {
        self.events.subscribe()
    }

    fn emit(&mut self, event: CollabEvent) {
        self.events.publish(event);
    }

    fn require_resync(&mut self, err: CollabError) -> CollabError {
        warn!(user = %self.user, %err, "resync required");
        if !self.needs_resync {
            self.needs_resync = true;
            self.emit(CollabEvent::ResyncRequired);
        }
        err
    }

    /// Length of the document local applies to.
    fn base_len(&self) -> usize {
        self.local.source_len()
    }

    // *** Selections ***

    pub fn caret(&self) -> SelectionRange {
        self.selections.get(&SelectionId::CARET).copied().unwrap_or_default()
    }

    pub fn set_caret(&mut self, range: SelectionRange) -> Result<(), CollabError> {
        self.set_selection(SelectionId::CARET, range)
    }

    /// Start tracking a selection. It'll be moved with every change to the view.
    pub fn track_selection(&mut self, range: SelectionRange) -> Result<SelectionId, CollabError> {
        self.check_selection(range)?;
        let id = SelectionId(self.next_selection_id);
        self.next_selection_id += 1;
        self.selections.insert(id, range);
        Ok(id)
    }

    pub fn selection(&self, id: SelectionId) -> Option<SelectionRange> {
        self.selections.get(&id).copied()
    }

    pub fn set_selection(&mut self, id: SelectionId, range: SelectionRange) -> Result<(), CollabError> {
        self.check_selection(range)?;
        if self.selections.insert(id, range) != Some(range) {
            self.emit(CollabEvent::SelectionChanged { id, range });
        }
        Ok(())
    }

    /// Stop tracking a selection. The caret can't be untracked.
    pub fn untrack_selection(&mut self, id: SelectionId) -> Option<SelectionRange> {
        if id == SelectionId::CARET { return None; }
        self.selections.remove(&id)
    }

    fn check_selection(&self, range: SelectionRange) -> Result<(), CollabError> {
        let len = self.view_len();
        let pos = range.start.max(range.end);
        if pos > len { Err(CollabError::OutOfBounds { pos, len }) } else { Ok(()) }
    }

    fn map_selections(&mut self, changeset: &Changeset) {
        for (id, range) in self.selections.iter_mut() {
            let mapped = range.map(changeset);
            if mapped != *range {
                *range = mapped;
                self.events.publish(CollabEvent::SelectionChanged { id: *id, range: mapped });
            }
        }
    }

    fn rebase_redo_stack(&self, changeset: &Changeset) -> Result<Vec<RedoEntry>, CollabError> {
        rebase_redo_entries(&self.redo_stack, changeset)
    }

    fn rebase_redone(&self, changeset: &Changeset) -> Result<BTreeMap<Revision, Changeset>, CollabError> {
        self.redone.iter()
            .map(|(rev, inverse)| Ok((*rev, inverse.transform(changeset, Side::Right)?)))
            .collect()
    }

    /// Compose a change onto local and the view. The change must already be checked against the
    /// view length.
    fn push_local(&mut self, change: &Changeset) -> Result<(), CollabError> {
        let new_local = self.local.compose(change)?;
        change.apply_to_rope(&mut self.view)?;
        if self.local.is_identity() {
            self.local_before_selection = Some(self.caret());
        }
        self.local = new_local;
        Ok(())
    }

    // *** Typing ***

    /// Apply an edit the user made to the view.
    pub fn apply_typing_operation(&mut self, change: Changeset) -> Result<(), CollabError> {
        check_len(self.view_len(), change.source_len())?;
        if change.is_identity() { return Ok(()); }

        let new_redone = self.rebase_redone(&change)?;
        self.push_local(&change)?;
        self.redone = new_redone;
        self.local_has_typing = true;
        if !self.redo_stack.is_empty() {
            trace!(count = self.redo_stack.len(), "typing cleared redo stack");
            self.redo_stack.clear();
        }

        trace!(user = %self.user, %change, "applied typing");
        self.emit(CollabEvent::AppliedTypingOperation { changeset: change.clone() });
        self.emit(CollabEvent::ViewChanged { changeset: change.clone() });
        self.map_selections(&change);
        self.debug_check();
        Ok(())
    }

    pub fn insert(&mut self, pos: usize, text: &str) -> Result<(), CollabError> {
        let change = Changeset::from_insertion(self.view_len(), pos, text)?;
        self.apply_typing_operation(change)
    }

    pub fn delete(&mut self, range: Range<usize>) -> Result<(), CollabError> {
        let change = Changeset::from_deletion(self.view_len(), range)?;
        self.apply_typing_operation(change)
    }

    pub fn replace(&mut self, range: Range<usize>, text: &str) -> Result<(), CollabError> {
        let change = Changeset::from_replacement(self.view_len(), range, text)?;
        self.apply_typing_operation(change)
    }

    // *** Submitting ***

    /// Move local changes into flight. Returns `None` if there's nothing to send, a submission is
    /// already in flight or a resync is needed first.
    pub fn submit_changes(&mut self) -> Option<Submission> {
        if self.submitted.is_some() || self.needs_resync || self.local.is_identity() {
            return None;
        }

        let len = self.local.target_len();
        let changeset = mem::replace(&mut self.local, Changeset::identity(len));
        let submitted = Submitted {
            changeset,
            has_typing: mem::take(&mut self.local_has_typing),
            before_selection: self.local_before_selection.take(),
            after_selection: Some(self.caret()),
        };
        let submission = self.make_submission(&submitted);
        self.submitted = Some(submitted);

        debug!(user = %self.user, base = self.head_revision, changeset = %submission.changeset, "submitting");
        self.emit(CollabEvent::SubmittedRecord {
            base_revision: submission.base_revision,
            changeset: submission.changeset.clone(),
        });
        Some(submission)
    }

    fn make_submission(&self, submitted: &Submitted) -> Submission {
        Submission {
            base_revision: self.head_revision,
            changeset: submitted.changeset.clone(),
            before_selection: submitted.before_selection,
            after_selection: submitted.after_selection,
        }
    }

    /// The submission currently in flight, if any. Use this to send it again after a reconnect or
    /// after restoring a snapshot.
    pub fn pending_submission(&self) -> Option<Submission> {
        self.submitted.as_ref().map(|s| self.make_submission(s))
    }

    /// The server accepted our submission as `record`.
    pub fn submitted_changes_acknowledged(&mut self, record: ServerRecord) -> Result<(), CollabError> {
        if self.needs_resync { return Err(CollabError::ResyncRequired); }
        let submitted = self.submitted.take().ok_or(CollabError::NothingSubmitted)?;

        let expected_revision = self.head_revision + 1;
        let ours = &submitted.changeset;
        let matches = record.revision == expected_revision
            && record.changeset.source_len() == ours.source_len()
            && record.changeset.target_len() == ours.target_len()
            && (record.changeset == *ours
                || (!self.options.strict_acknowledgments && same_result(&record.changeset, ours, &self.server)));

        if !matches {
            warn!(expected_revision, actual_revision = record.revision, "acknowledgment doesn't match submission");
            self.submitted = Some(submitted);
            return Err(self.require_resync(CollabError::AcknowledgmentMismatch {
                expected_revision,
                actual_revision: record.revision,
            }));
        }

        let inverse = ours.invert(&self.server)?;
        self.server = ours.apply(&self.server)?;
        self.head_revision = record.revision;

        let origin = if submitted.has_typing { EntryOrigin::Typing } else { EntryOrigin::UndoRedo };
        let record = ServerRecord {
            revision: record.revision,
            author: self.user.clone(),
            changeset: submitted.changeset,
            before_selection: record.before_selection.or(submitted.before_selection),
            after_selection: record.after_selection.or(submitted.after_selection),
        };
        self.history.append(record, inverse, origin)?;

        debug!(user = %self.user, revision = self.head_revision, "submission acknowledged");
        self.emit(CollabEvent::SubmittedChangesAcknowledged { revision: self.head_revision });
        self.emit(CollabEvent::HeadRevisionChanged { revision: self.head_revision });
        self.trim_history()?;
        self.debug_check();
        Ok(())
    }

    /// The server refused our submission because it was based on an old revision. `missed`
    /// holds every record since the submission's base revision. Records which already arrived
    /// as external changes are skipped. Once the rest are merged in, the submission is folded
    /// back into local changes so it can be sent again.
    pub fn submission_rejected(&mut self, missed: Vec<ServerRecord>) -> Result<(), CollabError> {
        if self.submitted.is_none() { return Err(CollabError::NothingSubmitted); }

        let mut count = 0;
        for record in missed {
            if record.revision <= self.head_revision { continue; }
            self.handle_external_change(record)?;
            count += 1;
        }

        if let Some(submitted) = self.submitted.as_ref() {
            let new_local = submitted.changeset.compose(&self.local)?;
            let submitted = self.submitted.take().ok_or(CollabError::NothingSubmitted)?;
            self.local = new_local;
            self.local_has_typing |= submitted.has_typing;
            self.local_before_selection = submitted.before_selection.or(self.local_before_selection);
        }

        debug!(user = %self.user, missed = count, "submission rejected");
        self.emit(CollabEvent::SubmissionRejected { missed: count });
        self.debug_check();
        Ok(())
    }

    // *** Remote changes ***

    /// Merge in a record made by someone else.
    pub fn handle_external_change(&mut self, record: ServerRecord) -> Result<(), CollabError> {
        if self.needs_resync { return Err(CollabError::ResyncRequired); }

        let expected = self.head_revision + 1;
        if record.revision != expected {
            return Err(self.require_resync(CollabError::UnexpectedRevision { expected, actual: record.revision }));
        }
        let remote = &record.changeset;
        check_len(count_chars(&self.server), remote.source_len())?;

        // The remote change always wins ties. Its already been accepted by the server.
        let (new_submitted, r1) = match &self.submitted {
            Some(p) => (
                Some(p.changeset.transform(remote, Side::Right)?),
                remote.transform(&p.changeset, Side::Left)?,
            ),
            None => (None, remote.clone()),
        };
        let new_local = self.local.transform(&r1, Side::Right)?;
        let r2 = r1.transform(&self.local, Side::Left)?;

        let inverse = remote.invert(&self.server)?;
        let new_server = remote.apply(&self.server)?;
        let new_redo = self.rebase_redo_stack(&r2)?;
        let new_redone = self.rebase_redone(&r2)?;

        // The author's selection is in server coordinates. Move it into the view.
        let remote_selection = record.after_selection.map(|sel| {
            let sel = match &new_submitted {
                Some(p) => sel.map(p),
                None => sel,
            };
            sel.map(&new_local)
        });

        r2.apply_to_rope(&mut self.view)?;
        self.server = new_server;
        if let (Some(s), Some(p)) = (self.submitted.as_mut(), new_submitted) {
            s.changeset = p;
        }
        self.local = new_local;
        self.redo_stack = new_redo;
        self.redone = new_redone;
        self.head_revision = record.revision;

        let revision = record.revision;
        let author = record.author.clone();
        self.history.append(record, inverse, EntryOrigin::Typing)?;

        trace!(user = %self.user, revision, %author, changeset = %r2, "handled external change");
        self.emit(CollabEvent::HandledExternalChanges {
            revision,
            author,
            changeset: r2.clone(),
            selection: remote_selection,
        });
        self.emit(CollabEvent::HeadRevisionChanged { revision });
        if !r2.is_identity() {
            self.emit(CollabEvent::ViewChanged { changeset: r2.clone() });
        }
        self.map_selections(&r2);
        self.trim_history()?;
        self.debug_check();
        Ok(())
    }

    fn trim_history(&mut self) -> Result<(), CollabError> {
        let max = self.options.max_cached_records;
        if self.history.len() > max {
            let keep_from = self.head_revision.saturating_sub(max as Revision) + 1;
            self.history.evict_before(keep_from)?;
        }
        Ok(())
    }

    // *** Undo / redo ***

    pub fn can_undo(&self) -> bool { self.history.local_index() >= 0 }

    pub fn can_redo(&self) -> bool { !self.redo_stack.is_empty() }

    /// The revision of the entry redo would reapply.
    pub fn redo_target(&self) -> Option<Revision> {
        self.redo_stack.last().map(|e| e.revision)
    }

    /// Undo the most recent of our own edits which hasn't been undone yet.
    ///
    /// Returns [`CollabError::NoHistoryAvailable`] if there's nothing cached to undo. In that case
    /// nothing is changed. Fetching older records may make more undos possible.
    pub fn undo(&mut self) -> Result<(), CollabError> {
        let entry = self.history.undo_target().ok_or(CollabError::NoHistoryAvailable)?;
        let revision = entry.revision;

        let (inverse, before) = if let Some(inverse) = self.redone.get(&revision) {
            // Already in view coordinates. The caret just follows the change.
            (inverse.clone(), None)
        } else {
            // The inverse applies to the document at the entry's revision. Rebase it past
            // everything since, so it applies to the view.
            let mut inverse = entry.inverse.clone();
            let mut before = entry.before_selection.map(|s| s.map(&entry.changeset));
            for later in self.history.entries_after(revision) {
                inverse = inverse.transform(&later.changeset, Side::Right)?;
                before = before.map(|s| s.map(&later.changeset));
            }
            if let Some(p) = &self.submitted {
                inverse = inverse.transform(&p.changeset, Side::Right)?;
                before = before.map(|s| s.map(&p.changeset));
            }
            inverse = inverse.transform(&self.local, Side::Right)?;
            let before = before.map(|s| s.map(&self.local).map(&inverse));
            (inverse, before)
        };

        let redo = inverse.invert(&self.view.to_string())?;
        let mut new_redo = self.rebase_redo_stack(&inverse)?;
        new_redo.push(RedoEntry { revision, changeset: redo });
        let mut new_redone = self.rebase_redone(&inverse)?;
        new_redone.remove(&revision);

        self.push_local(&inverse)?;
        self.history.undo_entry();
        self.redo_stack = new_redo;
        self.redone = new_redone;

        debug!(user = %self.user, revision, changeset = %inverse, "undo");
        self.emit(CollabEvent::AppliedUndo { revision, changeset: inverse.clone() });
        if !inverse.is_identity() {
            self.emit(CollabEvent::ViewChanged { changeset: inverse.clone() });
        }
        self.map_selections(&inverse);
        if let Some(before) = before {
            self.set_caret(before.clamp(self.view_len()))?;
        }
        self.prefetch_history();
        self.debug_check();
        Ok(())
    }

    /// Reapply the most recently undone edit.
    pub fn redo(&mut self) -> Result<(), CollabError> {
        let entry = self.redo_stack.last().ok_or(CollabError::NoHistoryAvailable)?;
        let revision = entry.revision;
        let change = entry.changeset.clone();
        check_len(self.view_len(), change.source_len())?;

        // Undoing this again needs the inverse of what was actually applied.
        let inverse = change.invert(&self.view.to_string())?;
        let mut new_redone = self.rebase_redone(&change)?;
        new_redone.insert(revision, inverse);
        let rest = &self.redo_stack[..self.redo_stack.len() - 1];
        let new_redo = rebase_redo_entries(rest, &change)?;

        self.push_local(&change)?;
        self.redo_stack = new_redo;
        self.redone = new_redone;
        self.history.mark_redone(revision);

        debug!(user = %self.user, revision, %change, "redo");
        self.emit(CollabEvent::AppliedRedo { revision, changeset: change.clone() });
        if !change.is_identity() {
            self.emit(CollabEvent::ViewChanged { changeset: change.clone() });
        }
        self.map_selections(&change);
        self.debug_check();
        Ok(())
    }

    // *** History fetching ***

    fn prefetch_history(&mut self) {
        if let Some(request) = self.request_older_records() {
            debug!(before = request.before_revision, count = request.count, "undo history running low");
        }
    }

    /// A fetch which has been requested but not received yet.
    pub fn pending_fetch(&self) -> Option<FetchRequest> { self.pending_fetch }

    /// Work out what older records to fetch so we can keep undoing. Returns `None` if enough
    /// are cached, history is complete, or a fetch is already pending.
    pub fn request_older_records(&mut self) -> Option<FetchRequest> {
        if self.pending_fetch.is_some() { return None; }

        let request = self.records().fetch_request(
            self.head_revision + 1,
            self.options.undo_prefetch.max(1),
            self.options.fetch_page_size,
        )?;
        self.pending_fetch = Some(request);
        Some(request)
    }

    /// Splice a page of older records into the history.
    pub fn receive_records_page(&mut self, page: RecordsPage) -> Result<usize, CollabError> {
        self.pending_fetch = None;
        let count = self.history.prepend_page(page)?;
        let tail_revision = self.history.tail_revision();

        debug!(count, tail_revision, "loaded older records");
        self.emit(CollabEvent::RecordsLoaded { count, tail_revision });
        Ok(count)
    }

    /// Fetch older records from `source` if undo needs them. Returns how many were loaded.
    pub fn fetch_older_records<S: RecordSource>(&mut self, source: &mut S) -> Result<usize, CollabError> {
        let request = match self.pending_fetch {
            Some(request) => request,
            None => match self.request_older_records() {
                Some(request) => request,
                None => return Ok(0),
            },
        };

        match source.fetch_records(&request) {
            Ok(page) => self.receive_records_page(page),
            Err(err) => {
                self.pending_fetch = None;
                Err(CollabError::Fetch(Box::new(err)))
            }
        }
    }

    // *** Resync ***

    /// Reset to a fresh copy of the server's document. Unacknowledged changes are kept if they
    /// still make sense on top of `text`.
    pub fn resynchronize(&mut self, revision: Revision, text: &str) -> Result<ResyncOutcome, CollabError> {
        let landed = match &self.submitted {
            Some(p) => Some(p.changeset.apply(&self.server)?),
            None => None,
        };

        let outcome = if landed.as_deref() == Some(text) {
            // Our submission made it in before the connection dropped.
            self.submitted = None;
            ResyncOutcome::KeptLocal
        } else if text == self.server {
            if let Some(p) = self.submitted.as_ref() {
                let new_local = p.changeset.compose(&self.local)?;
                if let Some(p) = self.submitted.take() {
                    self.local_has_typing |= p.has_typing;
                    self.local_before_selection = p.before_selection.or(self.local_before_selection);
                }
                self.local = new_local;
            }
            ResyncOutcome::KeptLocal
        } else {
            let old_len = self.view_len();
            let change = Changeset::from_replacement(old_len, 0..old_len, text)?;
            self.submitted = None;
            self.local = Changeset::identity(count_chars(text));
            self.local_has_typing = false;
            self.local_before_selection = None;
            self.view = JumpRope::from(text);

            self.emit(CollabEvent::ViewChanged { changeset: change });
            let len = self.view_len();
            for (id, range) in self.selections.iter_mut() {
                let clamped = range.clamp(len);
                if clamped != *range {
                    *range = clamped;
                    self.events.publish(CollabEvent::SelectionChanged { id: *id, range: clamped });
                }
            }
            ResyncOutcome::DiscardedLocal
        };

        self.server = text.into();
        self.head_revision = revision;
        self.history = History::new(self.user.clone(), revision, text);
        self.redo_stack.clear();
        self.redone.clear();
        self.pending_fetch = None;
        self.needs_resync = false;

        debug!(user = %self.user, revision, ?outcome, "resynchronized");
        self.emit(CollabEvent::Resynchronized { revision, outcome });
        self.emit(CollabEvent::HeadRevisionChanged { revision });
        self.debug_check();
        Ok(outcome)
    }

    // *** Consistency ***

    /// Check the internal invariants. Panics if something is wrong. This is used by tests.
    #[allow(unused)]
    pub fn check(&self) {
        let expected = self.expected_view()
            .unwrap_or_else(|err| panic!("changesets don't line up with the server text: {err}"));
        assert_eq!(self.view.to_string(), expected);
        assert_eq!(self.local.target_len(), self.view_len());
        assert_eq!(self.base_len(), match &self.submitted {
            Some(p) => p.changeset.target_len(),
            None => count_chars(&self.server),
        });

        assert_eq!(self.history.head_revision(), self.head_revision);
        self.history.check(&self.server);

        for entry in &self.redo_stack {
            assert_eq!(entry.changeset.source_len(), self.view_len());
        }
        for (revision, inverse) in &self.redone {
            assert_eq!(inverse.source_len(), self.view_len());
            assert!(!self.history.is_undone(*revision));
        }
        for range in self.selections.values() {
            assert!(range.start <= self.view_len() && range.end <= self.view_len());
        }
        assert!(self.selections.contains_key(&SelectionId::CARET));
    }

    fn expected_view(&self) -> Result<String, CollabError> {
        let base = match &self.submitted {
            Some(p) => p.changeset.apply(&self.server)?,
            None => self.server.clone(),
        };
        self.local.apply(&base)
    }

    fn debug_check(&self) {
        if cfg!(debug_assertions) {
            debug_assert_eq!(self.local.target_len(), self.view_len());
            debug_assert_eq!(self.history.head_revision(), self.head_revision);
        }
    }
}

fn rebase_redo_entries(entries: &[RedoEntry], changeset: &Changeset) -> Result<Vec<RedoEntry>, CollabError> {
    entries.iter().map(|e| Ok(RedoEntry {
        revision: e.revision,
        changeset: e.changeset.transform(changeset, Side::Right)?,
    })).collect()
}

/// Do two changesets turn `text` into the same document?
fn same_result(a: &Changeset, b: &Changeset, text: &str) -> bool {
    matches!((a.apply(text), b.apply(text)), (Ok(x), Ok(y)) if x == y)
}
