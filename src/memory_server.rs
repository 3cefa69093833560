//! An in-memory server which holds the authoritative record list for a document. This is what the
//! client talks to in tests and in the simulator. A real server would look the same from the
//! client's side.

use tracing::{debug, trace};

use crate::error::CollabError;
use crate::records::{FetchRequest, RecordSource, RecordsPage, ServerRecord};
use crate::service::Submission;
use crate::{Revision, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResult {
    Accepted(ServerRecord),
    /// The submission was based on an old revision. These are the records it missed.
    Rejected { missed: Vec<ServerRecord> },
}

#[derive(Debug, Clone)]
pub struct MemoryServer {
    /// texts[n] is the document at revision n.
    texts: Vec<String>,
    records: Vec<ServerRecord>,
}

impl MemoryServer {
    pub fn new(text: &str) -> Self {
        Self { texts: vec![text.into()], records: Vec::new() }
    }

    pub fn head_revision(&self) -> Revision { self.records.len() as Revision }

    pub fn text(&self) -> &str {
        self.text_at(self.head_revision()).unwrap_or_default()
    }

    pub fn text_at(&self, revision: Revision) -> Option<&str> {
        self.texts.get(revision as usize).map(|s| s.as_str())
    }

    /// Every record after `revision`.
    pub fn records_since(&self, revision: Revision) -> &[ServerRecord] {
        let start = (revision as usize).min(self.records.len());
        &self.records[start..]
    }

    /// A client joining the document gets the current revision and text.
    pub fn open_document(&self) -> (Revision, String) {
        (self.head_revision(), self.text().into())
    }

    pub fn submit(&mut self, author: &UserId, submission: Submission) -> Result<SubmitResult, CollabError> {
        let head = self.head_revision();
        if submission.base_revision > head {
            return Err(CollabError::UnexpectedRevision { expected: head, actual: submission.base_revision });
        }
        if submission.base_revision < head {
            let missed = self.records_since(submission.base_revision).to_vec();
            debug!(%author, base = submission.base_revision, head, "rejecting stale submission");
            return Ok(SubmitResult::Rejected { missed });
        }

        let text = submission.changeset.apply(self.text())?;
        let record = ServerRecord {
            revision: head + 1,
            author: author.clone(),
            changeset: submission.changeset,
            before_selection: submission.before_selection,
            after_selection: submission.after_selection,
        };
        trace!(%author, revision = record.revision, changeset = %record.changeset, "accepted");
        self.texts.push(text);
        self.records.push(record.clone());
        Ok(SubmitResult::Accepted(record))
    }
}

impl RecordSource for MemoryServer {
    type Error = CollabError;

    fn fetch_records(&mut self, request: &FetchRequest) -> Result<RecordsPage, CollabError> {
        let end = request.before_revision.saturating_sub(1).min(self.head_revision());
        let start = end.saturating_sub(request.count as Revision);

        let base_text = self.text_at(start)
            .ok_or(CollabError::HistoryGap { expected: start, actual: self.head_revision() })?
            .to_string();
        Ok(RecordsPage {
            base_text,
            records: self.records[start as usize..end as usize].to_vec(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::changeset::Changeset;

    fn submission(base_revision: Revision, changeset: Changeset) -> Submission {
        Submission { base_revision, changeset, before_selection: None, after_selection: None }
    }

    #[test]
    fn accept_and_reject() {
        let mut server = MemoryServer::new("ab");
        let alice: UserId = "alice".into();
        let bob: UserId = "bob".into();

        let first = server.submit(&alice, submission(0, Changeset::from_insertion(2, 1, "X").unwrap())).unwrap();
        assert!(matches!(first, SubmitResult::Accepted(ServerRecord { revision: 1, .. })));
        assert_eq!(server.text(), "aXb");

        let second = server.submit(&bob, submission(0, Changeset::from_insertion(2, 1, "Y").unwrap())).unwrap();
        match second {
            SubmitResult::Rejected { missed } => {
                assert_eq!(missed.len(), 1);
                assert_eq!(missed[0].author, alice);
            }
            _ => panic!("expected rejection"),
        }

        assert!(server.submit(&bob, submission(5, Changeset::identity(3))).is_err());
    }

    #[test]
    fn fetch_pages() {
        let mut server = MemoryServer::new("");
        let user: UserId = "u".into();
        for i in 0..5 {
            server.submit(&user, submission(i, Changeset::from_insertion(i as usize, i as usize, "x").unwrap())).unwrap();
        }

        let page = server.fetch_records(&FetchRequest { before_revision: 5, count: 2 }).unwrap();
        assert_eq!(page.base_text, "xx");
        assert_eq!(page.records.iter().map(|r| r.revision).collect::<Vec<_>>(), vec![3, 4]);

        let page = server.fetch_records(&FetchRequest { before_revision: 3, count: 10 }).unwrap();
        assert_eq!(page.base_text, "");
        assert_eq!(page.records.len(), 2);
    }
}
