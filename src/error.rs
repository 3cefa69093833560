use thiserror::Error;
use crate::encoding::ParseError;
use crate::Revision;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CollabError {
    /// A changeset was composed, transformed, inverted or applied against a text of the wrong
    /// length. This should never happen when the service's invariants hold.
    #[error("incompatible length: expected {expected} chars, got {actual}")]
    IncompatibleLength { expected: usize, actual: usize },

    #[error("position {pos} is out of bounds for a document of {len} chars")]
    OutOfBounds { pos: usize, len: usize },

    /// Undo (or redo) was requested but the history it needs isn't cached. Fetch older records
    /// and try again.
    #[error("no history available")]
    NoHistoryAvailable,

    /// The server acknowledged something other than what we submitted.
    #[error("acknowledgment mismatch: expected revision {expected_revision}, got {actual_revision}")]
    AcknowledgmentMismatch { expected_revision: Revision, actual_revision: Revision },

    /// An external change arrived out of order.
    #[error("unexpected revision: expected {expected}, got {actual}")]
    UnexpectedRevision { expected: Revision, actual: Revision },

    #[error("nothing has been submitted")]
    NothingSubmitted,

    /// The document must be resynchronized with the server before this can proceed.
    #[error("resynchronization required")]
    ResyncRequired,

    /// A page of older records didn't line up with the cached history.
    #[error("history gap: expected page ending at revision {expected}, got {actual}")]
    HistoryGap { expected: Revision, actual: Revision },

    #[error("older records don't reproduce the cached text at revision {revision}")]
    PageMismatch { revision: Revision },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("failed to fetch records: {0}")]
    Fetch(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CollabError {
    /// Errors after which the service has put itself into the resync-required state.
    pub fn requires_resync(&self) -> bool {
        matches!(self,
            CollabError::AcknowledgmentMismatch { .. }
            | CollabError::UnexpectedRevision { .. }
            | CollabError::ResyncRequired
        )
    }
}

pub(crate) fn check_len(expected: usize, actual: usize) -> Result<(), CollabError> {
    if expected == actual { Ok(()) } else {
        Err(CollabError::IncompatibleLength { expected, actual })
    }
}
