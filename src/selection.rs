use crate::changeset::Changeset;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A selection in a document, in chars. `start` may be after `end` for selections made
/// backwards - we don't normalize them because the anchor matters to the editor.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SelectionRange {
    pub start: usize,
    pub end: usize,
}

impl SelectionRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// A collapsed selection (a caret) at `pos`.
    pub fn caret(pos: usize) -> Self {
        Self { start: pos, end: pos }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Move this selection through a changeset so it stays pinned to the same logical place.
    ///
    /// This never fails. Both ends are mapped with [`Changeset::map_position`], so the result is
    /// always within the changeset's output document.
    pub fn map(&self, changeset: &Changeset) -> Self {
        Self {
            start: changeset.map_position(self.start),
            end: changeset.map_position(self.end),
        }
    }

    pub fn clamp(&self, len: usize) -> Self {
        Self {
            start: self.start.min(len),
            end: self.end.min(len),
        }
    }
}

/// Identifies a selection tracked by a [`CollabService`](crate::CollabService).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SelectionId(pub(crate) u32);

impl SelectionId {
    /// The local user's own caret. Always present.
    pub const CARET: SelectionId = SelectionId(0);
}
