//! A changeset is a walk over a source document which retains, deletes and inserts characters.
//! Its the value type everything else in this crate is built out of: local typing, submissions,
//! server records and history inverses are all changesets.
//!
//! Inserted text is stored separately from the components (in one string for the whole
//! changeset) so the components themselves stay small and `Copy`.

mod ot;

use std::fmt::{Display, Formatter};
use std::ops::Range;
use jumprope::JumpRope;
use smallvec::SmallVec;
use smartstring::alias::String as SmartString;

use crate::error::{check_len, CollabError};
use crate::unicount::{count_chars, skip_chars, take_first_chars};
pub use ot::{compose, transform, Side};
use Component::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Component {
    /// Copy this many chars from the source.
    Retain(usize),
    /// Skip this many chars in the source.
    Delete(usize),
    /// Emit this many chars from the changeset's inserted content.
    Insert(usize),
}

impl Component {
    pub fn len(&self) -> usize {
        match self {
            Retain(len) | Delete(len) | Insert(len) => *len,
        }
    }

    /// How much space this component takes up in the source document.
    pub fn pre_len(&self) -> usize {
        match self {
            Retain(len) | Delete(len) => *len,
            Insert(_) => 0,
        }
    }

    /// How much space this component takes up in the resulting document.
    pub fn post_len(&self) -> usize {
        match self {
            Retain(len) | Insert(len) => *len,
            Delete(_) => 0,
        }
    }

    pub(crate) fn with_len(&self, len: usize) -> Component {
        match self {
            Retain(_) => Retain(len),
            Delete(_) => Delete(len),
            Insert(_) => Insert(len),
        }
    }
}

/// A borrowed view of one run in a changeset, with the inserted text attached.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Op<'a> {
    Retain(usize),
    Delete(usize),
    Insert(&'a str),
}

/// An edit from a text of exactly `source_len` chars to a text of `target_len` chars.
///
/// Changesets are always kept in canonical form: no empty components, no two adjacent components
/// of the same kind, and inserts are always placed before an adjacent delete. This means two
/// changesets which do the same thing compare equal.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "Vec<WireOp>", into = "Vec<WireOp>"))]
pub struct Changeset {
    components: SmallVec<[Component; 4]>,
    content: SmartString,
    source_len: usize,
    target_len: usize,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// The changeset which leaves a document of `len` chars untouched.
    pub fn identity(len: usize) -> Self {
        let mut result = Self::new();
        result.retain(len);
        result
    }

    pub fn from_insertion(len: usize, pos: usize, text: &str) -> Result<Self, CollabError> {
        Self::from_replacement(len, pos..pos, text)
    }

    pub fn from_deletion(len: usize, range: Range<usize>) -> Result<Self, CollabError> {
        Self::from_replacement(len, range, "")
    }

    /// Replace the chars in `range` of a document `len` chars long with `text`.
    pub fn from_replacement(len: usize, range: Range<usize>, text: &str) -> Result<Self, CollabError> {
        if range.start > range.end || range.end > len {
            return Err(CollabError::OutOfBounds { pos: range.end.max(range.start), len });
        }

        let mut result = Self::new();
        result.retain(range.start);
        result.insert(text);
        result.delete(range.end - range.start);
        result.retain(len - range.end);
        Ok(result)
    }

    pub fn source_len(&self) -> usize { self.source_len }
    pub fn target_len(&self) -> usize { self.target_len }

    pub fn components(&self) -> &[Component] { &self.components }

    /// All the text inserted by this changeset, in document order.
    pub fn inserted_content(&self) -> &str { self.content.as_str() }

    /// True if applying this changeset never changes a document.
    pub fn is_identity(&self) -> bool {
        self.components.iter().all(|c| matches!(c, Retain(_)))
    }

    pub fn ops(&self) -> Ops<'_> {
        Ops {
            components: self.components.iter(),
            content: self.content.as_str(),
        }
    }

    pub fn retain(&mut self, len: usize) {
        if len == 0 { return; }
        self.source_len += len;
        self.target_len += len;
        if let Some(Retain(last)) = self.components.last_mut() {
            *last += len;
        } else {
            self.components.push(Retain(len));
        }
    }

    pub fn delete(&mut self, len: usize) {
        if len == 0 { return; }
        self.source_len += len;
        if let Some(Delete(last)) = self.components.last_mut() {
            *last += len;
        } else {
            self.components.push(Delete(len));
        }
    }

    pub fn insert(&mut self, text: &str) {
        self.push_insert(text, count_chars(text));
    }

    /// Same as insert, but the caller already knows the char length of the text.
    pub(crate) fn push_insert(&mut self, text: &str, len: usize) {
        debug_assert_eq!(count_chars(text), len);
        if len == 0 { return; }
        self.target_len += len;
        // Inserted content is always the last insert in the changeset, so it goes at the end.
        self.content.push_str(text);

        match self.components.last_mut() {
            Some(Insert(last)) => *last += len,
            Some(Delete(_)) => {
                // Inserts go before deletes at the same position.
                let del = self.components.pop();
                if let Some(Insert(last)) = self.components.last_mut() {
                    *last += len;
                } else {
                    self.components.push(Insert(len));
                }
                self.components.extend(del);
            }
            _ => self.components.push(Insert(len)),
        }
    }

    /// Apply this changeset to a string, producing the resulting document.
    pub fn apply(&self, text: &str) -> Result<String, CollabError> {
        check_len(self.source_len, count_chars(text))?;

        let mut old = text;
        let mut new_content = self.content.as_str();
        let mut result = String::with_capacity(text.len() + new_content.len());

        for c in &self.components {
            match *c {
                Retain(len) => result.push_str(take_first_chars(&mut old, len)),
                Delete(len) => skip_chars(&mut old, len),
                Insert(len) => result.push_str(take_first_chars(&mut new_content, len)),
            }
        }
        Ok(result)
    }

    /// Apply this changeset in place to a rope. This is how the view is kept up to date.
    pub fn apply_to_rope(&self, rope: &mut JumpRope) -> Result<(), CollabError> {
        check_len(self.source_len, rope.len_chars())?;

        let mut pos = 0;
        let mut new_content = self.content.as_str();
        for c in &self.components {
            match *c {
                Retain(len) => pos += len,
                Delete(len) => rope.remove(pos..pos + len),
                Insert(len) => {
                    rope.insert(pos, take_first_chars(&mut new_content, len));
                    pos += len;
                }
            }
        }
        Ok(())
    }

    /// Map a position in the source document to the closest position in the output.
    ///
    /// Positions inside retained text move with it. Positions inside deleted text collapse to the
    /// start of the deletion. Positions at an insertion point are pushed past the inserted text,
    /// so they never land inside text the user didn't type. This never fails: positions past the
    /// end of the source clamp to the end of the output.
    pub fn map_position(&self, pos: usize) -> usize {
        let mut old_pos = 0;
        let mut new_pos = 0;

        for c in &self.components {
            match *c {
                Retain(len) => {
                    if pos < old_pos + len {
                        return new_pos + (pos - old_pos);
                    }
                    old_pos += len;
                    new_pos += len;
                }
                Delete(len) => {
                    if pos < old_pos + len {
                        return new_pos;
                    }
                    old_pos += len;
                }
                Insert(len) => {
                    // The insert sits at old_pos, and pos >= old_pos here.
                    new_pos += len;
                }
            }
        }
        new_pos
    }

    /// Rough heap + inline size in bytes. Used for history stats.
    pub(crate) fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + if self.components.spilled() { self.components.capacity() * std::mem::size_of::<Component>() } else { 0 }
            + self.content.len()
    }
}

/// Iterator returned by [`Changeset::ops`].
#[derive(Debug, Clone)]
pub struct Ops<'a> {
    components: std::slice::Iter<'a, Component>,
    content: &'a str,
}

impl<'a> Iterator for Ops<'a> {
    type Item = Op<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(match *self.components.next()? {
            Retain(len) => Op::Retain(len),
            Delete(len) => Op::Delete(len),
            Insert(len) => Op::Insert(take_first_chars(&mut self.content, len)),
        })
    }
}

impl Display for Changeset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (i, op) in self.ops().enumerate() {
            if i > 0 { f.write_str(" ")?; }
            match op {
                Op::Retain(len) => write!(f, "={}", len)?,
                Op::Delete(len) => write!(f, "-{}", len)?,
                Op::Insert(s) => write!(f, "+{:?}", s)?,
            }
        }
        f.write_str("]")
    }
}

impl<'a> FromIterator<Op<'a>> for Changeset {
    fn from_iter<T: IntoIterator<Item = Op<'a>>>(iter: T) -> Self {
        let mut result = Self::new();
        for op in iter {
            match op {
                Op::Retain(len) => result.retain(len),
                Op::Delete(len) => result.delete(len),
                Op::Insert(s) => result.insert(s),
            }
        }
        result
    }
}

/// On the wire changesets use the same JSON shape as the text-unicode OT type: numbers retain,
/// strings insert and `{"d": n}` deletes.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WireOp {
    Retain(usize),
    Delete { d: usize },
    Insert(SmartString),
}

#[cfg(feature = "serde")]
impl From<Vec<WireOp>> for Changeset {
    fn from(ops: Vec<WireOp>) -> Self {
        let mut result = Self::new();
        for op in ops {
            match op {
                WireOp::Retain(len) => result.retain(len),
                WireOp::Delete { d } => result.delete(d),
                WireOp::Insert(s) => result.insert(&s),
            }
        }
        result
    }
}

#[cfg(feature = "serde")]
impl From<Changeset> for Vec<WireOp> {
    fn from(changeset: Changeset) -> Self {
        changeset.ops().map(|op| match op {
            Op::Retain(len) => WireOp::Retain(len),
            Op::Delete(len) => WireOp::Delete { d: len },
            Op::Insert(s) => WireOp::Insert(s.into()),
        }).collect()
    }
}
