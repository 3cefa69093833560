//! Transform, compose and invert for changesets.
//!
//! Both transform and compose walk one changeset while consuming the other in chunks. The chunk
//! size we can take depends on whether we're looking at the document before or after the
//! changeset being consumed, hence [`Context`].
//!
//! Note transform is not closed under compose. See this document for more detail:
//! https://github.com/ottypes/text-unicode/blob/master/NOTES.md

use crate::changeset::{Changeset, Component};
use crate::error::{check_len, CollabError};
use crate::unicount::{count_chars, skip_chars, take_first_chars};
use Component::*;

/// Which side of a concurrent pair a changeset is on. When both sides insert at the same
/// position, the left side's text ends up first.
///
/// This needs to be decided the same way on every peer, or documents diverge.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Side { Left, Right }

impl Side {
    pub fn flip(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
enum Context { Pre, Post }

impl Component {
    // How much space this element takes up in the string in the given context.
    fn ctx_len(&self, ctx: Context) -> usize {
        match ctx {
            Context::Pre => self.pre_len(),
            Context::Post => self.post_len(),
        }
    }
}

struct ComponentIter<'a> {
    components: &'a [Component],

    ctx: Context,
    idx: usize,
    offset: usize,
}

// I'd love to use a normal rust iterator here, but we need to pass in a limit
// parameter each time we poll the iterator.
impl<'a> ComponentIter<'a> {
    fn new(components: &'a [Component], ctx: Context) -> Self {
        Self { components, ctx, idx: 0, offset: 0 }
    }

    fn is_done(&self) -> bool {
        self.idx == self.components.len()
    }

    fn next(&mut self, max_size: usize) -> Component {
        // The lengths of both sides are checked up front, so this only happens when we peek for
        // a zero sized chunk at the end.
        if self.is_done() { return Retain(max_size); }

        let c = self.components[self.idx];
        let clen = c.ctx_len(self.ctx);

        if clen == 0 {
            // The component is invisible in the context.
            debug_assert_eq!(self.offset, 0);
            self.idx += 1;
            c
        } else if clen - self.offset <= max_size {
            // Take remainder of component.
            let result = c.with_len(clen - self.offset);
            self.idx += 1;
            self.offset = 0;
            result
        } else {
            // Take max_size of the component.
            let result = c.with_len(max_size);
            self.offset += max_size;
            result
        }
    }
}

fn push_chunk(result: &mut Changeset, chunk: Component, content: &mut &str) {
    match chunk {
        Retain(len) => result.retain(len),
        Delete(len) => result.delete(len),
        Insert(len) => result.push_insert(take_first_chars(content, len), len),
    }
}

/// Transform `op` so it can be applied after `other`. Both must apply to the same document.
///
/// `side` says which way to break ties when both insert at the same location. The usual contract
/// holds: `compose(other, transform(op, other, s)) == compose(op, transform(other, op, s.flip()))`.
pub fn transform(op: &Changeset, other: &Changeset, side: Side) -> Result<Changeset, CollabError> {
    check_len(op.source_len, other.source_len)?;

    let mut result = Changeset::new();
    let mut iter = ComponentIter::new(&op.components, Context::Pre);
    // Inserted content is never dropped or reordered by a transform, so we just walk it.
    let mut content = op.content.as_str();

    for c in &other.components {
        match *c {
            Retain(mut len) => { // Copy input to output.
                while len > 0 {
                    let chunk = iter.next(len);
                    len -= chunk.pre_len();
                    push_chunk(&mut result, chunk, &mut content);
                }
            }

            Delete(mut len) => {
                while len > 0 {
                    let chunk = iter.next(len);
                    len -= chunk.pre_len();

                    // Discard all chunks except for inserts. The other op already removed it.
                    if let Insert(_) = chunk {
                        push_chunk(&mut result, chunk, &mut content);
                    }
                }
            }

            Insert(len) => {
                // Left's insert should go first.
                if side == Side::Left {
                    let chunk = iter.next(0);
                    push_chunk(&mut result, chunk, &mut content);
                }

                // Skip the text that other inserted.
                result.retain(len);
            }
        }
    }

    while !iter.is_done() {
        let chunk = iter.next(usize::MAX);
        push_chunk(&mut result, chunk, &mut content);
    }

    debug_assert_eq!(result.source_len, other.target_len);
    Ok(result)
}

/// Compose two changesets together. `a` is applied first, then `b`.
///
/// This operates on the changesets themselves rather than just the components because the
/// inserted strings may be modified as a result. (Eg if the first changeset inserts, and the
/// second deletes the newly inserted content).
pub fn compose(a: &Changeset, b: &Changeset) -> Result<Changeset, CollabError> {
    check_len(a.target_len, b.source_len)?;

    let mut result = Changeset::new();
    let mut iter = ComponentIter::new(&a.components, Context::Post);
    let mut a_content = a.content.as_str();
    let mut b_content = b.content.as_str();

    for c in &b.components {
        match *c {
            Retain(mut len) => {
                // Copy len from a.
                while len > 0 {
                    let chunk = iter.next(len);
                    len -= chunk.post_len();
                    push_chunk(&mut result, chunk, &mut a_content);
                }
            }

            Delete(mut len) => {
                // Skip len items in a.
                while len > 0 {
                    let chunk = iter.next(len);
                    len -= chunk.post_len();
                    match chunk {
                        Retain(n) | Delete(n) => result.delete(n),
                        // Cancel inserts.
                        Insert(n) => skip_chars(&mut a_content, n),
                    }
                }
            }

            Insert(len) => {
                result.push_insert(take_first_chars(&mut b_content, len), len);
            }
        }
    }

    // Anything left over in a is invisible in the output - so it can only be deletes.
    while !iter.is_done() {
        let chunk = iter.next(usize::MAX);
        debug_assert!(matches!(chunk, Delete(_)));
        push_chunk(&mut result, chunk, &mut a_content);
    }

    debug_assert_eq!(result.source_len, a.source_len);
    debug_assert_eq!(result.target_len, b.target_len);
    Ok(result)
}

impl Changeset {
    /// Compose `other` after this changeset.
    pub fn compose(&self, other: &Changeset) -> Result<Changeset, CollabError> {
        compose(self, other)
    }

    /// Rebase this changeset so it applies after `other`. See [`transform`].
    pub fn transform(&self, other: &Changeset, side: Side) -> Result<Changeset, CollabError> {
        transform(self, other, side)
    }

    /// Make the changeset which undoes this one. `source` is the document this changeset
    /// applies to - we need it to recover the deleted text.
    pub fn invert(&self, source: &str) -> Result<Changeset, CollabError> {
        check_len(self.source_len, count_chars(source))?;

        let mut result = Changeset::new();
        let mut old = source;
        for c in &self.components {
            match *c {
                Retain(len) => {
                    result.retain(len);
                    skip_chars(&mut old, len);
                }
                Delete(len) => result.push_insert(take_first_chars(&mut old, len), len),
                Insert(len) => result.delete(len),
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use rand::prelude::*;
    use crate::changeset::{Changeset, Side};
    use crate::error::CollabError;
    use crate::fuzzer_tools::{random_changeset, random_str};

    fn ins(len: usize, pos: usize, text: &str) -> Changeset {
        Changeset::from_insertion(len, pos, text).unwrap()
    }

    fn del(len: usize, pos: usize, count: usize) -> Changeset {
        Changeset::from_deletion(len, pos..pos + count).unwrap()
    }

    #[test]
    fn concurrent_inserts_converge() {
        let a = ins(2, 1, "X");
        let b = ins(2, 1, "Y");

        // b was accepted by the server first, so its on the left.
        let a2 = a.transform(&b, Side::Right).unwrap();
        let b2 = b.transform(&a, Side::Left).unwrap();

        let via_b = a2.apply(&b.apply("ab").unwrap()).unwrap();
        let via_a = b2.apply(&a.apply("ab").unwrap()).unwrap();
        assert_eq!(via_a, "aYXb");
        assert_eq!(via_b, "aYXb");
    }

    #[test]
    fn transform_delete_over_delete() {
        let a = del(5, 1, 3); // "abcde" -> "ae"
        let b = del(5, 2, 2); // "abcde" -> "abe"
        let a2 = a.transform(&b, Side::Left).unwrap();
        assert_eq!(a2.apply("abe").unwrap(), "ae");
        let b2 = b.transform(&a, Side::Right).unwrap();
        assert!(b2.is_identity());
    }

    #[test]
    fn insert_inside_deleted_region_survives() {
        let a = ins(4, 2, "XY");
        let b = del(4, 1, 2);
        let a2 = a.transform(&b, Side::Right).unwrap();
        assert_eq!(a2.apply(&b.apply("abcd").unwrap()).unwrap(), "aXYd");
    }

    #[test]
    fn compose_basics() {
        let a = ins(5, 5, " world");
        let b = del(11, 0, 6);
        let ab = a.compose(&b).unwrap();
        assert_eq!(ab.apply("hello").unwrap(), "world");

        // Deleting text the first changeset inserted cancels the insert entirely.
        let c = del(11, 5, 6);
        assert!(a.compose(&c).unwrap().is_identity());
    }

    #[test]
    fn compose_checks_lengths() {
        let a = ins(5, 5, "!");
        let b = ins(5, 0, "?");
        assert!(matches!(a.compose(&b), Err(CollabError::IncompatibleLength { expected: 6, actual: 5 })));
        assert!(a.transform(&ins(3, 0, "x"), Side::Left).is_err());
        assert!(a.invert("hi").is_err());
    }

    #[test]
    fn identity_laws() {
        let a = Changeset::from_replacement(6, 1..3, "XYZ").unwrap();
        assert_eq!(Changeset::identity(6).compose(&a).unwrap(), a);
        assert_eq!(a.compose(&Changeset::identity(7)).unwrap(), a);
        assert_eq!(a.transform(&Changeset::identity(6), Side::Left).unwrap(), a);
        assert_eq!(a.transform(&Changeset::identity(6), Side::Right).unwrap(), a);
    }

    #[test]
    fn invert_simple() {
        let a = Changeset::from_replacement(6, 1..3, "XYZ").unwrap();
        let inv = a.invert("abcdef").unwrap();
        assert_eq!(inv.apply("aXYZdef").unwrap(), "abcdef");
        // Not the canonical identity (it replaces "bc" with "bc") but it leaves the text alone.
        assert_eq!(a.compose(&inv).unwrap().apply("abcdef").unwrap(), "abcdef");
    }

    #[test]
    fn fuzz_convergence() {
        for seed in 0..300 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let len = rng.gen_range(0..20);
            let doc = random_str(len, &mut rng);
            let a = random_changeset(&doc, &mut rng);
            let b = random_changeset(&doc, &mut rng);

            for side in [Side::Left, Side::Right] {
                let a2 = a.transform(&b, side).unwrap();
                let b2 = b.transform(&a, side.flip()).unwrap();

                let left = a.compose(&b2).unwrap();
                let right = b.compose(&a2).unwrap();
                assert_eq!(left.apply(&doc).unwrap(), right.apply(&doc).unwrap(),
                    "seed {} doc {:?} a {} b {}", seed, doc, a, b);
            }

            // Transforming never lets a stray position escape the new document.
            let mapped = b.map_position(rng.gen_range(0..=len + 2));
            assert!(mapped <= b.target_len());
        }
    }

    #[test]
    fn fuzz_compose_associative() {
        for seed in 0..300 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let len = rng.gen_range(0..20);
            let doc = random_str(len, &mut rng);
            let a = random_changeset(&doc, &mut rng);
            let doc_a = a.apply(&doc).unwrap();
            let b = random_changeset(&doc_a, &mut rng);
            let doc_b = b.apply(&doc_a).unwrap();
            let c = random_changeset(&doc_b, &mut rng);

            let ab_c = a.compose(&b).unwrap().compose(&c).unwrap();
            let a_bc = a.compose(&b.compose(&c).unwrap()).unwrap();
            assert_eq!(ab_c, a_bc);
            assert_eq!(ab_c.apply(&doc).unwrap(), c.apply(&doc_b).unwrap());
        }
    }

    #[test]
    fn fuzz_invert() {
        for seed in 0..300 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let len = rng.gen_range(0..20);
            let doc = random_str(len, &mut rng);
            let a = random_changeset(&doc, &mut rng);

            let inv = a.invert(&doc).unwrap();
            let round_trip = a.compose(&inv).unwrap();
            assert_eq!(round_trip.apply(&doc).unwrap(), doc);
            assert_eq!(inv.invert(&a.apply(&doc).unwrap()).unwrap(), a);
        }
    }
}
