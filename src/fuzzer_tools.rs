use rand::prelude::SmallRng;
use rand::Rng;
use crate::changeset::Changeset;
use crate::unicount::count_chars;

const UCHARS: [char; 23] = [
    'a', 'b', 'c', '1', '2', '3', ' ', '\n', // ASCII
    '©', '¥', '½', // The Latin-1 suppliment (U+80 - U+ff)
    'Ύ', 'Δ', 'δ', 'Ϡ', // Greek (U+0370 - U+03FF)
    '←', '↯', '↻', '⇈', // Arrows (U+2190 – U+21FF)
    '𐆐', '𐆔', '𐆘', '𐆚', // Ancient roman symbols (U+10190 – U+101CF)
];

/// Random text mixing 1, 2, 3 and 4 byte characters, so char and byte offsets disagree.
pub(crate) fn random_str(len: usize, rng: &mut SmallRng) -> String {
    (0..len).map(|_| UCHARS[rng.gen_range(0..UCHARS.len())]).collect()
}

/// Make a random changeset which applies to `doc`, with a handful of inserts and deletes spread
/// through the document.
pub(crate) fn random_changeset(doc: &str, rng: &mut SmallRng) -> Changeset {
    let doc_len = count_chars(doc);
    let mut result = Changeset::new();
    let mut remaining = doc_len;

    while remaining > 0 || rng.gen_bool(0.3) {
        match rng.gen_range(0..3) {
            0 => {
                let len = rng.gen_range(1..4);
                result.insert(&random_str(len, rng));
            }
            1 if remaining > 0 => {
                let len = rng.gen_range(1..=remaining.min(4));
                result.delete(len);
                remaining -= len;
            }
            _ if remaining > 0 => {
                let len = rng.gen_range(1..=remaining.min(6));
                result.retain(len);
                remaining -= len;
            }
            _ => break,
        }
    }

    debug_assert_eq!(result.source_len(), doc_len);
    result
}
