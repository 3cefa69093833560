/// Tiny helpers to convert from codepoint offsets in a utf-8 string to byte offsets, and back.
///
/// All lengths in a changeset are counted in chars (unicode scalar values), but rust strings are
/// indexed by byte. str_indices does the heavy lifting here.

pub fn chars_to_bytes(s: &str, char_pos: usize) -> usize {
    str_indices::chars::to_byte_idx(s, char_pos)
}

pub fn bytes_to_chars(s: &str, byte_pos: usize) -> usize {
    str_indices::chars::from_byte_idx(s, byte_pos)
}

pub fn count_chars(s: &str) -> usize {
    str_indices::chars::count(s)
}

pub fn split_at_char(s: &str, char_pos: usize) -> (&str, &str) {
    s.split_at(chars_to_bytes(s, char_pos))
}

/// Slice a string by char positions.
pub fn char_slice(s: &str, start: usize, end: usize) -> &str {
    debug_assert!(start <= end);
    let start_byte = chars_to_bytes(s, start);
    let rest = &s[start_byte..];
    &rest[..chars_to_bytes(rest, end - start)]
}

/// Take the first `count` chars from the front of `s`, advancing it past them.
pub(crate) fn take_first_chars<'a>(s: &mut &'a str, count: usize) -> &'a str {
    let (first, remainder) = split_at_char(s, count);
    *s = remainder;
    first
}

pub(crate) fn skip_chars(s: &mut &str, count: usize) {
    take_first_chars(s, count);
}
