use memchr::{memchr, memchr2, memchr_iter};

/// Byte offset of the first ASCII-case-insensitive occurrence of `needle`.
pub fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    let n = needle.len();
    if n == 0 {
        return Some(0);
    }
    if hay.len() < n {
        return None;
    }
    let first = needle[0];
    let (lower, upper) = (first.to_ascii_lowercase(), first.to_ascii_uppercase());
    let mut i = 0;
    while i + n <= hay.len() {
        let rel = if lower == upper {
            memchr(lower, &hay[i..])
        } else {
            memchr2(lower, upper, &hay[i..])
        }?;
        let pos = i + rel;
        if pos + n <= hay.len() && hay[pos..pos + n].eq_ignore_ascii_case(needle) {
            return Some(pos);
        }
        i = pos + 1;
    }
    None
}

pub fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    find_ignore_ascii_case(haystack, needle).is_some()
}

/// 1-based line number of `offset` within `text` (offsets past the end map to
/// the last line).
pub fn line_of_offset(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    memchr_iter(b'\n', &text.as_bytes()[..end]).count() + 1
}
