/// Decode character references in text and attribute values.
///
/// Contract:
/// - Named references from [`NAMED`] decode only when `;`-terminated.
/// - Numeric references (`&#123;`, `&#x1F4A9;`) decode when well-formed and
///   `;`-terminated; invalid scalars and NUL become U+FFFD.
/// - Anything else (unknown names, missing `;`, overlong digit runs) is kept
///   verbatim.
///
/// Scans are bounded so adversarial input stays linear.
pub(crate) fn decode_entities(s: &str) -> String {
    let bytes = s.as_bytes();
    let Some(first) = memchr::memchr(b'&', bytes) else {
        return s.to_owned();
    };

    let mut out = String::with_capacity(s.len());
    out.push_str(&s[..first]);
    let mut i = first;
    let mut copy_start = first;

    while i < bytes.len() {
        if bytes[i] != b'&' {
            i += 1;
            continue;
        }
        if let Some((decoded, consumed)) = decode_one(&bytes[i..]) {
            out.push_str(&s[copy_start..i]);
            out.push(decoded);
            i += consumed;
            copy_start = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&s[copy_start..]);
    out
}

const MAX_NAME_LEN: usize = 10;
const MAX_HEX_DIGITS: usize = 6;
const MAX_DEC_DIGITS: usize = 7;

// `input` starts at `&`. Returns the decoded char and the bytes consumed.
fn decode_one(input: &[u8]) -> Option<(char, usize)> {
    match input.get(1)? {
        b'#' => {
            let (is_hex, digits_start) = match input.get(2)? {
                b'x' | b'X' => (true, 3),
                _ => (false, 2),
            };
            let max = if is_hex { MAX_HEX_DIGITS } else { MAX_DEC_DIGITS };
            let end = scan_digits(input, digits_start, max, is_hex)?;
            let digits = std::str::from_utf8(&input[digits_start..end]).ok()?;
            let value = u32::from_str_radix(digits, if is_hex { 16 } else { 10 }).ok()?;
            let ch = match value {
                0 => '\u{FFFD}',
                v => char::from_u32(v).unwrap_or('\u{FFFD}'),
            };
            Some((ch, end + 1))
        }
        _ => {
            let limit = input.len().min(MAX_NAME_LEN + 2);
            let semi = input[1..limit].iter().position(|b| *b == b';')? + 1;
            let name = &input[1..semi];
            if name.is_empty() || !name.iter().all(u8::is_ascii_alphanumeric) {
                return None;
            }
            NAMED
                .iter()
                .find(|(n, _)| n.as_bytes() == name)
                .map(|(_, ch)| (*ch, semi + 1))
        }
    }
}

// Returns the index of the terminating `;`.
fn scan_digits(input: &[u8], start: usize, max: usize, is_hex: bool) -> Option<usize> {
    let mut j = start;
    while j < input.len() {
        let b = input[j];
        if b == b';' {
            return (j > start).then_some(j);
        }
        let ok = if is_hex {
            b.is_ascii_hexdigit()
        } else {
            b.is_ascii_digit()
        };
        if !ok || j - start == max {
            return None;
        }
        j += 1;
    }
    None
}

// Case-sensitive, as in HTML.
const NAMED: &[(&str, char)] = &[
    ("amp", '&'),
    ("lt", '<'),
    ("gt", '>'),
    ("quot", '"'),
    ("apos", '\''),
    ("nbsp", '\u{A0}'),
    ("copy", '\u{A9}'),
    ("reg", '\u{AE}'),
    ("trade", '\u{2122}'),
    ("hellip", '\u{2026}'),
    ("mdash", '\u{2014}'),
    ("ndash", '\u{2013}'),
    ("lsquo", '\u{2018}'),
    ("rsquo", '\u{2019}'),
    ("ldquo", '\u{201C}'),
    ("rdquo", '\u{201D}'),
    ("laquo", '\u{AB}'),
    ("raquo", '\u{BB}'),
    ("bull", '\u{2022}'),
    ("middot", '\u{B7}'),
    ("times", '\u{D7}'),
    ("divide", '\u{F7}'),
    ("euro", '\u{20AC}'),
    ("pound", '\u{A3}'),
    ("yen", '\u{A5}'),
    ("cent", '\u{A2}'),
    ("sect", '\u{A7}'),
    ("deg", '\u{B0}'),
    ("plusmn", '\u{B1}'),
    ("larr", '\u{2190}'),
    ("rarr", '\u{2192}'),
    ("uarr", '\u{2191}'),
    ("darr", '\u{2193}'),
    ("check", '\u{2713}'),
    ("star", '\u{2606}'),
    ("hearts", '\u{2665}'),
    ("zwj", '\u{200D}'),
    ("zwnj", '\u{200C}'),
    ("ensp", '\u{2002}'),
    ("emsp", '\u{2003}'),
    ("thinsp", '\u{2009}'),
];
