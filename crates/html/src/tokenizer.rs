//! Forgiving HTML tokenizer.
//!
//! Produces a flat token stream for the tree builder. Markup errors never stop
//! tokenization: a `<` that does not open markup is text, an unterminated tag
//! at end of input is dropped, and `<!...>` / `<?...>` constructs that are not
//! comments or doctypes become bogus comments.
//!
//! Known limitations:
//! - No character-encoding sniffing; input is already `&str`.
//! - Raw-text scanning (`script`, `style`) and escapable raw-text scanning
//!   (`title`, `textarea`) look only for the matching close tag; there is no
//!   script-data escape handling.
use crate::dom::Attribute;
use crate::entities::decode_entities;
use memchr::memchr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Doctype name, lowercased (`Some("html")` for `<!DOCTYPE html>`).
    Doctype(Option<String>),
    StartTag {
        name: String,
        attributes: Vec<Attribute>,
        self_closing: bool,
    },
    EndTag(String),
    Comment(String),
    Text(String),
}

/// Elements whose content is tokenized as text up to the matching end tag.
/// The flag is `true` when character references are decoded inside.
pub(crate) fn text_content_mode(name: &str) -> Option<bool> {
    match name {
        "script" | "style" => Some(false),
        "title" | "textarea" => Some(true),
        _ => None,
    }
}

pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    text_element: Option<(String, bool)>,
    queued: Option<Token>,
}

enum Markup {
    Token(Token),
    Dropped,
    NotMarkup,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            text_element: None,
            queued: None,
        }
    }

    fn bytes(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn read_text(&mut self, scan_from: usize) -> Token {
        let bytes = self.bytes();
        let end = memchr(b'<', &bytes[scan_from..])
            .map(|rel| scan_from + rel)
            .unwrap_or(bytes.len());
        let text = &self.input[self.pos..end];
        self.pos = end;
        Token::Text(decode_entities(text))
    }

    fn read_text_element(&mut self, name: &str, escapable: bool) -> Option<Token> {
        let rest = &self.input[self.pos..];
        let (content, end_tag) = match find_close_tag(rest, name.as_bytes()) {
            Some((start, after)) => {
                self.pos += after;
                (&rest[..start], Some(Token::EndTag(name.to_owned())))
            }
            None => {
                self.pos = self.input.len();
                (rest, None)
            }
        };
        if content.is_empty() {
            return end_tag;
        }
        self.queued = end_tag;
        let text = if escapable {
            decode_entities(content)
        } else {
            content.to_owned()
        };
        Some(Token::Text(text))
    }

    fn read_markup(&mut self) -> Markup {
        let bytes = self.bytes();
        let start = self.pos;
        debug_assert_eq!(bytes.get(start), Some(&b'<'));
        let Some(&next) = bytes.get(start + 1) else {
            return Markup::NotMarkup;
        };
        match next {
            b'!' => self.read_declaration(),
            b'?' => self.read_bogus_comment(start + 1),
            b'/' => match bytes.get(start + 2) {
                Some(b) if b.is_ascii_alphabetic() => self.read_end_tag(),
                Some(b'>') => {
                    self.pos = start + 3;
                    Markup::Dropped
                }
                Some(_) => self.read_bogus_comment(start + 2),
                None => Markup::NotMarkup,
            },
            b if b.is_ascii_alphabetic() => self.read_start_tag(),
            _ => Markup::NotMarkup,
        }
    }

    fn read_declaration(&mut self) -> Markup {
        let bytes = self.bytes();
        let start = self.pos;
        if bytes[start..].starts_with(b"<!--") {
            let body_start = start + 4;
            // `<!-->` and `<!--->` close immediately.
            for shortcut in [&b">"[..], &b"->"[..]] {
                if bytes[body_start..].starts_with(shortcut) {
                    self.pos = body_start + shortcut.len();
                    return Markup::Token(Token::Comment(String::new()));
                }
            }
            return match find_subslice(&bytes[body_start..], b"-->") {
                Some(rel) => {
                    self.pos = body_start + rel + 3;
                    Markup::Token(Token::Comment(
                        self.input[body_start..body_start + rel].to_owned(),
                    ))
                }
                None => {
                    self.pos = bytes.len();
                    Markup::Token(Token::Comment(self.input[body_start..].to_owned()))
                }
            };
        }
        if starts_with_ignore_ascii_case(&bytes[start..], b"<!doctype") {
            let body_start = start + 9;
            let end = memchr(b'>', &bytes[body_start..])
                .map(|rel| body_start + rel)
                .unwrap_or(bytes.len());
            self.pos = (end + 1).min(bytes.len());
            let name = self.input[body_start..end]
                .split_ascii_whitespace()
                .next()
                .map(|n| n.to_ascii_lowercase());
            return Markup::Token(Token::Doctype(name));
        }
        self.read_bogus_comment(start + 2)
    }

    fn read_bogus_comment(&mut self, body_start: usize) -> Markup {
        let bytes = self.bytes();
        let end = memchr(b'>', &bytes[body_start..])
            .map(|rel| body_start + rel)
            .unwrap_or(bytes.len());
        self.pos = (end + 1).min(bytes.len());
        Markup::Token(Token::Comment(self.input[body_start..end].to_owned()))
    }

    fn read_end_tag(&mut self) -> Markup {
        let bytes = self.bytes();
        let name_start = self.pos + 2;
        let name_end = scan_name(bytes, name_start);
        let name = self.input[name_start..name_end].to_ascii_lowercase();
        // Attributes on end tags are ignored.
        match find_tag_end(bytes, name_end) {
            Some(gt) => {
                self.pos = gt + 1;
                Markup::Token(Token::EndTag(name))
            }
            None => {
                self.pos = bytes.len();
                Markup::Dropped
            }
        }
    }

    fn read_start_tag(&mut self) -> Markup {
        let bytes = self.bytes();
        let name_start = self.pos + 1;
        let name_end = scan_name(bytes, name_start);
        let name = self.input[name_start..name_end].to_ascii_lowercase();
        let mut attributes: Vec<Attribute> = Vec::new();
        let mut self_closing = false;
        let mut i = name_end;

        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let Some(&b) = bytes.get(i) else {
                self.pos = bytes.len();
                return Markup::Dropped;
            };
            match b {
                b'>' => {
                    i += 1;
                    break;
                }
                b'/' => {
                    if bytes.get(i + 1) == Some(&b'>') {
                        self_closing = true;
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                _ => {
                    let attr_start = i;
                    i += 1;
                    while i < bytes.len()
                        && !bytes[i].is_ascii_whitespace()
                        && !matches!(bytes[i], b'/' | b'>' | b'=')
                    {
                        i += 1;
                    }
                    let attr_name = self.input[attr_start..i].to_ascii_lowercase();
                    let mut j = i;
                    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                        j += 1;
                    }
                    let mut value = String::new();
                    if bytes.get(j) == Some(&b'=') {
                        j += 1;
                        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                            j += 1;
                        }
                        match bytes.get(j) {
                            Some(&quote @ (b'"' | b'\'')) => {
                                let Some(rel) = memchr(quote, &bytes[j + 1..]) else {
                                    self.pos = bytes.len();
                                    return Markup::Dropped;
                                };
                                value = decode_entities(&self.input[j + 1..j + 1 + rel]);
                                j += rel + 2;
                            }
                            Some(_) => {
                                let value_start = j;
                                while j < bytes.len()
                                    && !bytes[j].is_ascii_whitespace()
                                    && bytes[j] != b'>'
                                {
                                    j += 1;
                                }
                                value = decode_entities(&self.input[value_start..j]);
                            }
                            None => {}
                        }
                        i = j;
                    }
                    // First occurrence wins.
                    if !attributes.iter().any(|a| a.name == attr_name) {
                        attributes.push(Attribute {
                            name: attr_name,
                            value,
                        });
                    }
                }
            }
        }

        self.pos = i;
        if let Some(escapable) = text_content_mode(&name) {
            self.text_element = Some((name.clone(), escapable));
        }
        Markup::Token(Token::StartTag {
            name,
            attributes,
            self_closing,
        })
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if let Some(token) = self.queued.take() {
            return Some(token);
        }
        if let Some((name, escapable)) = self.text_element.take()
            && let Some(token) = self.read_text_element(&name, escapable)
        {
            return Some(token);
        }
        loop {
            if self.pos >= self.input.len() {
                return None;
            }
            if self.bytes()[self.pos] != b'<' {
                return Some(self.read_text(self.pos));
            }
            match self.read_markup() {
                Markup::Token(token) => return Some(token),
                Markup::Dropped => continue,
                Markup::NotMarkup => return Some(self.read_text(self.pos + 1)),
            }
        }
    }
}

pub fn tokenize(input: &str) -> Vec<Token> {
    Tokenizer::new(input).collect()
}

fn scan_name(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'/' | b'>') {
        i += 1;
    }
    i
}

// Index of the `>` closing a tag, skipping quoted attribute values.
fn find_tag_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'>' => return Some(i),
            quote @ (b'"' | b'\'') => {
                i += memchr(quote, &bytes[i + 1..])? + 2;
            }
            _ => i += 1,
        }
    }
    None
}

fn starts_with_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        let rel = memchr(needle[0], &haystack[i..])?;
        i += rel;
        if haystack[i..].starts_with(needle) {
            return Some(i);
        }
        i += 1;
    }
    None
}

// `</name` (any case) followed by whitespace, `/` or `>`. Returns the start of
// the close tag and the offset just past its `>`.
fn find_close_tag(haystack: &str, name: &[u8]) -> Option<(usize, usize)> {
    let bytes = haystack.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        i += memchr(b'<', &bytes[i..])?;
        let name_start = i + 2;
        if bytes.get(i + 1) == Some(&b'/')
            && starts_with_ignore_ascii_case(&bytes[name_start.min(bytes.len())..], name)
        {
            let after = name_start + name.len();
            match bytes.get(after) {
                Some(b) if b.is_ascii_whitespace() || *b == b'/' || *b == b'>' => {
                    let gt = find_tag_end(bytes, after)?;
                    return Some((i, gt + 1));
                }
                None => return None,
                _ => {}
            }
        }
        i += 1;
    }
    None
}
