//! HTML serialization with `outerHTML` semantics.
//!
//! Iterative so that arbitrarily deep trees serialize without recursion.

use crate::dom::{Document, NodeKey, NodeKind};
use crate::tree_builder::is_void_element;

fn is_raw_text_parent(name: &str) -> bool {
    matches!(name, "script" | "style")
}

fn escape_text(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{A0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

fn escape_attribute(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{A0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

enum Step {
    Open(NodeKey),
    Close(NodeKey),
}

fn write_subtree(doc: &Document, start: NodeKey, out: &mut String) {
    let mut stack = vec![Step::Open(start)];
    while let Some(step) = stack.pop() {
        let key = match step {
            Step::Close(key) => {
                if let Some(name) = doc.element_name(key) {
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                }
                continue;
            }
            Step::Open(key) => key,
        };
        let Some(kind) = doc.kind(key) else {
            continue;
        };
        match kind {
            NodeKind::Document { doctype } => {
                if let Some(name) = doctype {
                    out.push_str("<!DOCTYPE ");
                    out.push_str(name);
                    out.push('>');
                }
                stack.extend(doc.children(key).iter().rev().map(|c| Step::Open(*c)));
            }
            NodeKind::Element { name, attributes } => {
                out.push('<');
                out.push_str(name);
                for attr in attributes {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    escape_attribute(out, &attr.value);
                    out.push('"');
                }
                out.push('>');
                if is_void_element(name) {
                    continue;
                }
                stack.push(Step::Close(key));
                stack.extend(doc.children(key).iter().rev().map(|c| Step::Open(*c)));
            }
            NodeKind::Text(text) => {
                let raw = doc
                    .parent(key)
                    .and_then(|p| doc.element_name(p))
                    .is_some_and(is_raw_text_parent);
                if raw {
                    out.push_str(text);
                } else {
                    escape_text(out, text);
                }
            }
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
        }
    }
}

/// The whole document, doctype included.
pub fn serialize_document(doc: &Document) -> String {
    let mut out = String::new();
    write_subtree(doc, doc.root(), &mut out);
    out
}

/// `outerHTML` of `key`. Empty for dead keys.
pub fn serialize_node(doc: &Document, key: NodeKey) -> String {
    let mut out = String::new();
    write_subtree(doc, key, &mut out);
    out
}

/// `innerHTML` of `key`.
pub fn serialize_children(doc: &Document, key: NodeKey) -> String {
    let mut out = String::new();
    for child in doc.children(key) {
        write_subtree(doc, *child, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParseLimits, parse_document, parse_fragment};

    fn round(markup: &str) -> String {
        let frag = parse_fragment(markup, &ParseLimits::default()).unwrap();
        serialize_document(&frag)
    }

    #[test]
    fn escapes_text_and_attributes() {
        assert_eq!(
            round("<p title='a \"q\" &amp; <b>'>x &lt; y &amp;&nbsp;z</p>"),
            "<p title=\"a &quot;q&quot; &amp; <b>\">x &lt; y &amp;&nbsp;z</p>"
        );
    }

    #[test]
    fn raw_text_is_verbatim() {
        assert_eq!(
            round("<style>a > b { content: \"&amp;\" }</style>"),
            "<style>a > b { content: \"&amp;\" }</style>"
        );
        assert_eq!(round("<script>if (a<b) x()</script>"), "<script>if (a<b) x()</script>");
    }

    #[test]
    fn title_content_is_escaped() {
        let doc = parse_document("<title>a &lt;b&gt;</title>", &ParseLimits::default()).unwrap();
        let head = doc.head().unwrap();
        assert_eq!(serialize_children(&doc, head), "<title>a &lt;b&gt;</title>");
    }

    #[test]
    fn voids_have_no_end_tag_and_empty_attrs_keep_quotes() {
        assert_eq!(round("<input disabled><hr>"), "<input disabled=\"\"><hr>");
    }

    #[test]
    fn comments_are_preserved() {
        assert_eq!(round("<!-- hi --><b>x</b>"), "<!-- hi --><b>x</b>");
    }

    #[test]
    fn serialization_is_a_parse_fixed_point() {
        let src = concat!(
            "<!doctype html><title>T &amp; U</title><div class=x>a<p>b<ul><li>c<li>d</ul>",
            "<img src=\"q.png\" alt='&quot;'><style>p>b{}</style>",
        );
        let first = serialize_document(&parse_document(src, &ParseLimits::default()).unwrap());
        let second = serialize_document(&parse_document(&first, &ParseLimits::default()).unwrap());
        assert_eq!(first, second);
    }
}
