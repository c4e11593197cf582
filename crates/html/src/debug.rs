use crate::dom::{Document, NodeKey, NodeKind};
use crate::sanitize::{AST_ID_ATTR, AST_TEMP_ATTR};

const INDENT_STEP: &str = "  ";
const PREVIEW_CHARS: usize = 40;
const MAX_DEPTH: usize = 256;

struct IndentGuard<'a> {
    indent: &'a mut String,
    step: usize,
}

impl Drop for IndentGuard<'_> {
    fn drop(&mut self) {
        let new_len = self.indent.len() - self.step;
        self.indent.truncate(new_len);
    }
}

fn push_preview(out: &mut String, s: &str, max_chars: usize) {
    let mut chars = s.chars();
    for ch in chars.by_ref().take(max_chars) {
        out.push(if ch == '\n' { ' ' } else { ch });
    }
    if chars.next().is_some() {
        out.push('…');
    }
}

fn push_attr(line: &mut String, name: &str, value: &str) {
    line.push(' ');
    line.push_str(name);
    line.push_str("=\"");
    line.push_str(value);
    line.push('"');
}

/// One line per node, indented by depth, listing at most `cap` nodes.
///
/// Elements show `id`, `class` and the diagnostic identity so a snapshot's
/// indexing can be eyeballed; whitespace-only text is skipped.
pub fn outline(doc: &Document, root: NodeKey, cap: usize) -> Vec<String> {
    fn walk(
        doc: &Document,
        key: NodeKey,
        indent: &mut String,
        out: &mut Vec<String>,
        left: &mut usize,
    ) {
        if *left == 0 {
            return;
        }
        let Some(kind) = doc.kind(key) else {
            return;
        };
        *left -= 1;
        let mut line = String::with_capacity(indent.len() + 64);
        line.push_str(indent);
        match kind {
            NodeKind::Document { doctype } => match doctype {
                Some(dt) => {
                    line.push_str("<!DOCTYPE ");
                    line.push_str(dt);
                    line.push('>');
                }
                None => line.push_str("#document"),
            },
            NodeKind::Element { name, .. } => {
                line.push('<');
                line.push_str(name);
                for attr in ["id", "class", AST_ID_ATTR, AST_TEMP_ATTR] {
                    if let Some(value) = doc.attr(key, attr).filter(|v| !v.is_empty()) {
                        push_attr(&mut line, attr, value);
                    }
                }
                line.push('>');
            }
            NodeKind::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return;
                }
                line.push('"');
                push_preview(&mut line, trimmed, PREVIEW_CHARS);
                line.push('"');
            }
            NodeKind::Comment(text) => {
                line.push_str("<!-- ");
                push_preview(&mut line, text, PREVIEW_CHARS);
                line.push_str(" -->");
            }
        }
        out.push(line);

        let children = doc.children(key);
        if children.is_empty() {
            return;
        }
        if indent.len() / INDENT_STEP.len() >= MAX_DEPTH {
            out.push(format!("{indent}{INDENT_STEP}…"));
            return;
        }
        indent.push_str(INDENT_STEP);
        let mut guard = IndentGuard {
            indent,
            step: INDENT_STEP.len(),
        };
        for child in children {
            walk(doc, *child, &mut *guard.indent, out, left);
        }
    }

    let mut out = Vec::new();
    let mut left = cap;
    let mut indent = String::new();
    walk(doc, root, &mut indent, &mut out, &mut left);
    out
}
