use crate::dom::{Attribute, Document, NodeKey, NodeKind};
use crate::sanitize::DIAGNOSTIC_ATTRIBUTES;
use std::fmt;

/// Deterministic structural comparison of two documents for tests.
/// Not a stable format.
///
/// Equivalence rules:
/// - Node kinds, element names, text and comment data must match exactly.
/// - Attribute order is significant.
/// - Diagnostic attributes (`data-ast-*`) are skipped when
///   `ignore_diagnostics` is set.
/// - Whitespace-only text nodes are skipped when `ignore_whitespace_text` is
///   set.
#[derive(Clone, Copy, Debug)]
pub struct DomSnapshotOptions {
    pub ignore_diagnostics: bool,
    pub ignore_whitespace_text: bool,
}

impl Default for DomSnapshotOptions {
    fn default() -> Self {
        Self {
            ignore_diagnostics: true,
            ignore_whitespace_text: false,
        }
    }
}

#[derive(Debug)]
pub struct DomSnapshot {
    lines: Vec<String>,
}

impl DomSnapshot {
    pub fn new(doc: &Document, root: NodeKey, options: DomSnapshotOptions) -> Self {
        let mut lines = Vec::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((key, depth)) = stack.pop() {
            let Some(line) = format_node_line(doc, key, &options) else {
                continue;
            };
            lines.push(format!("{}{}", "  ".repeat(depth), line));
            stack.extend(doc.children(key).iter().rev().map(|c| (*c, depth + 1)));
        }
        Self { lines }
    }

    pub fn as_lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

impl fmt::Display for DomSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug)]
pub struct DomMismatch {
    pub path: String,
    pub detail: String,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for DomMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DOM mismatch at {}: {}", self.path, self.detail)?;
        writeln!(f, "expected: {}", self.expected)?;
        writeln!(f, "actual:   {}", self.actual)
    }
}

impl std::error::Error for DomMismatch {}

pub fn assert_dom_eq(expected: &Document, actual: &Document, options: DomSnapshotOptions) {
    if let Err(mismatch) = compare_dom(expected, actual, options) {
        panic!(
            "{mismatch}\nexpected tree:\n{}\nactual tree:\n{}",
            DomSnapshot::new(expected, expected.root(), options),
            DomSnapshot::new(actual, actual.root(), options)
        );
    }
}

pub fn compare_dom(
    expected: &Document,
    actual: &Document,
    options: DomSnapshotOptions,
) -> Result<(), Box<DomMismatch>> {
    compare_subtrees(expected, expected.root(), actual, actual.root(), options)
}

pub fn compare_subtrees(
    expected: &Document,
    expected_root: NodeKey,
    actual: &Document,
    actual_root: NodeKey,
    options: DomSnapshotOptions,
) -> Result<(), Box<DomMismatch>> {
    let mut stack = vec![(expected_root, actual_root, node_label(expected, expected_root))];
    while let Some((e, a, path)) = stack.pop() {
        let mismatch = |detail: String| {
            Box::new(DomMismatch {
                path: format!("/{path}"),
                detail,
                expected: format_node_line(expected, e, &options).unwrap_or_default(),
                actual: format_node_line(actual, a, &options).unwrap_or_default(),
            })
        };
        match (expected.kind(e), actual.kind(a)) {
            (
                Some(NodeKind::Document { doctype: de }),
                Some(NodeKind::Document { doctype: da }),
            ) => {
                if de != da {
                    return Err(mismatch("doctype".into()));
                }
            }
            (
                Some(NodeKind::Element { name: ne, attributes: ae }),
                Some(NodeKind::Element { name: na, attributes: aa }),
            ) => {
                if ne != na {
                    return Err(mismatch("element name".into()));
                }
                let ae: Vec<&Attribute> = visible_attributes(ae, &options).collect();
                let aa: Vec<&Attribute> = visible_attributes(aa, &options).collect();
                if ae != aa {
                    return Err(mismatch("attributes".into()));
                }
            }
            (Some(NodeKind::Text(te)), Some(NodeKind::Text(ta))) => {
                if te != ta {
                    return Err(mismatch("text".into()));
                }
            }
            (Some(NodeKind::Comment(ce)), Some(NodeKind::Comment(ca))) => {
                if ce != ca {
                    return Err(mismatch("comment".into()));
                }
            }
            _ => return Err(mismatch("node kind".into())),
        }

        let ec = visible_children(expected, e, &options);
        let ac = visible_children(actual, a, &options);
        if ec.len() != ac.len() {
            return Err(mismatch(format!(
                "child count (expected {}, actual {})",
                ec.len(),
                ac.len()
            )));
        }
        for (idx, (ce, ca)) in ec.into_iter().zip(ac).enumerate().rev() {
            let child_path = format!("{path}/{}[{idx}]", node_label(expected, ce));
            stack.push((ce, ca, child_path));
        }
    }
    Ok(())
}

fn visible_attributes<'a>(
    attributes: &'a [Attribute],
    options: &'a DomSnapshotOptions,
) -> impl Iterator<Item = &'a Attribute> + 'a {
    attributes.iter().filter(move |attr| {
        !(options.ignore_diagnostics && DIAGNOSTIC_ATTRIBUTES.contains(&attr.name.as_str()))
    })
}

fn visible_children(doc: &Document, key: NodeKey, options: &DomSnapshotOptions) -> Vec<NodeKey> {
    doc.children(key)
        .iter()
        .copied()
        .filter(|c| !is_skipped_text(doc, *c, options))
        .collect()
}

fn is_skipped_text(doc: &Document, key: NodeKey, options: &DomSnapshotOptions) -> bool {
    options.ignore_whitespace_text
        && matches!(doc.kind(key), Some(NodeKind::Text(t)) if t.trim().is_empty())
}

fn node_label(doc: &Document, key: NodeKey) -> String {
    match doc.kind(key) {
        Some(NodeKind::Document { .. }) => "#document".to_string(),
        Some(NodeKind::Element { name, .. }) => {
            match doc.attr(key, "id").filter(|v| !v.is_empty()) {
                Some(id) => format!("{name}#{id}"),
                None => name.clone(),
            }
        }
        Some(NodeKind::Text(_)) => "#text".to_string(),
        Some(NodeKind::Comment(_)) => "#comment".to_string(),
        None => "#dead".to_string(),
    }
}

fn format_node_line(doc: &Document, key: NodeKey, options: &DomSnapshotOptions) -> Option<String> {
    if is_skipped_text(doc, key, options) {
        return None;
    }
    Some(match doc.kind(key)? {
        NodeKind::Document { doctype } => match doctype {
            Some(dt) => format!("#document doctype={dt:?}"),
            None => "#document".to_string(),
        },
        NodeKind::Element { name, attributes } => {
            let mut line = format!("<{name}");
            for attr in visible_attributes(attributes, options) {
                line.push_str(&format!(" {}={:?}", attr.name, attr.value));
            }
            line.push('>');
            line
        }
        NodeKind::Text(text) => format!("#text {text:?}"),
        NodeKind::Comment(text) => format!("#comment {text:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParseLimits, parse_document};

    fn parse(markup: &str) -> Document {
        parse_document(markup, &ParseLimits::default()).unwrap()
    }

    #[test]
    fn diagnostic_attributes_are_ignored_by_default() {
        let a = parse("<div data-ast-id=\"1\" class=\"x\">t</div>");
        let b = parse("<div class=\"x\" data-ast-id=\"9\">t</div>");
        assert!(compare_dom(&a, &b, DomSnapshotOptions::default()).is_ok());
        let strict = DomSnapshotOptions {
            ignore_diagnostics: false,
            ..DomSnapshotOptions::default()
        };
        assert!(compare_dom(&a, &b, strict).is_err());
    }

    #[test]
    fn mismatch_reports_path() {
        let a = parse("<ul><li>a</li><li>b</li></ul>");
        let b = parse("<ul><li>a</li><li>c</li></ul>");
        let err = compare_dom(&a, &b, DomSnapshotOptions::default()).unwrap_err();
        assert_eq!(err.detail, "text");
        assert!(err.path.ends_with("ul[0]/li[1]/#text[0]"), "{}", err.path);
    }

    #[test]
    fn whitespace_text_can_be_skipped() {
        let a = parse("<div>\n  <p>x</p>\n</div>");
        let b = parse("<div><p>x</p></div>");
        let loose = DomSnapshotOptions {
            ignore_whitespace_text: true,
            ..DomSnapshotOptions::default()
        };
        assert!(compare_dom(&a, &b, loose).is_ok());
        assert!(compare_dom(&a, &b, DomSnapshotOptions::default()).is_err());
    }

    #[test]
    fn snapshot_lines_are_indented() {
        let doc = parse("<p id=\"k\">x</p>");
        let snap = DomSnapshot::new(&doc, doc.body().unwrap(), DomSnapshotOptions::default());
        assert_eq!(snap.as_lines(), &["<body>", "  <p id=\"k\">", "    #text \"x\""]);
    }
}
