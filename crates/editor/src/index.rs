//! Per-snapshot element identity.
//!
//! Ids are assigned in pre-order over element nodes starting at the document
//! element, counting from 0. They mean nothing across snapshots: the next full
//! replace builds a new [`IdMapping`] from scratch.

use std::collections::HashMap;
use std::fmt;

use core_types::SnapshotVersion;
use html::sanitize::{AST_ID_ATTR, AST_PARENT_ID_ATTR, AST_TEMP_ATTR};
use html::{Document, NodeKey};

pub type AstId = u32;

/// Where a subtree sits: the `child_index`-th element child of `parent_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub parent_id: AstId,
    pub child_index: usize,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.parent_id, self.child_index)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: AstId,
    pub parent: Option<AstId>,
    pub key: NodeKey,
    pub tag: String,
    /// Position among the parent's element children at indexing time.
    pub child_index: usize,
}

impl NodeRecord {
    pub fn address(&self) -> Option<Address> {
        self.parent.map(|parent_id| Address {
            parent_id,
            child_index: self.child_index,
        })
    }
}

#[derive(Clone, Debug)]
pub struct IdMapping {
    version: SnapshotVersion,
    records: Vec<NodeRecord>,
    by_key: HashMap<NodeKey, AstId>,
}

impl IdMapping {
    pub fn version(&self) -> SnapshotVersion {
        self.version
    }

    /// Record for `id`. Records are stored densely, so this is an index.
    pub fn get(&self, id: AstId) -> Option<&NodeRecord> {
        self.records.get(id as usize)
    }

    pub fn id_of(&self, key: NodeKey) -> Option<AstId> {
        self.by_key.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.records.iter()
    }
}

/// Indexes every element under the document element and rewrites the
/// diagnostic attributes to match. Stale attributes (ids from an earlier
/// snapshot, marker flags, a parent id on the root) are replaced or removed.
pub fn index_document(doc: &mut Document, version: SnapshotVersion) -> IdMapping {
    let mut records = Vec::new();
    let mut by_key = HashMap::new();

    let Some(root) = doc.document_element() else {
        return IdMapping {
            version,
            records,
            by_key,
        };
    };

    // Pre-order with the parent id carried alongside each key.
    let mut stack: Vec<(NodeKey, Option<AstId>, usize)> = vec![(root, None, 0)];
    while let Some((key, parent, child_index)) = stack.pop() {
        let id = records.len() as AstId;
        let tag = doc.element_name(key).unwrap_or_default().to_string();
        records.push(NodeRecord {
            id,
            parent,
            key,
            tag,
            child_index,
        });
        by_key.insert(key, id);

        let children: Vec<NodeKey> = doc.element_children(key).collect();
        stack.extend(
            children
                .into_iter()
                .enumerate()
                .rev()
                .map(|(idx, child)| (child, Some(id), idx)),
        );
    }

    for record in &records {
        doc.set_attr(record.key, AST_ID_ATTR, record.id.to_string());
        match record.parent {
            Some(parent) => {
                doc.set_attr(record.key, AST_PARENT_ID_ATTR, parent.to_string());
            }
            None => {
                doc.remove_attr(record.key, AST_PARENT_ID_ATTR);
            }
        }
        doc.remove_attr(record.key, AST_TEMP_ATTR);
    }

    debug_assert_eq!(records.len(), by_key.len());
    log::trace!(
        target: "drift.engine",
        "indexed {} elements for snapshot {}",
        records.len(),
        version.0
    );
    IdMapping {
        version,
        records,
        by_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use html::{ParseLimits, parse_document};

    fn indexed(markup: &str) -> (Document, IdMapping) {
        let mut doc = parse_document(markup, &ParseLimits::default()).unwrap();
        let mapping = index_document(&mut doc, SnapshotVersion(1));
        (doc, mapping)
    }

    #[test]
    fn ids_follow_element_pre_order() {
        let (_, mapping) = indexed("<div><p>a</p><p>b<em>c</em></p></div><footer></footer>");
        let tags: Vec<&str> = mapping.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, ["html", "head", "body", "div", "p", "p", "em", "footer"]);
        let em = mapping.get(6).unwrap();
        assert_eq!(em.parent, Some(5));
        assert_eq!(em.child_index, 0);
        let footer = mapping.get(7).unwrap();
        assert_eq!(footer.address(), Some(Address { parent_id: 2, child_index: 1 }));
    }

    #[test]
    fn attributes_are_written_and_root_has_no_parent() {
        let (doc, mapping) = indexed("<p>x</p>");
        let root = mapping.get(0).unwrap();
        assert_eq!(doc.attr(root.key, AST_ID_ATTR), Some("0"));
        assert_eq!(doc.attr(root.key, AST_PARENT_ID_ATTR), None);
        let p = mapping.get(3).unwrap();
        assert_eq!(doc.attr(p.key, AST_ID_ATTR), Some("3"));
        assert_eq!(doc.attr(p.key, AST_PARENT_ID_ATTR), Some("2"));
    }

    #[test]
    fn stale_diagnostics_are_overwritten() {
        let (doc, mapping) = indexed(concat!(
            "<html data-ast-parent-id=\"9\"><body>",
            "<div data-ast-id=\"40\" data-ast-temp-div=\"true\"></div>",
            "</body></html>",
        ));
        let html = mapping.get(0).unwrap();
        assert_eq!(doc.attr(html.key, AST_PARENT_ID_ATTR), None);
        let div = mapping.iter().find(|r| r.tag == "div").unwrap();
        assert_eq!(doc.attr(div.key, AST_ID_ATTR), Some(div.id.to_string().as_str()));
        assert_eq!(doc.attr(div.key, AST_TEMP_ATTR), None);
    }

    #[test]
    fn text_nodes_do_not_shift_child_index() {
        let (doc, mapping) = indexed("<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>");
        let second = mapping.iter().filter(|r| r.tag == "li").nth(1).unwrap();
        assert_eq!(second.child_index, 1);
        assert_eq!(mapping.id_of(second.key), Some(second.id));
        assert_eq!(doc.element_index(second.key), Some(1));
    }
}
