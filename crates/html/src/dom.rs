//! Arena-backed document tree.
//!
//! Nodes are addressed by [`NodeKey`], an index into the arena. Keys are never
//! reused within one `Document`: removing a subtree only marks its records
//! dead, so a key captured before a mutation either still names the same node
//! or resolves to nothing.
//!
//! Invariants:
//! - Key 0 is the document node and is never removed.
//! - A live node has at most one parent and appears exactly once in that
//!   parent's `children`.
//! - Element and attribute names are canonical ASCII-lowercase.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u32);

impl NodeKey {
    pub const DOCUMENT: NodeKey = NodeKey(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Document { doctype: Option<String> },
    Element { name: String, attributes: Vec<Attribute> },
    Text(String),
    Comment(String),
}

impl NodeKind {
    fn allows_children(&self) -> bool {
        matches!(self, NodeKind::Document { .. } | NodeKind::Element { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    MissingNode(NodeKey),
    NotAParent(NodeKey),
    NotAChild { parent: NodeKey, child: NodeKey },
    AlreadyAttached(NodeKey),
    CycleDetected { parent: NodeKey, child: NodeKey },
}

impl fmt::Display for DomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomError::MissingNode(k) => write!(f, "node {} does not exist", k.0),
            DomError::NotAParent(k) => write!(f, "node {} cannot have children", k.0),
            DomError::NotAChild { parent, child } => {
                write!(f, "node {} is not a child of {}", child.0, parent.0)
            }
            DomError::AlreadyAttached(k) => write!(f, "node {} already has a parent", k.0),
            DomError::CycleDetected { parent, child } => {
                write!(f, "inserting {} under {} would create a cycle", child.0, parent.0)
            }
        }
    }
}

impl std::error::Error for DomError {}

#[derive(Clone, Debug)]
struct NodeRecord {
    kind: NodeKind,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
    live: bool,
}

#[derive(Clone, Debug)]
pub struct Document {
    nodes: Vec<NodeRecord>,
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeRecord {
                kind: NodeKind::Document { doctype: None },
                parent: None,
                children: Vec::new(),
                live: true,
            }],
        }
    }

    pub fn root(&self) -> NodeKey {
        NodeKey::DOCUMENT
    }

    fn record(&self, key: NodeKey) -> Option<&NodeRecord> {
        self.nodes.get(key.index()).filter(|r| r.live)
    }

    fn record_mut(&mut self, key: NodeKey) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(key.index()).filter(|r| r.live)
    }

    pub fn is_live(&self, key: NodeKey) -> bool {
        self.record(key).is_some()
    }

    /// Number of live nodes, including the document node.
    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|r| r.live).count()
    }

    /// Number of records ever allocated (live or dead).
    pub fn allocated(&self) -> usize {
        self.nodes.len()
    }

    pub fn kind(&self, key: NodeKey) -> Option<&NodeKind> {
        self.record(key).map(|r| &r.kind)
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.record(key).and_then(|r| r.parent)
    }

    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.record(key).map(|r| r.children.as_slice()).unwrap_or(&[])
    }

    pub fn element_children(&self, key: NodeKey) -> impl Iterator<Item = NodeKey> + '_ {
        self.children(key)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
    }

    pub fn is_element(&self, key: NodeKey) -> bool {
        matches!(self.kind(key), Some(NodeKind::Element { .. }))
    }

    pub fn element_name(&self, key: NodeKey) -> Option<&str> {
        match self.kind(key)? {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn attributes(&self, key: NodeKey) -> &[Attribute] {
        match self.kind(key) {
            Some(NodeKind::Element { attributes, .. }) => attributes,
            _ => &[],
        }
    }

    pub fn attr(&self, key: NodeKey, name: &str) -> Option<&str> {
        self.attributes(key)
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Sets or overwrites an attribute. Returns `false` for non-elements.
    pub fn set_attr(&mut self, key: NodeKey, name: &str, value: impl Into<String>) -> bool {
        let Some(NodeKind::Element { attributes, .. }) = self.record_mut(key).map(|r| &mut r.kind)
        else {
            return false;
        };
        let value = value.into();
        match attributes.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => attributes.push(Attribute::new(name, value)),
        }
        true
    }

    pub fn remove_attr(&mut self, key: NodeKey, name: &str) -> bool {
        let Some(NodeKind::Element { attributes, .. }) = self.record_mut(key).map(|r| &mut r.kind)
        else {
            return false;
        };
        let before = attributes.len();
        attributes.retain(|a| a.name != name);
        attributes.len() != before
    }

    pub fn doctype(&self) -> Option<&str> {
        match self.kind(self.root())? {
            NodeKind::Document { doctype } => doctype.as_deref(),
            _ => None,
        }
    }

    pub fn set_doctype(&mut self, value: Option<String>) {
        if let Some(NodeKind::Document { doctype }) =
            self.record_mut(NodeKey::DOCUMENT).map(|r| &mut r.kind)
        {
            *doctype = value;
        }
    }

    /// The root element (`<html>` for parsed documents).
    pub fn document_element(&self) -> Option<NodeKey> {
        self.element_children(self.root()).next()
    }

    pub fn first_child_element(&self, parent: NodeKey, name: &str) -> Option<NodeKey> {
        self.element_children(parent)
            .find(|c| self.element_name(*c) == Some(name))
    }

    pub fn body(&self) -> Option<NodeKey> {
        self.document_element()
            .and_then(|html| self.first_child_element(html, "body"))
    }

    pub fn head(&self) -> Option<NodeKey> {
        self.document_element()
            .and_then(|html| self.first_child_element(html, "head"))
    }

    fn push(&mut self, kind: NodeKind) -> NodeKey {
        let key = NodeKey(self.nodes.len() as u32);
        self.nodes.push(NodeRecord {
            kind,
            parent: None,
            children: Vec::new(),
            live: true,
        });
        key
    }

    pub fn create_element(
        &mut self,
        name: impl Into<String>,
        attributes: Vec<Attribute>,
    ) -> NodeKey {
        self.push(NodeKind::Element {
            name: name.into(),
            attributes,
        })
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeKey {
        self.push(NodeKind::Text(text.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeKey {
        self.push(NodeKind::Comment(text.into()))
    }

    fn check_insert(&self, parent: NodeKey, child: NodeKey) -> Result<(), DomError> {
        let parent_rec = self.record(parent).ok_or(DomError::MissingNode(parent))?;
        let child_rec = self.record(child).ok_or(DomError::MissingNode(child))?;
        if !parent_rec.kind.allows_children() {
            return Err(DomError::NotAParent(parent));
        }
        if child_rec.parent.is_some() || child == NodeKey::DOCUMENT {
            return Err(DomError::AlreadyAttached(child));
        }
        if parent == child || self.is_ancestor(child, parent) {
            return Err(DomError::CycleDetected { parent, child });
        }
        Ok(())
    }

    /// True when `ancestor` is a strict ancestor of `node`.
    pub fn is_ancestor(&self, ancestor: NodeKey, node: NodeKey) -> bool {
        let mut cur = self.parent(node);
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.parent(p);
        }
        false
    }

    pub fn append_child(&mut self, parent: NodeKey, child: NodeKey) -> Result<(), DomError> {
        self.check_insert(parent, child)?;
        self.nodes[parent.index()].children.push(child);
        self.nodes[child.index()].parent = Some(parent);
        Ok(())
    }

    pub fn insert_child_at(
        &mut self,
        parent: NodeKey,
        position: usize,
        child: NodeKey,
    ) -> Result<(), DomError> {
        self.check_insert(parent, child)?;
        let siblings = &mut self.nodes[parent.index()].children;
        let position = position.min(siblings.len());
        siblings.insert(position, child);
        self.nodes[child.index()].parent = Some(parent);
        Ok(())
    }

    /// Appends text to `parent`, merging with a trailing text child.
    pub fn append_text(
        &mut self,
        parent: NodeKey,
        text: &str,
    ) -> Result<Option<NodeKey>, DomError> {
        if text.is_empty() {
            return Ok(None);
        }
        if let Some(&last) = self.children(parent).last()
            && let Some(NodeRecord {
                kind: NodeKind::Text(existing),
                ..
            }) = self.record_mut(last)
        {
            existing.push_str(text);
            return Ok(None);
        }
        let key = self.create_text(text);
        self.append_child(parent, key)?;
        Ok(Some(key))
    }

    /// Detaches `key` from its parent without destroying it.
    pub fn detach(&mut self, key: NodeKey) -> Result<(), DomError> {
        let parent = self.parent(key);
        if !self.is_live(key) {
            return Err(DomError::MissingNode(key));
        }
        if let Some(parent) = parent {
            self.nodes[parent.index()].children.retain(|c| *c != key);
            self.nodes[key.index()].parent = None;
        }
        Ok(())
    }

    /// Replaces `old` (a child of `parent`) with the detached node `new`.
    /// The old subtree is destroyed; its keys stop resolving.
    pub fn replace_child(
        &mut self,
        parent: NodeKey,
        old: NodeKey,
        new: NodeKey,
    ) -> Result<(), DomError> {
        if self.parent(old) != Some(parent) {
            return Err(DomError::NotAChild { parent, child: old });
        }
        self.check_insert(parent, new)?;
        let position = self.nodes[parent.index()]
            .children
            .iter()
            .position(|c| *c == old)
            .ok_or(DomError::NotAChild { parent, child: old })?;
        self.nodes[parent.index()].children[position] = new;
        self.nodes[new.index()].parent = Some(parent);
        self.nodes[old.index()].parent = None;
        self.destroy(old);
        Ok(())
    }

    /// Detaches and destroys the subtree rooted at `key`.
    pub fn remove_subtree(&mut self, key: NodeKey) -> Result<(), DomError> {
        if key == NodeKey::DOCUMENT {
            return Err(DomError::NotAChild {
                parent: key,
                child: key,
            });
        }
        self.detach(key)?;
        self.destroy(key);
        Ok(())
    }

    fn destroy(&mut self, key: NodeKey) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            let rec = &mut self.nodes[k.index()];
            rec.live = false;
            rec.parent = None;
            stack.append(&mut rec.children);
        }
    }

    /// Moves the children of `key` into its parent at its position, then
    /// destroys `key` itself.
    pub fn unwrap_node(&mut self, key: NodeKey) -> Result<(), DomError> {
        let parent = self.parent(key).ok_or(DomError::MissingNode(key))?;
        let position = self.nodes[parent.index()]
            .children
            .iter()
            .position(|c| *c == key)
            .ok_or(DomError::NotAChild { parent, child: key })?;
        let moved = std::mem::take(&mut self.nodes[key.index()].children);
        for child in &moved {
            self.nodes[child.index()].parent = Some(parent);
        }
        let siblings = &mut self.nodes[parent.index()].children;
        siblings.splice(position..=position, moved);
        let rec = &mut self.nodes[key.index()];
        rec.parent = None;
        rec.live = false;
        Ok(())
    }

    /// Pre-order traversal of the subtree rooted at `key` (inclusive).
    pub fn descendants(&self, key: NodeKey) -> Descendants<'_> {
        let stack = if self.is_live(key) { vec![key] } else { Vec::new() };
        Descendants { doc: self, stack }
    }

    pub fn text_content(&self, key: NodeKey) -> String {
        let mut out = String::new();
        for k in self.descendants(key) {
            if let Some(NodeKind::Text(t)) = self.kind(k) {
                out.push_str(t);
            }
        }
        out
    }

    /// Deep-copies the subtree `src_key` of `src` into this arena, returning the
    /// detached copy.
    pub fn import_subtree(&mut self, src: &Document, src_key: NodeKey) -> Option<NodeKey> {
        let kind = src.kind(src_key)?.clone();
        let kind = match kind {
            NodeKind::Document { .. } => return None,
            other => other,
        };
        let top = self.push(kind);
        let mut stack: Vec<(NodeKey, NodeKey)> = src
            .children(src_key)
            .iter()
            .rev()
            .map(|c| (*c, top))
            .collect();
        while let Some((src_child, dst_parent)) = stack.pop() {
            let Some(kind) = src.kind(src_child) else {
                continue;
            };
            let copy = self.push(kind.clone());
            self.nodes[dst_parent.index()].children.push(copy);
            self.nodes[copy.index()].parent = Some(dst_parent);
            stack.extend(src.children(src_child).iter().rev().map(|c| (*c, copy)));
        }
        Some(top)
    }

    /// Position of `key` among its parent's element children.
    pub fn element_index(&self, key: NodeKey) -> Option<usize> {
        let parent = self.parent(key)?;
        self.element_children(parent).position(|c| c == key)
    }

    pub fn nth_element_child(&self, parent: NodeKey, index: usize) -> Option<NodeKey> {
        self.element_children(parent).nth(index)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeKey>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeKey;

    fn next(&mut self) -> Option<NodeKey> {
        let key = self.stack.pop()?;
        self.stack
            .extend(self.doc.children(key).iter().rev().copied());
        Some(key)
    }
}
