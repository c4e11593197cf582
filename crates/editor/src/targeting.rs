//! Maps a node reported by the render surface back to an [`Address`].

use std::fmt;

use bus::surface::SurfaceNode;
use html::Document;

use crate::engine::{PreservedMapping, ScopedTarget};
use crate::index::{Address, AstId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// The surface node carries no `data-ast-id` (e.g. inserted by a scoped
    /// edit and not yet indexed).
    NoId,
    MalformedId(String),
    UnknownId(AstId),
    /// The root element has no parent to address it through.
    NoParent(AstId),
    Detached(AstId),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NoId => write!(f, "node has no id"),
            ResolveError::MalformedId(raw) => write!(f, "node id {raw:?} is not a number"),
            ResolveError::UnknownId(id) => write!(f, "id {id} is not in the mapping"),
            ResolveError::NoParent(id) => write!(f, "node {id} has no parent"),
            ResolveError::Detached(id) => write!(f, "node {id} is detached"),
        }
    }
}

impl std::error::Error for ResolveError {}

pub fn parse_ast_id(node: &SurfaceNode) -> Result<AstId, ResolveError> {
    let raw = node.ast_id.as_deref().ok_or(ResolveError::NoId)?;
    raw.trim()
        .parse()
        .map_err(|_| ResolveError::MalformedId(raw.to_owned()))
}

/// Resolves `node` through `preserved` against the tree it was pinned from.
/// `child_index` is computed from the parent's current element children.
pub fn resolve(
    node: &SurfaceNode,
    preserved: &PreservedMapping,
    doc: &Document,
) -> Result<Address, ResolveError> {
    let id = parse_ast_id(node)?;
    if !node.connected {
        return Err(ResolveError::Detached(id));
    }
    let mapping = preserved.mapping();
    let record = mapping.get(id).ok_or(ResolveError::UnknownId(id))?;
    let parent_id = record.parent.ok_or(ResolveError::NoParent(id))?;
    let parent = mapping.get(parent_id).ok_or(ResolveError::UnknownId(parent_id))?;
    if !doc.is_live(record.key) || doc.parent(record.key) != Some(parent.key) {
        return Err(ResolveError::Detached(id));
    }
    let child_index = doc.element_index(record.key).ok_or(ResolveError::Detached(id))?;
    Ok(Address {
        parent_id,
        child_index,
    })
}

/// [`resolve`] packaged as the target of a scoped edit.
pub fn scoped_target(
    node: &SurfaceNode,
    preserved: PreservedMapping,
    doc: &Document,
) -> Result<ScopedTarget, ResolveError> {
    let address = resolve(node, &preserved, doc)?;
    let id = parse_ast_id(node)?;
    Ok(ScopedTarget {
        id,
        address,
        preserved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PatchEngine;
    use html::{ParseLimits, Sanitizer};

    fn engine(markup: &str) -> PatchEngine {
        let mut engine = PatchEngine::new(Sanitizer::new(ParseLimits::default()));
        engine.replace_whole(markup).unwrap();
        engine
    }

    #[test]
    fn resolves_element_position_among_element_children() {
        let engine = engine("<ul>\n<li>a</li>\n<li>b</li>\n</ul>");
        let preserved = engine.pin().unwrap();
        let doc = &engine.live().unwrap().doc;
        let addr = resolve(&SurfaceNode::new(9, Some("5")), &preserved, doc).unwrap();
        assert_eq!(
            addr,
            Address {
                parent_id: 3,
                child_index: 1
            }
        );
    }

    #[test]
    fn rejects_unresolvable_nodes() {
        let engine = engine("<p>x</p>");
        let preserved = engine.pin().unwrap();
        let doc = &engine.live().unwrap().doc;
        let check = |node: SurfaceNode| resolve(&node, &preserved, doc);

        assert_eq!(check(SurfaceNode::new(1, None)), Err(ResolveError::NoId));
        assert_eq!(
            check(SurfaceNode::new(1, Some("abc"))),
            Err(ResolveError::MalformedId("abc".into()))
        );
        assert_eq!(check(SurfaceNode::new(1, Some("77"))), Err(ResolveError::UnknownId(77)));
        assert_eq!(check(SurfaceNode::new(1, Some("0"))), Err(ResolveError::NoParent(0)));
        let mut gone = SurfaceNode::new(1, Some("3"));
        gone.connected = false;
        assert_eq!(check(gone), Err(ResolveError::Detached(3)));
    }

    #[test]
    fn node_replaced_by_scoped_edit_is_detached() {
        let mut engine = engine("<div><p>a</p></div>");
        let preserved = engine.pin().unwrap();
        let node = SurfaceNode::new(1, Some("4"));
        let target = scoped_target(&node, preserved.clone(), &engine.live().unwrap().doc).unwrap();
        engine.replace_scoped("<p>b</p>", &target).unwrap();
        assert_eq!(
            resolve(&node, &preserved, &engine.live().unwrap().doc),
            Err(ResolveError::Detached(4))
        );
    }
}
