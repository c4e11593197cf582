//! The only writer of the live tree.
//!
//! A [`Snapshot`] is created by every whole-document replace and superseded
//! by the next one. Scoped edits mutate the live snapshot in place without
//! re-indexing, addressing their target through a [`PreservedMapping`]
//! pinned when the request was made.

use std::fmt;
use std::sync::Arc;

use core_types::SnapshotVersion;
use html::sanitize::{AST_ID_ATTR, AST_TEMP_ATTR};
use html::{
    Attribute, Document, DomError, NodeKey, ParseFailure, Sanitizer, serialize_document,
    serialize_node,
};

use crate::index::{Address, AstId, IdMapping, index_document};

/// An id mapping frozen at request time. Cheap to clone; it never follows
/// the live snapshot.
#[derive(Clone, Debug)]
pub struct PreservedMapping(Arc<IdMapping>);

impl PreservedMapping {
    pub fn version(&self) -> SnapshotVersion {
        self.0.version()
    }

    pub fn mapping(&self) -> &IdMapping {
        &self.0
    }
}

/// Two pins are equal when they hold the same snapshot's mapping.
impl PartialEq for PreservedMapping {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Target of a scoped edit: an address valid against `preserved`.
#[derive(Clone, Debug)]
pub struct ScopedTarget {
    pub id: AstId,
    pub address: Address,
    pub preserved: PreservedMapping,
}

#[derive(Debug)]
pub struct Snapshot {
    pub doc: Document,
    pub mapping: Arc<IdMapping>,
    pub version: SnapshotVersion,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangedSubtree {
    /// The whole document was replaced and re-indexed.
    Document,
    /// One element child was swapped for a marker container.
    Subtree {
        address: Address,
        /// Outer HTML of the marker container as rendered.
        markup: String,
    },
}

#[derive(Clone, Debug)]
pub struct PatchOutcome {
    pub version: SnapshotVersion,
    pub change: ChangedSubtree,
    /// Serialization with diagnostic attributes, handed to the render surface.
    pub render_markup: String,
    /// Serialization without diagnostics; the source of truth.
    pub sanitized_markup: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressResolutionFailure {
    /// The pinned mapping belongs to a superseded snapshot.
    StaleMapping {
        pinned: SnapshotVersion,
        live: SnapshotVersion,
    },
    MissingParent(AstId),
    /// The parent was removed from the live tree by an earlier scoped edit.
    ParentDetached(AstId),
    IndexOutOfRange {
        parent_id: AstId,
        child_index: usize,
        len: usize,
    },
}

impl fmt::Display for AddressResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressResolutionFailure::StaleMapping { pinned, live } => write!(
                f,
                "mapping from snapshot {} used against snapshot {}",
                pinned.0, live.0
            ),
            AddressResolutionFailure::MissingParent(id) => {
                write!(f, "parent {id} is not in the mapping")
            }
            AddressResolutionFailure::ParentDetached(id) => {
                write!(f, "parent {id} is no longer in the live tree")
            }
            AddressResolutionFailure::IndexOutOfRange {
                parent_id,
                child_index,
                len,
            } => write!(
                f,
                "child index {child_index} out of range for parent {parent_id} \
                 with {len} element children"
            ),
        }
    }
}

#[derive(Debug)]
pub enum PatchError {
    NoSnapshot,
    Parse(ParseFailure),
    AddressResolution(AddressResolutionFailure),
    UnknownNode(AstId),
    Dom(DomError),
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::NoSnapshot => write!(f, "no document loaded"),
            PatchError::Parse(err) => write!(f, "parse failed: {err}"),
            PatchError::AddressResolution(err) => write!(f, "address resolution failed: {err}"),
            PatchError::UnknownNode(id) => write!(f, "node {id} is not in the live tree"),
            PatchError::Dom(err) => write!(f, "tree update failed: {err}"),
        }
    }
}

impl std::error::Error for PatchError {}

impl From<ParseFailure> for PatchError {
    fn from(err: ParseFailure) -> Self {
        PatchError::Parse(err)
    }
}

impl From<AddressResolutionFailure> for PatchError {
    fn from(err: AddressResolutionFailure) -> Self {
        PatchError::AddressResolution(err)
    }
}

impl From<DomError> for PatchError {
    fn from(err: DomError) -> Self {
        PatchError::Dom(err)
    }
}

#[derive(Debug)]
pub struct PatchEngine {
    sanitizer: Sanitizer,
    live: Option<Snapshot>,
    last_version: SnapshotVersion,
}

impl PatchEngine {
    pub fn new(sanitizer: Sanitizer) -> Self {
        Self {
            sanitizer,
            live: None,
            last_version: SnapshotVersion::INITIAL,
        }
    }

    pub fn live(&self) -> Option<&Snapshot> {
        self.live.as_ref()
    }

    pub fn version(&self) -> Option<SnapshotVersion> {
        self.live.as_ref().map(|s| s.version)
    }

    /// Pins the live mapping for a request that will run later.
    pub fn pin(&self) -> Option<PreservedMapping> {
        self.live.as_ref().map(|s| PreservedMapping(Arc::clone(&s.mapping)))
    }

    /// Parses `markup` as a whole document and makes it the live snapshot.
    /// On failure the previous snapshot stays live.
    ///
    /// Marker containers are only unwrapped by [`Self::finalize`]; a marker
    /// attribute arriving in `markup` is dropped by indexing like any other
    /// diagnostic attribute.
    pub fn replace_whole(&mut self, markup: &str) -> Result<PatchOutcome, PatchError> {
        let mut doc = self.sanitizer.parse_document(markup).map_err(|err| {
            log::warn!(target: "drift.engine", "whole replace skipped: {err}");
            PatchError::Parse(err)
        })?;

        let version = self.last_version.next();
        self.last_version = version;
        let mapping = index_document(&mut doc, version);
        log::debug!(
            target: "drift.engine",
            "snapshot {} with {} indexed elements",
            version.0,
            mapping.len()
        );
        let snapshot = Snapshot {
            doc,
            mapping: Arc::new(mapping),
            version,
        };
        let outcome = PatchOutcome {
            version,
            change: ChangedSubtree::Document,
            render_markup: serialize_document(&snapshot.doc),
            sanitized_markup: Sanitizer::sanitized_markup(&snapshot.doc),
        };
        self.live = Some(snapshot);
        Ok(outcome)
    }

    /// Substitutes the element at `target.address` with `markup` parsed as a
    /// fragment, wrapped in a marker container. Ids elsewhere stay valid and
    /// the inserted nodes stay unindexed until [`Self::finalize`].
    pub fn replace_scoped(
        &mut self,
        markup: &str,
        target: &ScopedTarget,
    ) -> Result<PatchOutcome, PatchError> {
        let (parent_key, old) = self.resolve_address(target).map_err(|err| {
            log::warn!(target: "drift.engine", "scoped edit at {} skipped: {err}", target.address);
            err
        })?;

        let mut fragment = self.sanitizer.parse_fragment(markup).map_err(|err| {
            log::warn!(target: "drift.engine", "scoped edit at {} skipped: {err}", target.address);
            PatchError::Parse(err)
        })?;
        Sanitizer::strip_diagnostics(&mut fragment);

        let live = self.live.as_mut().ok_or(PatchError::NoSnapshot)?;
        let marker = live
            .doc
            .create_element("div", vec![Attribute::new(AST_TEMP_ATTR, "true")]);
        for &child in fragment.children(fragment.root()) {
            if let Some(copy) = live.doc.import_subtree(&fragment, child) {
                live.doc.append_child(marker, copy)?;
            }
        }
        live.doc.replace_child(parent_key, old, marker)?;
        log::trace!(
            target: "drift.engine",
            "scoped edit applied at {} ({} bytes)",
            target.address,
            markup.len()
        );

        Ok(PatchOutcome {
            version: live.version,
            change: ChangedSubtree::Subtree {
                address: target.address,
                markup: serialize_node(&live.doc, marker),
            },
            render_markup: serialize_document(&live.doc),
            sanitized_markup: Sanitizer::sanitized_markup(&live.doc),
        })
    }

    fn resolve_address(&self, target: &ScopedTarget) -> Result<(NodeKey, NodeKey), PatchError> {
        let live = self.live.as_ref().ok_or(PatchError::NoSnapshot)?;
        let pinned = target.preserved.version();
        if pinned != live.version {
            return Err(AddressResolutionFailure::StaleMapping {
                pinned,
                live: live.version,
            }
            .into());
        }
        let parent_id = target.address.parent_id;
        let parent = target
            .preserved
            .mapping()
            .get(parent_id)
            .ok_or(AddressResolutionFailure::MissingParent(parent_id))?;
        if !live.doc.is_live(parent.key) {
            return Err(AddressResolutionFailure::ParentDetached(parent_id).into());
        }
        let child_index = target.address.child_index;
        match live.doc.nth_element_child(parent.key, child_index) {
            Some(child) => Ok((parent.key, child)),
            None => Err(AddressResolutionFailure::IndexOutOfRange {
                parent_id,
                child_index,
                len: live.doc.element_children(parent.key).count(),
            }
            .into()),
        }
    }

    /// Promotes marker contents into their parents, serializes the result
    /// and replaces the whole document with it, assigning fresh ids.
    ///
    /// Markers are unwrapped in the arena before serializing: a `div` left
    /// in the text would close an enclosing `p` on reparse.
    pub fn finalize(&mut self) -> Result<PatchOutcome, PatchError> {
        let live = self.live.as_ref().ok_or(PatchError::NoSnapshot)?;
        let mut doc = live.doc.clone();
        let unwrapped = flatten_markers(&mut doc)?;
        log::trace!(target: "drift.engine", "finalize unwrapped {unwrapped} markers");
        let markup = serialize_document(&doc);
        self.replace_whole(&markup)
    }

    /// Removes the element `id` of the live mapping and commits the result.
    pub fn delete_node(&mut self, id: AstId) -> Result<PatchOutcome, PatchError> {
        let live = self.live.as_mut().ok_or(PatchError::NoSnapshot)?;
        let key = live
            .mapping
            .get(id)
            .map(|r| r.key)
            .filter(|k| live.doc.is_live(*k))
            .ok_or(PatchError::UnknownNode(id))?;
        if live.doc.parent(key).is_none_or(|p| p == live.doc.root()) {
            // The document element holds everything; removing it is never a
            // meaningful edit.
            return Err(PatchError::UnknownNode(id));
        }
        live.doc.remove_subtree(key)?;
        log::debug!(target: "drift.engine", "removed node {id}");
        self.finalize()
    }

    /// 1-based line of element `id` in the live markup. Attributes never
    /// contain raw newlines, so the line is the same with or without
    /// diagnostics.
    pub fn source_line(&self, id: AstId) -> Option<usize> {
        let live = self.live.as_ref()?;
        let markup = serialize_document(&live.doc);
        let needle = format!("{AST_ID_ATTR}=\"{id}\"");
        let offset = markup.find(&needle)?;
        Some(tools::text::line_of_offset(&markup, offset))
    }

    /// Outer HTML of element `id` without diagnostics, as sent to a
    /// generator for a scoped edit.
    pub fn snippet(&self, id: AstId) -> Option<String> {
        let live = self.live.as_ref()?;
        let key = live
            .mapping
            .get(id)
            .map(|r| r.key)
            .filter(|k| live.doc.is_live(*k))?;
        let mut copy = Document::new();
        let top = copy.import_subtree(&live.doc, key)?;
        copy.append_child(copy.root(), top).ok()?;
        Sanitizer::strip_diagnostics(&mut copy);
        Some(serialize_node(&copy, top))
    }

    /// Render and sanitized markup of the live snapshot as it stands.
    pub fn current_outcome(&self) -> Option<PatchOutcome> {
        let live = self.live.as_ref()?;
        Some(PatchOutcome {
            version: live.version,
            change: ChangedSubtree::Document,
            render_markup: serialize_document(&live.doc),
            sanitized_markup: Sanitizer::sanitized_markup(&live.doc),
        })
    }
}

/// Promotes the children of every marker container into its parent.
fn flatten_markers(doc: &mut Document) -> Result<usize, DomError> {
    let markers: Vec<NodeKey> = doc
        .descendants(doc.root())
        .filter(|k| doc.attr(*k, AST_TEMP_ATTR).is_some())
        .collect();
    for &marker in &markers {
        doc.unwrap_node(marker)?;
    }
    Ok(markers.len())
}
