pub mod debug;
pub mod dom;
#[cfg(any(test, feature = "dom-snapshot"))]
pub mod dom_snapshot;
pub mod sanitize;
pub mod serialize;

mod entities;
mod tokenizer;
mod tree_builder;

use std::fmt;

pub use crate::dom::{Attribute, Document, DomError, NodeKey, NodeKind};
pub use crate::sanitize::{
    AST_ID_ATTR, AST_PARENT_ID_ATTR, AST_TEMP_ATTR, DIAGNOSTIC_ATTRIBUTES, GateRejection,
    PassthroughGate, Sanitizer, TrustedContentGate,
};
pub use crate::serialize::{serialize_children, serialize_document, serialize_node};
pub use crate::tokenizer::{Token, Tokenizer, tokenize};

/// Hard limits the parser refuses to exceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseLimits {
    pub max_input_bytes: usize,
    pub max_nodes: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: 16 * 1024 * 1024,
            max_nodes: 1_000_000,
        }
    }
}

/// The parser declined to produce a tree. Malformed markup is never a failure;
/// it is repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    InputTooLarge { len: usize, limit: usize },
    TooManyNodes { limit: usize },
    Rejected(String),
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::InputTooLarge { len, limit } => {
                write!(f, "input of {len} bytes exceeds the {limit} byte limit")
            }
            ParseFailure::TooManyNodes { limit } => {
                write!(f, "document exceeds the {limit} node limit")
            }
            ParseFailure::Rejected(reason) => write!(f, "content rejected: {reason}"),
        }
    }
}

impl std::error::Error for ParseFailure {}

fn check_size(markup: &str, limits: &ParseLimits) -> Result<(), ParseFailure> {
    if markup.len() > limits.max_input_bytes {
        return Err(ParseFailure::InputTooLarge {
            len: markup.len(),
            limit: limits.max_input_bytes,
        });
    }
    Ok(())
}

/// Parse a full document. The result always has `html`, `head` and `body`.
pub fn parse_document(markup: &str, limits: &ParseLimits) -> Result<Document, ParseFailure> {
    check_size(markup, limits)?;
    tree_builder::TreeBuilder::for_document(limits).run(markup)
}

/// Parse markup as the contents of a `<body>`. Top-level nodes become the
/// children of the returned document's root.
pub fn parse_fragment(markup: &str, limits: &ParseLimits) -> Result<Document, ParseFailure> {
    check_size(markup, limits)?;
    tree_builder::TreeBuilder::for_fragment(limits).run(markup)
}
