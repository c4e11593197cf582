//! Gatekeeping for untrusted generator output.
//!
//! Markup is routed through the host's [`TrustedContentGate`] when one is
//! installed. Without a gate, parsing proceeds and a single warning per
//! [`Sanitizer`] records that content was not sanitized.

use std::fmt;

use crate::dom::Document;
use crate::{ParseFailure, ParseLimits, parse_document, parse_fragment, serialize_document};

/// Stable per-snapshot identity written on indexed elements.
pub const AST_ID_ATTR: &str = "data-ast-id";
/// Identity of the indexed element's parent (absent on the root element).
pub const AST_PARENT_ID_ATTR: &str = "data-ast-parent-id";
/// Marks the temporary container wrapping a scoped replacement.
pub const AST_TEMP_ATTR: &str = "data-ast-temp-div";

pub const DIAGNOSTIC_ATTRIBUTES: [&str; 3] = [AST_ID_ATTR, AST_PARENT_ID_ATTR, AST_TEMP_ATTR];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRejection(pub String);

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host-provided policy that vets raw markup before it is parsed.
pub trait TrustedContentGate: Send {
    fn admit_html(&self, raw: &str) -> Result<String, GateRejection>;
}

/// Admits everything unchanged. Useful when the surface itself enforces a
/// no-script sandbox and the host only needs the gate to exist.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughGate;

impl TrustedContentGate for PassthroughGate {
    fn admit_html(&self, raw: &str) -> Result<String, GateRejection> {
        Ok(raw.to_owned())
    }
}

pub struct Sanitizer {
    gate: Option<Box<dyn TrustedContentGate>>,
    limits: ParseLimits,
    warned_unsanitized: bool,
}

impl fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sanitizer")
            .field("gated", &self.gate.is_some())
            .field("limits", &self.limits)
            .field("warned_unsanitized", &self.warned_unsanitized)
            .finish()
    }
}

impl Sanitizer {
    pub fn new(limits: ParseLimits) -> Self {
        Self {
            gate: None,
            limits,
            warned_unsanitized: false,
        }
    }

    pub fn with_gate(gate: Box<dyn TrustedContentGate>, limits: ParseLimits) -> Self {
        Self {
            gate: Some(gate),
            limits,
            warned_unsanitized: false,
        }
    }

    pub fn limits(&self) -> &ParseLimits {
        &self.limits
    }

    pub fn is_gated(&self) -> bool {
        self.gate.is_some()
    }

    fn admit(&mut self, raw: &str) -> Result<Option<String>, ParseFailure> {
        match &self.gate {
            Some(gate) => gate
                .admit_html(raw)
                .map(Some)
                .map_err(|rejection| ParseFailure::Rejected(rejection.0)),
            None => {
                if !self.warned_unsanitized {
                    self.warned_unsanitized = true;
                    log::warn!(
                        target: "drift.sanitize",
                        "no trusted-content gate installed; generated markup is parsed unsanitized"
                    );
                }
                Ok(None)
            }
        }
    }

    pub fn parse_document(&mut self, raw: &str) -> Result<Document, ParseFailure> {
        let admitted = self.admit(raw)?;
        parse_document(admitted.as_deref().unwrap_or(raw), &self.limits)
    }

    pub fn parse_fragment(&mut self, raw: &str) -> Result<Document, ParseFailure> {
        let admitted = self.admit(raw)?;
        parse_fragment(admitted.as_deref().unwrap_or(raw), &self.limits)
    }

    /// Removes every diagnostic attribute from `doc`.
    pub fn strip_diagnostics(doc: &mut Document) {
        let keys: Vec<_> = doc
            .descendants(doc.root())
            .filter(|k| doc.is_element(*k))
            .collect();
        for key in keys {
            for attr in DIAGNOSTIC_ATTRIBUTES {
                doc.remove_attr(key, attr);
            }
        }
    }

    /// Serialization of `doc` with diagnostics removed; `doc` is untouched.
    pub fn sanitized_markup(doc: &Document) -> String {
        let mut copy = doc.clone();
        Self::strip_diagnostics(&mut copy);
        serialize_document(&copy)
    }
}
