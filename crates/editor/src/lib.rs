//! Iterative refinement of generated markup.
//!
//! [`EditorSession`] ties the pieces together: the [`engine::PatchEngine`]
//! owns the live snapshot, [`surface::RenderSurfaceBridge`] projects it into
//! an isolated surface, and generator output streams in through the
//! coalescer as whole-document or scoped edits.

pub mod engine;
pub mod index;
pub mod prompt;
pub mod session;
pub mod surface;
pub mod targeting;

pub use engine::{
    AddressResolutionFailure, ChangedSubtree, PatchEngine, PatchError, PatchOutcome,
    PreservedMapping, ScopedTarget, Snapshot,
};
pub use index::{Address, AstId, IdMapping, NodeRecord, index_document};
pub use session::{
    ContextAction, ContextOutcome, EditorConfig, EditorSession, GenerationFailure,
    GenerationRequest, PendingFeedback, SessionError,
};
pub use surface::{RenderSurfaceBridge, SandboxPolicy, SurfaceAction};
pub use targeting::ResolveError;
