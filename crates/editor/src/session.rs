//! One editing session: the live snapshot, the render surface, the feedback
//! flow and the generation in flight.
//!
//! The session is driven cooperatively from the host thread. Generator
//! output arrives as [`CoreEvent`]s tagged with a [`GenerationId`]; events
//! for anything but the current generation are dropped.

use std::fmt;
use std::sync::mpsc::Sender;
use std::time::Instant;

use bus::surface::{SurfaceEndpoint, SurfaceNode};
use bus::{CoreCommand, CoreEvent, ImageAttachment};
use capture::{
    CaptureConfig, CaptureError, CaptureHost, CaptureOutcome, CaptureRegion, RegionCapture,
};
use core_types::blob::{Blob, BlobError, BlobRegistry};
use core_types::{GenerationId, Point, SnapshotVersion};
use html::{ParseLimits, Sanitizer, TrustedContentGate};
use runtime_stream::{CoalescePolicy, Coalescer};
use tools::fence::strip_code_fence;

use crate::engine::{PatchEngine, PatchError, PatchOutcome, PreservedMapping, ScopedTarget};
use crate::index::AstId;
use crate::prompt::{self, PromptScope};
use crate::surface::{RenderSurfaceBridge, SandboxPolicy, SurfaceAction};
use crate::targeting::{self, ResolveError};

pub const REFERENCE_IMAGE_LABEL: &str = "Original Design.png";
pub const CURRENT_IMAGE_LABEL: &str = "Current Design.png";

#[derive(Clone, Copy, Debug, Default)]
pub struct EditorConfig {
    pub limits: ParseLimits,
    pub coalesce: CoalescePolicy,
    pub capture: CaptureConfig,
    pub sandbox: SandboxPolicy,
}

/// What to generate. `target: None` edits the whole document.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub target: Option<ScopedTarget>,
    pub prompt_text: String,
    pub reference_images: Vec<ImageAttachment>,
}

/// The last generation that failed, kept so it can be retried as-is.
#[derive(Clone, Debug)]
pub struct GenerationFailure {
    pub generation: GenerationId,
    pub error: String,
    pub request: GenerationRequest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextAction {
    ViewInCode,
    RetouchWithAi,
    DeleteNode,
}

#[derive(Debug)]
pub enum ContextOutcome {
    /// 1-based line of the node in the source markup.
    Line(usize),
    Retouch(ScopedTarget),
    Deleted(PatchOutcome),
}

/// A committed capture awaiting the user's feedback text.
#[derive(Debug)]
pub struct PendingFeedback {
    pub region: CaptureRegion,
}

#[derive(Debug)]
pub enum SessionError {
    Patch(PatchError),
    Resolve(ResolveError),
    Capture(CaptureError),
    Blob(BlobError),
    NodeNotFound(AstId),
    NoFeedback,
    NoFailure,
    /// The failed request targeted a snapshot that has since been replaced.
    StaleRetry,
    /// A node was picked on a surface rendered from a replaced snapshot.
    StaleTarget {
        pinned: SnapshotVersion,
        live: Option<SnapshotVersion>,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Patch(err) => write!(f, "{err}"),
            SessionError::Resolve(err) => write!(f, "cannot target node: {err}"),
            SessionError::Capture(err) => write!(f, "{err}"),
            SessionError::Blob(err) => write!(f, "{err}"),
            SessionError::NodeNotFound(id) => write!(f, "node {id} not found in the source"),
            SessionError::NoFeedback => write!(f, "no capture is awaiting feedback"),
            SessionError::NoFailure => write!(f, "no failed generation to retry"),
            SessionError::StaleRetry => {
                write!(f, "the failed request targets a replaced document")
            }
            SessionError::StaleTarget { pinned, live } => match live {
                Some(live) => write!(
                    f,
                    "node picked on snapshot {} but snapshot {} is live",
                    pinned.0, live.0
                ),
                None => write!(f, "node picked on snapshot {} but nothing is loaded", pinned.0),
            },
        }
    }
}

impl std::error::Error for SessionError {}

impl From<PatchError> for SessionError {
    fn from(err: PatchError) -> Self {
        SessionError::Patch(err)
    }
}

impl From<ResolveError> for SessionError {
    fn from(err: ResolveError) -> Self {
        SessionError::Resolve(err)
    }
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        SessionError::Capture(err)
    }
}

impl From<BlobError> for SessionError {
    fn from(err: BlobError) -> Self {
        SessionError::Blob(err)
    }
}

#[derive(Debug)]
struct InFlight {
    generation: GenerationId,
    request: GenerationRequest,
}

pub struct EditorSession {
    engine: PatchEngine,
    bridge: RenderSurfaceBridge,
    blobs: BlobRegistry,
    coalescer: Coalescer<String>,
    capture: RegionCapture,
    cmd_tx: Sender<CoreCommand>,
    generation: GenerationId,
    in_flight: Option<InFlight>,
    // Scoped output applied to the live tree and not yet finalized.
    markers_pending: bool,
    last_applied: Option<String>,
    last_failure: Option<GenerationFailure>,
    feedback: Option<PendingFeedback>,
    retouch: Option<ScopedTarget>,
    endpoint: Option<SurfaceEndpoint>,
}

impl EditorSession {
    pub fn new(config: EditorConfig, cmd_tx: Sender<CoreCommand>) -> Self {
        Self::with_sanitizer(config, Sanitizer::new(config.limits), cmd_tx)
    }

    pub fn with_gate(
        config: EditorConfig,
        gate: Box<dyn TrustedContentGate>,
        cmd_tx: Sender<CoreCommand>,
    ) -> Self {
        Self::with_sanitizer(config, Sanitizer::with_gate(gate, config.limits), cmd_tx)
    }

    fn with_sanitizer(
        config: EditorConfig,
        sanitizer: Sanitizer,
        cmd_tx: Sender<CoreCommand>,
    ) -> Self {
        Self {
            engine: PatchEngine::new(sanitizer),
            bridge: RenderSurfaceBridge::new(config.sandbox),
            blobs: BlobRegistry::new(),
            coalescer: Coalescer::new(config.coalesce),
            capture: RegionCapture::new(config.capture),
            cmd_tx,
            generation: GenerationId::NONE,
            in_flight: None,
            markers_pending: false,
            last_applied: None,
            last_failure: None,
            feedback: None,
            retouch: None,
            endpoint: None,
        }
    }

    pub fn engine(&self) -> &PatchEngine {
        &self.engine
    }

    pub fn bridge(&self) -> &RenderSurfaceBridge {
        &self.bridge
    }

    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }

    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_failure(&self) -> Option<&GenerationFailure> {
        self.last_failure.as_ref()
    }

    pub fn pending_feedback(&self) -> Option<&PendingFeedback> {
        self.feedback.as_ref()
    }

    pub fn retouch_target(&self) -> Option<&ScopedTarget> {
        self.retouch.as_ref()
    }

    pub fn capture_mut(&mut self) -> &mut RegionCapture {
        &mut self.capture
    }

    /// The endpoint of the most recently rendered surface, once.
    pub fn take_surface_endpoint(&mut self) -> Option<SurfaceEndpoint> {
        self.endpoint.take()
    }

    /// Sanitized markup of the live snapshot.
    pub fn source(&self) -> Option<String> {
        self.engine.current_outcome().map(|o| o.sanitized_markup)
    }

    /// Loads `markup` as the initial (or a replacement) document.
    pub fn load(&mut self, markup: &str) -> Result<PatchOutcome, SessionError> {
        let outcome = self.engine.replace_whole(markup)?;
        self.markers_pending = false;
        self.render(&outcome.render_markup)?;
        Ok(outcome)
    }

    /// Recomputes the render payload from the live snapshot.
    pub fn rerender(&mut self) -> Result<(), SessionError> {
        let outcome = self.engine.current_outcome().ok_or(PatchError::NoSnapshot)?;
        self.render(&outcome.render_markup)
    }

    fn render(&mut self, markup: &str) -> Result<(), SessionError> {
        let pinned = self.engine.pin().ok_or(PatchError::NoSnapshot)?;
        let endpoint = self.bridge.render(markup, pinned, &mut self.blobs)?;
        self.endpoint = Some(endpoint);
        Ok(())
    }

    fn send_cmd(&self, cmd: CoreCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            log::warn!(target: "drift.session", "generation runtime is gone; command dropped");
        }
    }

    // -- Generation ---

    /// Dispatches `request`, superseding whatever generation is in flight.
    pub fn begin_generation(&mut self, request: GenerationRequest) -> GenerationId {
        if self.coalescer.cancel() {
            log::debug!(
                target: "drift.session",
                "dropped pending output of generation {}",
                self.generation.0
            );
        }
        if let Some(prev) = self.in_flight.take() {
            self.send_cmd(CoreCommand::CancelGeneration {
                generation: prev.generation,
            });
        }
        self.generation = self.generation.next();
        self.last_applied = None;
        self.last_failure = None;
        self.retouch = None;

        log::debug!(
            target: "drift.session",
            "generation {} ({})",
            self.generation.0,
            match &request.target {
                Some(t) => format!("scoped at {}", t.address),
                None => "whole document".to_string(),
            }
        );
        self.send_cmd(CoreCommand::Generate {
            generation: self.generation,
            prompt: request.prompt_text.clone(),
            images: request.reference_images.clone(),
        });
        self.in_flight = Some(InFlight {
            generation: self.generation,
            request,
        });
        self.generation
    }

    /// Whole-document request over the current source.
    pub fn request_whole(
        &mut self,
        feedback: &str,
        images: Vec<ImageAttachment>,
    ) -> GenerationId {
        self.settle();
        let code = self.source().unwrap_or_default();
        let prompt_text =
            prompt::compose(PromptScope::WholeDocument, &code, feedback, images.len());
        self.begin_generation(GenerationRequest {
            target: None,
            prompt_text,
            reference_images: images,
        })
    }

    /// First pass from the design image alone.
    pub fn request_from_design(&mut self, design: Blob) -> GenerationId {
        self.request_whole(
            prompt::FIRST_ITERATION,
            vec![ImageAttachment {
                label: REFERENCE_IMAGE_LABEL,
                blob: design,
            }],
        )
    }

    /// Scoped request replacing the subtree at `target`. The target must be
    /// pinned to the live snapshot.
    pub fn request_scoped(
        &mut self,
        target: ScopedTarget,
        feedback: &str,
        images: Vec<ImageAttachment>,
    ) -> Result<GenerationId, SessionError> {
        self.ensure_current(&target.preserved)?;
        let snippet = self
            .engine
            .snippet(target.id)
            .ok_or(SessionError::NodeNotFound(target.id))?;
        let prompt_text = prompt::compose(PromptScope::Snippet, &snippet, feedback, images.len());
        Ok(self.begin_generation(GenerationRequest {
            target: Some(target),
            prompt_text,
            reference_images: images,
        }))
    }

    /// Re-dispatches the last failed request.
    pub fn retry(&mut self) -> Result<GenerationId, SessionError> {
        let failure = self.last_failure.take().ok_or(SessionError::NoFailure)?;
        if let Some(target) = &failure.request.target
            && Some(target.preserved.version()) != self.engine.version()
        {
            self.last_failure = Some(failure);
            return Err(SessionError::StaleRetry);
        }
        log::debug!(target: "drift.session", "retrying generation {}", failure.generation.0);
        Ok(self.begin_generation(failure.request))
    }

    /// Feeds one runtime event. Returns the outcome of the last patch it
    /// caused, if any.
    pub fn on_core_event(&mut self, evt: CoreEvent, now: Instant) -> Option<PatchOutcome> {
        let current = self.in_flight.as_ref().map(|f| f.generation);
        if current != Some(evt.generation()) {
            log::warn!(
                target: "drift.session",
                "dropping event of stale generation {} (current {})",
                evt.generation().0,
                self.generation.0
            );
            return None;
        }

        match evt {
            CoreEvent::GenerationStarted { generation } => {
                log::debug!(target: "drift.session", "generation {} streaming", generation.0);
                None
            }
            CoreEvent::GenerationChunk { text, .. } => {
                let ready = self.coalescer.push(text, now)?;
                self.apply(&ready)
            }
            CoreEvent::GenerationDone { generation } => {
                let mut outcome = self.coalescer.flush_now().and_then(|text| self.apply(&text));
                if let Some(finalized) = self.settle() {
                    outcome = Some(finalized);
                }
                self.in_flight = None;
                log::debug!(target: "drift.session", "generation {} done", generation.0);
                outcome
            }
            CoreEvent::GenerationFailed { generation, error } => {
                self.coalescer.cancel();
                let outcome = self.settle();
                if let Some(flight) = self.in_flight.take() {
                    log::warn!(
                        target: "drift.session",
                        "generation {} failed: {error}",
                        generation.0
                    );
                    self.last_failure = Some(GenerationFailure {
                        generation,
                        error,
                        request: flight.request,
                    });
                }
                outcome
            }
        }
    }

    /// Applies coalesced output whose quiet window has elapsed.
    pub fn tick(&mut self, now: Instant) -> Option<PatchOutcome> {
        let ready = self.coalescer.poll(now)?;
        self.apply(&ready)
    }

    /// When [`Self::tick`] should next be called.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.coalescer.deadline()
    }

    fn apply(&mut self, cumulative: &str) -> Option<PatchOutcome> {
        let markup = strip_code_fence(cumulative);
        if markup.is_empty() || self.last_applied.as_deref() == Some(markup) {
            return None;
        }
        let target = self.in_flight.as_ref()?.request.target.clone();
        let result = match &target {
            Some(target) => self.engine.replace_scoped(markup, target),
            None => self.engine.replace_whole(markup),
        };
        // Failures are logged by the engine; the previous tree stays.
        let outcome = result.ok()?;
        self.last_applied = Some(markup.to_owned());
        self.markers_pending = target.is_some();
        if let Err(err) = self.render(&outcome.render_markup) {
            log::warn!(target: "drift.session", "render failed: {err}");
        }
        Some(outcome)
    }

    // Finalizes scoped output still sitting in marker containers.
    fn settle(&mut self) -> Option<PatchOutcome> {
        if !self.markers_pending {
            return None;
        }
        self.markers_pending = false;
        match self.engine.finalize() {
            Ok(outcome) => {
                if let Err(err) = self.render(&outcome.render_markup) {
                    log::warn!(target: "drift.session", "render failed: {err}");
                }
                Some(outcome)
            }
            Err(err) => {
                log::warn!(target: "drift.session", "finalize failed: {err}");
                None
            }
        }
    }

    // -- Surface ---

    pub fn set_interactive(&mut self, interactive: bool) {
        self.bridge.set_interactive(interactive);
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.bridge.set_opacity(opacity);
    }

    /// Drains surface events. Selection and hover are handled by the bridge;
    /// context menus are returned for the host to offer [`ContextAction`]s.
    pub fn pump_surface(&mut self) -> Vec<SurfaceAction> {
        let actions = self.bridge.pump();
        for action in &actions {
            if let SurfaceAction::Selected(node) = action {
                log::trace!(target: "drift.session", "selected {:?}", node.ast_id);
            }
        }
        actions
    }

    /// Runs `action` on a node reported by [`SurfaceAction::ContextMenu`].
    /// `pinned` is the mapping carried by that action; once the live snapshot
    /// has moved on, every action is refused.
    pub fn context_action(
        &mut self,
        node: &SurfaceNode,
        pinned: &PreservedMapping,
        action: ContextAction,
    ) -> Result<ContextOutcome, SessionError> {
        self.ensure_current(pinned)?;
        match action {
            ContextAction::ViewInCode => {
                let id = pinned_id(node, pinned)?;
                let line = self
                    .engine
                    .source_line(id)
                    .ok_or(SessionError::NodeNotFound(id))?;
                Ok(ContextOutcome::Line(line))
            }
            ContextAction::RetouchWithAi => {
                let live = self.engine.live().ok_or(PatchError::NoSnapshot)?;
                let target = targeting::scoped_target(node, pinned.clone(), &live.doc)?;
                self.retouch = Some(target.clone());
                Ok(ContextOutcome::Retouch(target))
            }
            ContextAction::DeleteNode => {
                let id = pinned_id(node, pinned)?;
                let outcome = self.engine.delete_node(id)?;
                self.markers_pending = false;
                self.render(&outcome.render_markup)?;
                Ok(ContextOutcome::Deleted(outcome))
            }
        }
    }

    // Targets a node of the current surface through the mapping it was
    // rendered from.
    fn target_for(&self, node: &SurfaceNode) -> Result<ScopedTarget, SessionError> {
        let preserved = self.bridge.pinned().cloned().ok_or(PatchError::NoSnapshot)?;
        self.ensure_current(&preserved)?;
        let live = self.engine.live().ok_or(PatchError::NoSnapshot)?;
        Ok(targeting::scoped_target(node, preserved, &live.doc)?)
    }

    fn ensure_current(&self, pinned: &PreservedMapping) -> Result<(), SessionError> {
        let live = self.engine.version();
        if live == Some(pinned.version()) {
            return Ok(());
        }
        log::warn!(
            target: "drift.session",
            "refusing node pinned to snapshot {} (live {:?})",
            pinned.version().0,
            live.map(|v| v.0)
        );
        Err(SessionError::StaleTarget {
            pinned: pinned.version(),
            live,
        })
    }

    // -- Capture & feedback ---

    /// Ends a capture drag. A committed capture opens the feedback flow.
    pub fn release_capture<H: CaptureHost>(
        &mut self,
        point: Point,
        now: Instant,
        host: &mut H,
    ) -> Result<Option<CaptureOutcome>, SessionError> {
        match self.capture.release(point, now, host, &mut self.blobs)? {
            Some(CaptureOutcome::Committed(region)) => {
                let outcome = CaptureOutcome::Committed(region.clone());
                self.open_feedback(region);
                Ok(Some(outcome))
            }
            other => Ok(other),
        }
    }

    /// Holds `region` until the user confirms or dismisses it. A feedback
    /// already pending is dismissed.
    pub fn open_feedback(&mut self, region: CaptureRegion) {
        self.dismiss_feedback();
        self.feedback = Some(PendingFeedback { region });
    }

    /// Revokes both raster URLs of the pending feedback.
    pub fn dismiss_feedback(&mut self) -> bool {
        match self.feedback.take() {
            Some(fb) => {
                fb.region.release(&mut self.blobs);
                true
            }
            None => false,
        }
    }

    /// Turns the pending feedback into a generation request: scoped to the
    /// selected (or retouched) node when there is one, whole-document
    /// otherwise.
    pub fn confirm_feedback(&mut self, text: &str) -> Result<GenerationId, SessionError> {
        if self.feedback.is_none() {
            return Err(SessionError::NoFeedback);
        }
        self.settle();
        let target = match self.bridge.selected() {
            Some(node) => Some(self.target_for(node)?),
            None => self
                .retouch
                .take()
                .filter(|t| Some(t.preserved.version()) == self.engine.version()),
        };

        let fb = self.feedback.take().ok_or(SessionError::NoFeedback)?;
        let images = vec![
            ImageAttachment {
                label: REFERENCE_IMAGE_LABEL,
                blob: fb.region.reference_region.blob.clone(),
            },
            ImageAttachment {
                label: CURRENT_IMAGE_LABEL,
                blob: fb.region.current_region.blob.clone(),
            },
        ];
        // The attachments hold the bytes; the URLs are no longer needed.
        fb.region.release(&mut self.blobs);

        match target {
            Some(target) => self.request_scoped(target, text, images),
            None => Ok(self.request_whole(text, images)),
        }
    }

    /// Cancels the generation in flight, revokes every URL the session
    /// handed out and stops the runtime.
    pub fn shutdown(&mut self) {
        self.coalescer.cancel();
        if let Some(flight) = self.in_flight.take() {
            self.send_cmd(CoreCommand::CancelGeneration {
                generation: flight.generation,
            });
        }
        self.dismiss_feedback();
        self.bridge.teardown(&mut self.blobs);
        self.endpoint = None;
        self.send_cmd(CoreCommand::Shutdown);
    }
}

impl fmt::Debug for EditorSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorSession")
            .field("generation", &self.generation)
            .field("version", &self.engine.version())
            .field("generating", &self.in_flight.is_some())
            .field("feedback", &self.feedback.is_some())
            .finish()
    }
}

fn pinned_id(node: &SurfaceNode, pinned: &PreservedMapping) -> Result<AstId, SessionError> {
    let id = targeting::parse_ast_id(node)?;
    if pinned.mapping().get(id).is_none() {
        return Err(SessionError::NodeNotFound(id));
    }
    Ok(id)
}
