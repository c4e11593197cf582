//! Region capture: drag a rectangle over the reference design and produce a
//! before/after raster pair of that area.
//!
//! [`RegionCapture`] is a small state machine (`Idle` / `Dragging`). Releasing
//! a valid drag hands the rectangle to [`host::commit`], which runs the
//! rasterization passes against a [`host::CaptureHost`].

pub mod host;
pub mod software;

use std::fmt;
use std::time::{Duration, Instant};

use core_types::blob::{BlobError, BlobRegistry, StoredBlob};
use core_types::{Point, Rectangle};

pub use host::{CaptureHost, Layer, commit};
pub use software::SoftwarePage;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureConfig {
    /// Distance outside the reference bounds that still starts a drag.
    pub padding: f32,
    pub min_width: f32,
    pub min_height: f32,
    /// Shorter presses are treated as clicks, not captures.
    pub min_duration: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            padding: 40.0,
            min_width: 10.0,
            min_height: 10.0,
            min_duration: Duration::from_millis(1000),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Escape,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CaptureState {
    Idle,
    Dragging {
        origin: Point,
        current: Point,
        bounds: Rectangle,
        started: Instant,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CancelReason {
    Escape,
    TooShort { held: Duration },
    TooSmall { width: f32, height: f32 },
}

/// Paired rasters of one committed region.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureRegion {
    pub rect: Rectangle,
    /// The design image under the rectangle.
    pub reference_region: StoredBlob,
    /// The generated rendering under the rectangle.
    pub current_region: StoredBlob,
}

impl CaptureRegion {
    pub fn width(&self) -> f32 {
        self.rect.width
    }

    pub fn height(&self) -> f32 {
        self.rect.height
    }

    /// Revokes both raster URLs.
    pub fn release(&self, blobs: &mut BlobRegistry) {
        blobs.revoke(&self.reference_region.url);
        blobs.revoke(&self.current_region.url);
    }
}

#[derive(Debug, PartialEq)]
pub enum CaptureOutcome {
    Cancelled(CancelReason),
    Committed(CaptureRegion),
}

#[derive(Debug)]
pub enum CaptureError {
    Raster(String),
    Encode(String),
    Blob(BlobError),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Raster(msg) => write!(f, "rasterization failed: {msg}"),
            CaptureError::Encode(msg) => write!(f, "raster encoding failed: {msg}"),
            CaptureError::Blob(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<BlobError> for CaptureError {
    fn from(err: BlobError) -> Self {
        CaptureError::Blob(err)
    }
}

#[derive(Debug)]
pub struct RegionCapture {
    config: CaptureConfig,
    state: CaptureState,
}

impl RegionCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: CaptureState::Idle,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == CaptureState::Idle
    }

    /// Starts a drag if `point` is a primary press within the padded
    /// reference bounds. Returns whether a drag started.
    pub fn pointer_down(
        &mut self,
        point: Point,
        button: PointerButton,
        reference_bounds: Rectangle,
        now: Instant,
    ) -> bool {
        if button != PointerButton::Primary || !self.is_idle() {
            return false;
        }
        if !reference_bounds.inflate(self.config.padding).contains(point) {
            return false;
        }
        let origin = reference_bounds.clamp_point(point);
        self.state = CaptureState::Dragging {
            origin,
            current: origin,
            bounds: reference_bounds,
            started: now,
        };
        true
    }

    /// Updates the drag and returns the rectangle to draw as the overlay.
    pub fn pointer_move(&mut self, point: Point) -> Option<Rectangle> {
        let CaptureState::Dragging {
            origin,
            current,
            bounds,
            ..
        } = &mut self.state
        else {
            return None;
        };
        *current = bounds.clamp_point(point);
        Some(Rectangle::from_corners(*origin, *current))
    }

    pub fn key_down(&mut self, key: Key) -> Option<CancelReason> {
        if key != Key::Escape || self.is_idle() {
            return None;
        }
        self.state = CaptureState::Idle;
        log::debug!(target: "drift.capture", "drag cancelled by escape");
        Some(CancelReason::Escape)
    }

    /// Ends the drag. Always returns to `Idle`; yields the rectangle only when
    /// the drag was long and large enough.
    pub fn pointer_up(
        &mut self,
        point: Point,
        now: Instant,
    ) -> Option<Result<Rectangle, CancelReason>> {
        let CaptureState::Dragging {
            origin,
            bounds,
            started,
            ..
        } = self.state
        else {
            return None;
        };
        self.state = CaptureState::Idle;

        let held = now.saturating_duration_since(started);
        if held < self.config.min_duration {
            log::debug!(target: "drift.capture", "release after {held:?}; treated as a click");
            return Some(Err(CancelReason::TooShort { held }));
        }
        let rect = Rectangle::from_corners(origin, bounds.clamp_point(point));
        if rect.width < self.config.min_width || rect.height < self.config.min_height {
            log::debug!(
                target: "drift.capture",
                "selection {}x{} below minimum",
                rect.width,
                rect.height
            );
            return Some(Err(CancelReason::TooSmall {
                width: rect.width,
                height: rect.height,
            }));
        }
        Some(Ok(rect))
    }

    /// [`Self::pointer_up`] followed by [`commit`] when the drag is valid.
    ///
    /// A rasterization failure is returned as `Err`; the machine is `Idle`
    /// and the host state restored, so the user can simply drag again.
    pub fn release<H: CaptureHost>(
        &mut self,
        point: Point,
        now: Instant,
        host: &mut H,
        blobs: &mut BlobRegistry,
    ) -> Result<Option<CaptureOutcome>, CaptureError> {
        match self.pointer_up(point, now) {
            None => Ok(None),
            Some(Err(reason)) => Ok(Some(CaptureOutcome::Cancelled(reason))),
            Some(Ok(rect)) => {
                commit(host, rect, blobs).map(|region| Some(CaptureOutcome::Committed(region)))
            }
        }
    }
}

impl Default for RegionCapture {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}
