use std::io::Cursor;
use std::ops::{Deref, DerefMut};

use core_types::Rectangle;
use core_types::blob::{Blob, BlobRegistry, StoredBlob};
use image::{ImageFormat, RgbaImage};

use crate::{CaptureError, CaptureRegion};

/// Page layers the commit sequence toggles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layer {
    /// The rectangle drawn while dragging.
    DragOverlay,
    /// The isolated surface showing the generated markup.
    RenderSurface,
    /// A rasterized copy of the render surface placed over it.
    Composite,
}

/// The page hosting the reference design and the render surface.
pub trait CaptureHost {
    fn surface_bounds(&self) -> Rectangle;

    fn set_layer_visible(&mut self, layer: Layer, visible: bool);

    /// Shows or hides hover/selection outlines on the render surface.
    fn set_selection_styling(&mut self, visible: bool);

    /// Sets the render surface opacity, returning the previous value.
    fn set_surface_opacity(&mut self, opacity: f32) -> f32;

    /// Rasterizes the page within `region`, leaving out `exclude`.
    fn rasterize_page(
        &mut self,
        region: Rectangle,
        exclude: &[Layer],
    ) -> Result<RgbaImage, CaptureError>;

    /// Rasterizes the render surface on its own, at its own bounds.
    fn rasterize_surface(&mut self) -> Result<RgbaImage, CaptureError>;

    fn place_composite(&mut self, image: RgbaImage, at: Rectangle);

    fn remove_composite(&mut self);
}

// Puts every toggle back when the commit ends, successfully or not.
struct RestoreGuard<'h, H: CaptureHost> {
    host: &'h mut H,
    prior_opacity: Option<f32>,
    composite_placed: bool,
}

impl<'h, H: CaptureHost> RestoreGuard<'h, H> {
    fn new(host: &'h mut H) -> Self {
        Self {
            host,
            prior_opacity: None,
            composite_placed: false,
        }
    }
}

impl<H: CaptureHost> Deref for RestoreGuard<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.host
    }
}

impl<H: CaptureHost> DerefMut for RestoreGuard<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.host
    }
}

impl<H: CaptureHost> Drop for RestoreGuard<'_, H> {
    fn drop(&mut self) {
        if self.composite_placed {
            self.host.remove_composite();
        }
        if let Some(opacity) = self.prior_opacity {
            self.host.set_surface_opacity(opacity);
        }
        self.host.set_selection_styling(true);
        self.host.set_layer_visible(Layer::DragOverlay, true);
    }
}

fn encode_png(image: &RgbaImage) -> Result<Blob, CaptureError> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(Blob::new("image/png", bytes))
}

/// Runs the three rasterization passes for `rect`:
///
/// 1. drag overlay and selection outlines hidden, page rasterized without
///    the render surface (the reference);
/// 2. render surface rasterized alone and placed as a composite over itself;
/// 3. outlines back, surface fully opaque, page rasterized without the drag
///    overlay but with the composite (the current rendering).
///
/// Host state is restored on every path.
pub fn commit<H: CaptureHost>(
    host: &mut H,
    rect: Rectangle,
    blobs: &mut BlobRegistry,
) -> Result<CaptureRegion, CaptureError> {
    let (reference, current) = {
        let mut guard = RestoreGuard::new(host);

        guard.set_layer_visible(Layer::DragOverlay, false);
        guard.set_selection_styling(false);
        let reference = guard
            .rasterize_page(rect, &[Layer::RenderSurface, Layer::Composite])
            .inspect_err(|e| log::warn!(target: "drift.capture", "reference pass: {e}"))?;

        let surface = guard
            .rasterize_surface()
            .inspect_err(|e| log::warn!(target: "drift.capture", "surface pass: {e}"))?;
        let surface_bounds = guard.surface_bounds();
        guard.place_composite(surface, surface_bounds);
        guard.composite_placed = true;

        guard.set_selection_styling(true);
        let prior = guard.set_surface_opacity(1.0);
        guard.prior_opacity = Some(prior);
        let current = guard
            .rasterize_page(rect, &[Layer::DragOverlay])
            .inspect_err(|e| log::warn!(target: "drift.capture", "current pass: {e}"))?;

        (reference, current)
    };

    let reference_region = store(blobs, &reference)?;
    let current_region = match store(blobs, &current) {
        Ok(stored) => stored,
        Err(err) => {
            blobs.revoke(&reference_region.url);
            return Err(err);
        }
    };
    log::debug!(
        target: "drift.capture",
        "captured {}x{} at ({}, {})",
        rect.width,
        rect.height,
        rect.x,
        rect.y
    );
    Ok(CaptureRegion {
        rect,
        reference_region,
        current_region,
    })
}

fn store(blobs: &mut BlobRegistry, image: &RgbaImage) -> Result<StoredBlob, CaptureError> {
    Ok(blobs.create(encode_png(image)?)?)
}
