//! In-memory [`CaptureHost`] compositing layered RGBA buffers.
//!
//! Layers, bottom to top: page background (holds the reference design),
//! render surface (blended by its opacity), composite, selection outline,
//! drag overlay.

use core_types::Rectangle;
use image::{Rgba, RgbaImage, imageops};

use crate::CaptureError;
use crate::host::{CaptureHost, Layer};

const OUTLINE: Rgba<u8> = Rgba([0, 120, 255, 255]);
const OVERLAY: Rgba<u8> = Rgba([0, 0, 0, 64]);

#[derive(Debug, Clone)]
pub struct SoftwarePage {
    background: RgbaImage,
    surface: RgbaImage,
    surface_bounds: Rectangle,
    surface_opacity: f32,
    selection_outline: Option<Rectangle>,
    selection_visible: bool,
    drag_overlay: Option<Rectangle>,
    overlay_visible: bool,
    composite: Option<(RgbaImage, Rectangle)>,
    fail_pass: Option<usize>,
    passes: usize,
}

impl SoftwarePage {
    /// `background` covers the whole page; `surface` is drawn at `surface_bounds`.
    pub fn new(background: RgbaImage, surface: RgbaImage, surface_bounds: Rectangle) -> Self {
        Self {
            background,
            surface,
            surface_bounds,
            surface_opacity: 1.0,
            selection_outline: None,
            selection_visible: true,
            drag_overlay: None,
            overlay_visible: true,
            composite: None,
            fail_pass: None,
            passes: 0,
        }
    }

    /// Page whose background is the encoded reference design.
    pub fn from_reference_bytes(
        reference: &[u8],
        surface: RgbaImage,
        surface_bounds: Rectangle,
    ) -> Result<Self, CaptureError> {
        let img = image::load_from_memory(reference)
            .map_err(|e| CaptureError::Raster(e.to_string()))?;
        Ok(Self::new(img.to_rgba8(), surface, surface_bounds))
    }

    pub fn page_bounds(&self) -> Rectangle {
        let (w, h) = self.background.dimensions();
        Rectangle::new(0.0, 0.0, w as f32, h as f32)
    }

    pub fn set_surface(&mut self, surface: RgbaImage) {
        self.surface = surface;
    }

    pub fn set_drag_overlay(&mut self, rect: Option<Rectangle>) {
        self.drag_overlay = rect;
    }

    pub fn set_selection_outline(&mut self, rect: Option<Rectangle>) {
        self.selection_outline = rect;
    }

    pub fn surface_opacity(&self) -> f32 {
        self.surface_opacity
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible
    }

    pub fn selection_visible(&self) -> bool {
        self.selection_visible
    }

    pub fn has_composite(&self) -> bool {
        self.composite.is_some()
    }

    /// Makes the `n`th rasterization call (0-based, page or surface) fail.
    pub fn fail_on_pass(&mut self, n: usize) {
        self.fail_pass = Some(n);
        self.passes = 0;
    }

    fn next_pass(&mut self) -> Result<(), CaptureError> {
        let pass = self.passes;
        self.passes += 1;
        if self.fail_pass == Some(pass) {
            return Err(CaptureError::Raster(format!("pass {pass} failed")));
        }
        Ok(())
    }

    fn render(&self, exclude: &[Layer]) -> RgbaImage {
        let mut page = self.background.clone();
        if !exclude.contains(&Layer::RenderSurface) {
            blend_at(&mut page, &self.surface, self.surface_bounds, self.surface_opacity);
        }
        if !exclude.contains(&Layer::Composite)
            && let Some((img, at)) = &self.composite
        {
            blend_at(&mut page, img, *at, 1.0);
        }
        if self.selection_visible
            && let Some(rect) = self.selection_outline
        {
            stroke(&mut page, rect, OUTLINE);
        }
        if self.overlay_visible
            && !exclude.contains(&Layer::DragOverlay)
            && let Some(rect) = self.drag_overlay
        {
            let (w, h) = (rect.width.max(0.0) as u32, rect.height.max(0.0) as u32);
            let shade = RgbaImage::from_pixel(w, h, OVERLAY);
            imageops::overlay(&mut page, &shade, rect.x as i64, rect.y as i64);
        }
        page
    }
}

fn blend_at(page: &mut RgbaImage, layer: &RgbaImage, at: Rectangle, opacity: f32) {
    let alpha = opacity.clamp(0.0, 1.0);
    if alpha >= 1.0 {
        imageops::replace(page, layer, at.x as i64, at.y as i64);
        return;
    }
    let mut faded = layer.clone();
    for px in faded.pixels_mut() {
        px.0[3] = (f32::from(px.0[3]) * alpha).round() as u8;
    }
    imageops::overlay(page, &faded, at.x as i64, at.y as i64);
}

fn stroke(page: &mut RgbaImage, rect: Rectangle, color: Rgba<u8>) {
    let (pw, ph) = page.dimensions();
    let x0 = rect.x.max(0.0) as u32;
    let y0 = rect.y.max(0.0) as u32;
    let x1 = (rect.right().max(0.0) as u32).min(pw.saturating_sub(1));
    let y1 = (rect.bottom().max(0.0) as u32).min(ph.saturating_sub(1));
    if x0 > x1 || y0 > y1 {
        return;
    }
    for x in x0..=x1 {
        page.put_pixel(x, y0, color);
        page.put_pixel(x, y1, color);
    }
    for y in y0..=y1 {
        page.put_pixel(x0, y, color);
        page.put_pixel(x1, y, color);
    }
}

impl CaptureHost for SoftwarePage {
    fn surface_bounds(&self) -> Rectangle {
        self.surface_bounds
    }

    fn set_layer_visible(&mut self, layer: Layer, visible: bool) {
        match layer {
            Layer::DragOverlay => self.overlay_visible = visible,
            Layer::Composite if !visible => self.composite = None,
            Layer::Composite | Layer::RenderSurface => {}
        }
    }

    fn set_selection_styling(&mut self, visible: bool) {
        self.selection_visible = visible;
    }

    fn set_surface_opacity(&mut self, opacity: f32) -> f32 {
        std::mem::replace(&mut self.surface_opacity, opacity)
    }

    fn rasterize_page(
        &mut self,
        region: Rectangle,
        exclude: &[Layer],
    ) -> Result<RgbaImage, CaptureError> {
        self.next_pass()?;
        let Some(clip) = region.intersect(&self.page_bounds()) else {
            return Err(CaptureError::Raster("region lies outside the page".into()));
        };
        let page = self.render(exclude);
        let view = imageops::crop_imm(
            &page,
            clip.x as u32,
            clip.y as u32,
            clip.width.round() as u32,
            clip.height.round() as u32,
        );
        Ok(view.to_image())
    }

    fn rasterize_surface(&mut self) -> Result<RgbaImage, CaptureError> {
        self.next_pass()?;
        Ok(self.surface.clone())
    }

    fn place_composite(&mut self, image: RgbaImage, at: Rectangle) {
        self.composite = Some((image, at));
    }

    fn remove_composite(&mut self) {
        self.composite = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaptureOutcome, PointerButton, RegionCapture};
    use core_types::Point;
    use core_types::blob::BlobRegistry;
    use std::time::{Duration, Instant};

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

    // 800x600 red design with a green render surface covering its left half.
    fn page() -> SoftwarePage {
        let background = RgbaImage::from_pixel(800, 600, RED);
        let surface = RgbaImage::from_pixel(400, 600, GREEN);
        let mut page =
            SoftwarePage::new(background, surface, Rectangle::new(0.0, 0.0, 400.0, 600.0));
        page.set_surface_opacity(0.5);
        page
    }

    fn decode(bytes: &[u8]) -> RgbaImage {
        image::load_from_memory(bytes).unwrap().to_rgba8()
    }

    #[test]
    fn drag_commit_produces_reference_and_current_rasters() {
        let t0 = Instant::now();
        let mut host = page();
        let mut blobs = BlobRegistry::new();
        let mut capture = RegionCapture::default();
        let bounds = host.page_bounds();

        assert!(capture.pointer_down(Point::new(100.0, 100.0), PointerButton::Primary, bounds, t0));
        let overlay = capture.pointer_move(Point::new(300.0, 260.0));
        host.set_drag_overlay(overlay);

        let outcome = capture
            .release(
                Point::new(300.0, 260.0),
                t0 + Duration::from_millis(1200),
                &mut host,
                &mut blobs,
            )
            .unwrap();
        let Some(CaptureOutcome::Committed(region)) = outcome else {
            panic!("expected a committed capture, got {outcome:?}");
        };
        assert_eq!(region.rect, Rectangle::new(100.0, 100.0, 200.0, 160.0));
        assert_eq!((region.width(), region.height()), (200.0, 160.0));
        assert_eq!(region.reference_region.blob.mime, "image/png");
        assert_eq!(blobs.live_count(), 2);

        let reference = decode(&region.reference_region.blob.bytes);
        let current = decode(&region.current_region.blob.bytes);
        assert_eq!(reference.dimensions(), (200, 160));
        assert_eq!(current.dimensions(), (200, 160));
        // Reference sees the design through the surface; current sees the
        // fully opaque surface and no drag shading.
        assert_eq!(*reference.get_pixel(50, 50), RED);
        assert_eq!(*current.get_pixel(50, 50), GREEN);

        assert!(capture.is_idle());
        assert!(host.overlay_visible());
        assert!(host.selection_visible());
        assert!(!host.has_composite());
        assert_eq!(host.surface_opacity(), 0.5);

        region.release(&mut blobs);
        assert_eq!(blobs.live_count(), 0);
    }

    #[test]
    fn raster_failure_restores_host_and_stays_retryable() {
        for failing_pass in 0..3 {
            let t0 = Instant::now();
            let mut host = page();
            host.fail_on_pass(failing_pass);
            let mut blobs = BlobRegistry::new();
            let mut capture = RegionCapture::default();
            let bounds = host.page_bounds();
            capture.pointer_down(Point::new(100.0, 100.0), PointerButton::Primary, bounds, t0);

            let result = capture.release(
                Point::new(300.0, 260.0),
                t0 + Duration::from_millis(1500),
                &mut host,
                &mut blobs,
            );
            assert!(matches!(result, Err(CaptureError::Raster(_))), "pass {failing_pass}");
            assert!(capture.is_idle());
            assert!(host.overlay_visible());
            assert!(host.selection_visible());
            assert!(!host.has_composite());
            assert_eq!(host.surface_opacity(), 0.5);
            assert_eq!(blobs.live_count(), 0);
        }
    }

    #[test]
    fn too_small_release_emits_nothing() {
        let t0 = Instant::now();
        let mut host = page();
        let mut blobs = BlobRegistry::new();
        let mut capture = RegionCapture::default();
        let bounds = host.page_bounds();
        capture.pointer_down(Point::new(100.0, 100.0), PointerButton::Primary, bounds, t0);
        let outcome = capture
            .release(
                Point::new(105.0, 105.0),
                t0 + Duration::from_millis(2000),
                &mut host,
                &mut blobs,
            )
            .unwrap();
        assert!(matches!(outcome, Some(CaptureOutcome::Cancelled(_))));
        assert!(capture.is_idle());
        assert_eq!(blobs.live_count(), 0);
    }

    #[test]
    fn reference_bytes_round_trip_into_background() {
        let mut png = Vec::new();
        RgbaImage::from_pixel(4, 4, RED)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let bounds = Rectangle::new(0.0, 0.0, 1.0, 1.0);
        let page = SoftwarePage::from_reference_bytes(&png, RgbaImage::new(1, 1), bounds).unwrap();
        assert_eq!(page.page_bounds(), Rectangle::new(0.0, 0.0, 4.0, 4.0));
    }
}
