use ratatui::style::Color;

use crate::coords::{Point, Size, Viewport};
use crate::{BoundingBox, Damage, MIN_BOX_SIZE, Severity};

/// Default zoom change per wheel notch.
pub const DEFAULT_ZOOM_STEP: f64 = 0.1;

/// Pointer interpretation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanvasMode {
    /// Click selects damages, drag pans.
    Select,
    /// Press-drag-release defines a new box.
    Draw,
}

/// Event emitted by a completed pointer gesture.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasEvent {
    /// A damage box was clicked (id of the damage).
    DamageSelected(String),
    /// A new box was drawn, in image space.
    DrawComplete(BoundingBox),
}

/// Stroke weight of an overlay outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stroke {
    Normal,
    Thick,
}

/// A damage box ready to be painted, in screen space.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageOverlay {
    pub damage_id: String,
    pub rect: BoundingBox,
    pub color: Color,
    pub stroke: Stroke,
    /// Severity digit drawn at the top-left corner.
    pub badge: String,
}

/// Zoom/pan state and pointer gesture handling for one image.
///
/// The canvas never touches the store: it only turns pointer input into
/// [`CanvasEvent`]s and screen-space overlays.
#[derive(Debug, Clone)]
pub struct AnnotationCanvas {
    viewport: Viewport,
    mode: CanvasMode,
    is_panning: bool,
    pan_anchor: Point,
    draw_anchor: Option<Point>,
    live_box: Option<BoundingBox>,
    min_box_size: f64,
    zoom_step: f64,
}

impl AnnotationCanvas {
    pub fn new(min_box_size: f64, zoom_step: f64) -> Self {
        Self {
            viewport: Viewport::identity(),
            mode: CanvasMode::Select,
            is_panning: false,
            pan_anchor: Point::default(),
            draw_anchor: None,
            live_box: None,
            min_box_size,
            zoom_step,
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scale(&self) -> f64 {
        self.viewport.scale
    }

    pub fn offset(&self) -> Point {
        self.viewport.offset
    }

    pub fn mode(&self) -> CanvasMode {
        self.mode
    }

    pub fn is_panning(&self) -> bool {
        self.is_panning
    }

    /// Box currently being dragged, in image space.
    pub fn live_box(&self) -> Option<BoundingBox> {
        self.live_box
    }

    /// Reset zoom and pan so the whole image is visible.
    pub fn fit(&mut self, image: Size, container: Size) {
        self.viewport = Viewport::fit_to_container(image, container);
    }

    /// Switch pointer mode, abandoning any gesture in progress.
    pub fn set_mode(&mut self, mode: CanvasMode) {
        self.mode = mode;
        self.cancel_gesture();
    }

    pub fn toggle_draw_mode(&mut self) {
        let mode = match self.mode {
            CanvasMode::Select => CanvasMode::Draw,
            CanvasMode::Draw => CanvasMode::Select,
        };
        self.set_mode(mode);
    }

    pub fn cancel_gesture(&mut self) {
        self.is_panning = false;
        self.draw_anchor = None;
        self.live_box = None;
    }

    /// First damage (in render order) whose screen rectangle contains `screen`.
    pub fn hit_test<'a>(&self, screen: Point, damages: &'a [Damage]) -> Option<&'a Damage> {
        damages
            .iter()
            .find(|d| self.viewport.box_to_screen(&d.bounding_box).contains(screen))
    }

    pub fn on_pointer_down(&mut self, screen: Point, damages: &[Damage]) -> Option<CanvasEvent> {
        match self.mode {
            CanvasMode::Draw => {
                let anchor = self.viewport.to_image(screen);
                self.draw_anchor = Some(anchor);
                self.live_box = Some(BoundingBox::new(anchor.x, anchor.y, 0.0, 0.0));
                None
            }
            CanvasMode::Select => {
                if let Some(damage) = self.hit_test(screen, damages) {
                    return Some(CanvasEvent::DamageSelected(damage.id.clone()));
                }
                self.is_panning = true;
                self.pan_anchor = screen.sub(self.viewport.offset);
                None
            }
        }
    }

    pub fn on_pointer_move(&mut self, screen: Point) {
        if let Some(anchor) = self.draw_anchor {
            if self.mode == CanvasMode::Draw {
                let current = self.viewport.to_image(screen);
                self.live_box = Some(BoundingBox::from_corners(anchor, current));
            }
        } else if self.is_panning {
            self.viewport = self.viewport.panned_to(screen.sub(self.pan_anchor));
        }
    }

    /// Finish the gesture. Boxes below the minimum size are discarded silently.
    pub fn on_pointer_up(&mut self) -> Option<CanvasEvent> {
        let live_box = self.live_box.take();
        self.draw_anchor = None;
        self.is_panning = false;
        live_box
            .and_then(|b| b.validated(self.min_box_size).ok())
            .map(CanvasEvent::DrawComplete)
    }

    /// Wheel zoom: negative `delta_y` (scroll up) zooms in.
    pub fn on_wheel(&mut self, delta_y: f64) {
        if delta_y == 0.0 {
            return;
        }
        let step = if delta_y < 0.0 {
            self.zoom_step
        } else {
            -self.zoom_step
        };
        self.viewport = self.viewport.zoomed_by(step);
    }

    /// Screen rectangle covered by the whole image.
    pub fn image_frame(&self, image: Size) -> BoundingBox {
        self.viewport
            .box_to_screen(&BoundingBox::new(0.0, 0.0, image.width, image.height))
    }

    /// Overlays for `damages`, in render order.
    pub fn overlays(&self, damages: &[Damage], selected: Option<&str>) -> Vec<DamageOverlay> {
        damages
            .iter()
            .map(|d| DamageOverlay {
                damage_id: d.id.clone(),
                rect: self.viewport.box_to_screen(&d.bounding_box),
                color: severity_color(d.severity),
                stroke: if selected == Some(d.id.as_str()) {
                    Stroke::Thick
                } else {
                    Stroke::Normal
                },
                badge: d.severity.to_string(),
            })
            .collect()
    }

    /// Live (dashed) box in screen space.
    pub fn live_overlay(&self) -> Option<BoundingBox> {
        self.live_box.map(|b| self.viewport.box_to_screen(&b))
    }
}

impl Default for AnnotationCanvas {
    fn default() -> Self {
        Self::new(MIN_BOX_SIZE, DEFAULT_ZOOM_STEP)
    }
}

/// Overlay color for a severity, from gray (none) to red (severe).
pub fn severity_color(severity: Severity) -> Color {
    match severity.value() {
        0 => Color::Gray,
        1 => Color::Green,
        2 => Color::LightGreen,
        3 => Color::Yellow,
        4 => Color::LightRed,
        _ => Color::Red,
    }
}
