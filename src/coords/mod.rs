use crate::BoundingBox;

/// Lower bound of the interactive zoom range.
pub const MIN_SCALE: f64 = 0.1;
/// Upper bound of the interactive zoom range.
pub const MAX_SCALE: f64 = 5.0;

/// A 2D point (screen or image space, depending on context).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Scale and pan applied to an image on screen.
///
/// The image's top-left corner sits at `offset` (screen pixels) and every
/// image pixel covers `scale` screen pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scale: f64,
    pub offset: Point,
}

impl Viewport {
    pub fn new(scale: f64, offset: Point) -> Self {
        Self { scale, offset }
    }

    pub fn identity() -> Self {
        Self::new(1.0, Point::default())
    }

    /// Map a screen point into image space.
    pub fn to_image(&self, screen: Point) -> Point {
        Point::new(
            (screen.x - self.offset.x) / self.scale,
            (screen.y - self.offset.y) / self.scale,
        )
    }

    /// Map an image point onto the screen.
    pub fn to_screen(&self, image: Point) -> Point {
        Point::new(
            image.x * self.scale + self.offset.x,
            image.y * self.scale + self.offset.y,
        )
    }

    /// Screen-space rectangle covered by an image-space box.
    pub fn box_to_screen(&self, bbox: &BoundingBox) -> BoundingBox {
        let origin = self.to_screen(Point::new(bbox.x, bbox.y));
        BoundingBox::new(
            origin.x,
            origin.y,
            bbox.width * self.scale,
            bbox.height * self.scale,
        )
    }

    /// Largest viewport (never above 1:1) showing the whole image, centered.
    ///
    /// The result is not clamped to [`MIN_SCALE`]: very large images may fit
    /// below the interactive zoom range.
    pub fn fit_to_container(image: Size, container: Size) -> Viewport {
        if image.is_empty() || container.is_empty() {
            return Viewport::identity();
        }
        let scale = (container.width / image.width)
            .min(container.height / image.height)
            .min(1.0);
        let offset = Point::new(
            (container.width - image.width * scale) / 2.0,
            (container.height - image.height * scale) / 2.0,
        );
        Viewport::new(scale, offset)
    }

    /// Same pan, scale moved by `delta` and clamped to the zoom range.
    ///
    /// Zoom is anchored at the current pan, not at the cursor.
    pub fn zoomed_by(&self, delta: f64) -> Viewport {
        Viewport::new(clamp_scale(self.scale + delta), self.offset)
    }

    pub fn panned_to(&self, offset: Point) -> Viewport {
        Viewport::new(self.scale, offset)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::identity()
    }
}

pub fn clamp_scale(scale: f64) -> f64 {
    scale.clamp(MIN_SCALE, MAX_SCALE)
}
