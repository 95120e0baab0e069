//! Conversion from detected face boxes to a normalized viewer position.
//!
//! The camera looks back at the viewer, so the horizontal axis is inverted:
//! a viewer stepping to their own right moves the virtual window as if they
//! were looking around it from that side.

use opencv::core::Rect;

/// Face bounding box in source-frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    /// Width, positive for well-formed boxes
    pub width: f64,
    /// Height, positive for well-formed boxes
    pub height: f64,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Box centroid
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Whether width and height are positive and every field is finite
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        [self.x, self.y, self.width, self.height].iter().all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

impl From<Rect> for BoundingBox {
    fn from(rect: Rect) -> Self {
        Self::new(
            f64::from(rect.x),
            f64::from(rect.y),
            f64::from(rect.width),
            f64::from(rect.height),
        )
    }
}

impl From<BoundingBox> for Rect {
    #[allow(clippy::cast_possible_truncation)] // Pixel coordinates fit comfortably in i32
    fn from(bbox: BoundingBox) -> Self {
        Rect::new(
            bbox.x.round() as i32,
            bbox.y.round() as i32,
            bbox.width.round() as i32,
            bbox.height.round() as i32,
        )
    }
}

/// Dimensions of the frames the detector sees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: i32,
    pub height: i32,
}

impl FrameSize {
    #[must_use]
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Viewer head offset from frame center, both axes in [-1, 1].
///
/// Positive `x` is the viewer's own right; positive `y` is below center.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeadPosition {
    pub x: f64,
    pub y: f64,
}

impl HeadPosition {
    /// Dead center
    pub const CENTER: Self = Self { x: 0.0, y: 0.0 };

    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Map a face box to a normalized head position.
///
/// The centroid is scaled into [-1, 1] on both axes, the horizontal axis is
/// inverted, and the result is clamped. Non-finite coordinates collapse to
/// center so a malformed box can never push the scene off-screen.
#[must_use]
pub fn normalize(bbox: &BoundingBox, frame: FrameSize) -> HeadPosition {
    if frame.is_empty() {
        return HeadPosition::CENTER;
    }

    let (cx, cy) = bbox.center();
    let normalized_x = (cx / f64::from(frame.width) - 0.5) * 2.0;
    let normalized_y = (cy / f64::from(frame.height) - 0.5) * 2.0;

    HeadPosition {
        x: clamp_unit(-normalized_x),
        y: clamp_unit(normalized_y),
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
