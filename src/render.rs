//! Parallax scene drawing for the debug view.
//!
//! The scene is a stack of nested frames; nearer layers shift further
//! against the head position, which is what produces the window illusion.

use crate::config::SceneKind;
use crate::detection_loop::FaceOverlay;
use crate::normalizer::{BoundingBox, FrameSize, HeadPosition};
use crate::Result;
use opencv::{
    core::{Mat, Point, Rect, Scalar, CV_8UC3},
    imgproc::{self, FONT_HERSHEY_SIMPLEX, LINE_8},
    prelude::*,
};

/// Number of depth layers drawn per scene
pub const LAYER_COUNT: usize = 6;

/// Largest horizontal shift of the nearest layer, as a fraction of canvas width
const MAX_SHIFT_RATIO: f64 = 0.12;

/// Size of the camera inset in the bottom-right corner
const INSET_WIDTH: i32 = 160;
const INSET_HEIGHT: i32 = 120;

/// Layer rectangles from far to near for `position` on a canvas of `canvas` size
#[must_use]
pub fn layer_rects(position: HeadPosition, canvas: FrameSize, layers: usize) -> Vec<Rect> {
    if canvas.is_empty() || layers == 0 {
        return Vec::new();
    }

    let width = f64::from(canvas.width);
    let height = f64::from(canvas.height);
    let max_dx = width * MAX_SHIFT_RATIO;
    let max_dy = height * MAX_SHIFT_RATIO;

    (0..layers)
        .map(|i| {
            // depth runs from near 0 (far) to 1 (near)
            let depth = (i + 1) as f64 / layers as f64;
            let inset = 1.0 - 0.8 * (1.0 - depth);
            let w = width * 0.5 * inset;
            let h = height * 0.5 * inset;
            let cx = width / 2.0 - position.x * max_dx * depth;
            let cy = height / 2.0 - position.y * max_dy * depth;
            Rect::new(
                (cx - w / 2.0).round() as i32,
                (cy - h / 2.0).round() as i32,
                w.round() as i32,
                h.round() as i32,
            )
        })
        .collect()
}

/// Background and far/near layer colours (BGR)
#[must_use]
pub fn palette(scene: SceneKind) -> (Scalar, Scalar, Scalar) {
    match scene {
        SceneKind::Default => (
            Scalar::new(30.0, 30.0, 30.0, 0.0),
            Scalar::new(90.0, 90.0, 90.0, 0.0),
            Scalar::new(240.0, 240.0, 240.0, 0.0),
        ),
        SceneKind::Mirror => (
            Scalar::new(60.0, 50.0, 40.0, 0.0),
            Scalar::new(140.0, 120.0, 100.0, 0.0),
            Scalar::new(255.0, 230.0, 200.0, 0.0),
        ),
        SceneKind::Matrix => (
            Scalar::new(0.0, 10.0, 0.0, 0.0),
            Scalar::new(0.0, 80.0, 0.0, 0.0),
            Scalar::new(80.0, 255.0, 80.0, 0.0),
        ),
        SceneKind::Space => (
            Scalar::new(20.0, 0.0, 0.0, 0.0),
            Scalar::new(120.0, 40.0, 40.0, 0.0),
            Scalar::new(255.0, 200.0, 180.0, 0.0),
        ),
        SceneKind::Pond => (
            Scalar::new(60.0, 40.0, 10.0, 0.0),
            Scalar::new(150.0, 120.0, 30.0, 0.0),
            Scalar::new(220.0, 240.0, 160.0, 0.0),
        ),
    }
}

fn blend(far: Scalar, near: Scalar, t: f64) -> Scalar {
    Scalar::new(
        far[0] + (near[0] - far[0]) * t,
        far[1] + (near[1] - far[1]) * t,
        far[2] + (near[2] - far[2]) * t,
        0.0,
    )
}

/// What one frame of the debug view shows
#[derive(Debug, Clone)]
pub struct SceneFrame<'a> {
    pub scene: SceneKind,
    pub position: HeadPosition,
    pub overlay: Option<FaceOverlay>,
    pub status: &'a str,
}

/// Draw `frame` onto a new canvas of `canvas` size
pub fn draw_scene(frame: &SceneFrame<'_>, canvas: FrameSize) -> Result<Mat> {
    let (background, far, near) = palette(frame.scene);
    let mut image = Mat::new_rows_cols_with_default(canvas.height, canvas.width, CV_8UC3, background)?;

    let rects = layer_rects(frame.position, canvas, LAYER_COUNT);
    let last = rects.len().saturating_sub(1).max(1) as f64;
    for (i, rect) in rects.iter().enumerate() {
        let color = blend(far, near, i as f64 / last);
        imgproc::rectangle(&mut image, *rect, color, 2, LINE_8, 0)?;
    }

    if let Some(overlay) = frame.overlay {
        draw_overlay_inset(&mut image, overlay, canvas)?;
    }

    imgproc::put_text(
        &mut image,
        &format!("{}  x: {:+.2} y: {:+.2}", frame.scene.as_str(), frame.position.x, frame.position.y),
        Point::new(10, 30),
        FONT_HERSHEY_SIMPLEX,
        0.7,
        near,
        2,
        LINE_8,
        false,
    )?;

    if !frame.status.is_empty() {
        imgproc::put_text(
            &mut image,
            frame.status,
            Point::new(10, canvas.height - 20),
            FONT_HERSHEY_SIMPLEX,
            0.6,
            Scalar::new(0.0, 200.0, 255.0, 0.0),
            1,
            LINE_8,
            false,
        )?;
    }

    Ok(image)
}

/// Face box scaled from its source frame into `inset`
fn inset_face_rect(overlay: FaceOverlay, inset: Rect) -> Option<Rect> {
    if overlay.frame.is_empty() {
        return None;
    }
    let sx = f64::from(inset.width) / f64::from(overlay.frame.width);
    let sy = f64::from(inset.height) / f64::from(overlay.frame.height);
    let bbox = overlay.bbox;
    let scaled = BoundingBox::new(
        f64::from(inset.x) + bbox.x * sx,
        f64::from(inset.y) + bbox.y * sy,
        bbox.width * sx,
        bbox.height * sy,
    );
    Some(Rect::from(scaled))
}

/// Scaled face box inside a small camera-shaped inset
fn draw_overlay_inset(image: &mut Mat, overlay: FaceOverlay, canvas: FrameSize) -> Result<()> {
    let inset = Rect::new(
        canvas.width - INSET_WIDTH - 10,
        canvas.height - INSET_HEIGHT - 10,
        INSET_WIDTH,
        INSET_HEIGHT,
    );
    let Some(face) = inset_face_rect(overlay, inset) else {
        return Ok(());
    };

    imgproc::rectangle(image, inset, Scalar::new(200.0, 200.0, 200.0, 0.0), 1, LINE_8, 0)?;
    imgproc::rectangle(image, face, Scalar::new(0.0, 255.0, 0.0, 0.0), 2, LINE_8, 0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANVAS: FrameSize = FrameSize::new(800, 600);

    #[test]
    fn test_centered_layers_are_concentric() {
        let rects = layer_rects(HeadPosition::CENTER, CANVAS, LAYER_COUNT);
        assert_eq!(rects.len(), LAYER_COUNT);
        for rect in &rects {
            let cx = rect.x + rect.width / 2;
            assert!((cx - 400).abs() <= 1, "rect {:?} off center", rect);
        }
        // Nearer layers are larger
        assert!(rects[LAYER_COUNT - 1].width > rects[0].width);
    }

    #[test]
    fn test_near_layers_shift_further() {
        let rects = layer_rects(HeadPosition::new(1.0, 0.0), CANVAS, LAYER_COUNT);
        let centered = layer_rects(HeadPosition::CENTER, CANVAS, LAYER_COUNT);
        let far_shift = (rects[0].x - centered[0].x).abs();
        let near_shift = (rects[LAYER_COUNT - 1].x - centered[LAYER_COUNT - 1].x).abs();
        assert!(near_shift > far_shift);
        // Head to the right moves the scene left
        assert!(rects[LAYER_COUNT - 1].x < centered[LAYER_COUNT - 1].x);
    }

    #[test]
    fn test_inset_scales_by_detected_frame_size() {
        let inset = Rect::new(630, 470, INSET_WIDTH, INSET_HEIGHT);
        let bbox = BoundingBox::new(0.0, 200.0, 80.0, 80.0);

        let vga = FaceOverlay {
            bbox,
            frame: FrameSize::new(640, 480),
        };
        assert_eq!(inset_face_rect(vga, inset), Some(Rect::new(630, 520, 20, 20)));

        // A camera that delivered 1280x720 instead of the requested size
        let hd = FaceOverlay {
            bbox,
            frame: FrameSize::new(1280, 720),
        };
        assert_eq!(inset_face_rect(hd, inset), Some(Rect::new(630, 503, 10, 13)));

        let empty = FaceOverlay {
            bbox,
            frame: FrameSize::new(0, 0),
        };
        assert_eq!(inset_face_rect(empty, inset), None);
    }

    #[test]
    fn test_empty_canvas_draws_nothing() {
        assert!(layer_rects(HeadPosition::CENTER, FrameSize::new(0, 0), LAYER_COUNT).is_empty());
        assert!(layer_rects(HeadPosition::CENTER, CANVAS, 0).is_empty());
    }
}
