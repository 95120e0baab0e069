use super::{FaceDetection, NativeDetectorProbe, NativeFaceDetector};
use crate::constants::{CASCADE_MIN_FACE_SIZE, CASCADE_MIN_NEIGHBORS, CASCADE_SCALE_FACTOR, NATIVE_CASCADE_FILE};
use crate::normalizer::BoundingBox;
use crate::{Error, Result};
use log::{debug, info};
use opencv::core::{Mat, Rect, Size, Vector};
use opencv::imgproc;
use opencv::objdetect::{self, CascadeClassifier};
use opencv::prelude::*;
use std::path::PathBuf;

/// Finds and loads the frontal-face cascade bundled with `OpenCV`
#[derive(Debug, Clone, Default)]
pub struct CascadeProbe {
    cascade_path: Option<PathBuf>,
}

impl CascadeProbe {
    /// Use an explicit cascade file, or search the `OpenCV` data directories when `None`
    #[must_use]
    pub fn new(cascade_path: Option<PathBuf>) -> Self {
        Self { cascade_path }
    }

    fn locate(&self) -> Result<String> {
        if let Some(path) = &self.cascade_path {
            if !path.exists() {
                return Err(Error::DetectorError(format!("Cascade file not found: {}", path.display())));
            }
            return Ok(path.to_string_lossy().into_owned());
        }

        let found = opencv::core::find_file(NATIVE_CASCADE_FILE, false, true)?;
        if found.is_empty() {
            return Err(Error::DetectorError(format!(
                "{NATIVE_CASCADE_FILE} not found in the OpenCV data directories"
            )));
        }
        Ok(found)
    }
}

impl NativeDetectorProbe for CascadeProbe {
    fn construct(&self, fast_mode: bool) -> Result<Box<dyn NativeFaceDetector>> {
        let path = self.locate()?;
        let classifier = CascadeClassifier::new(&path)?;
        if classifier.empty()? {
            return Err(Error::DetectorError(format!("Cascade at {path} is empty or invalid")));
        }
        info!("Loaded face cascade from {} (fast mode: {})", path, fast_mode);
        Ok(Box::new(CascadeDetector {
            classifier,
            flags: search_flags(fast_mode),
        }))
    }
}

/// Fast mode stops at the biggest face and skips fine-grained scales
fn search_flags(fast_mode: bool) -> i32 {
    if fast_mode {
        objdetect::CASCADE_FIND_BIGGEST_OBJECT | objdetect::CASCADE_DO_ROUGH_SEARCH
    } else {
        0
    }
}

/// Haar cascade face detector
pub struct CascadeDetector {
    classifier: CascadeClassifier,
    flags: i32,
}

impl NativeFaceDetector for CascadeDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<FaceDetection>> {
        let mut gray = Mat::default();
        imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
        let mut equalized = Mat::default();
        imgproc::equalize_hist(&gray, &mut equalized)?;

        let mut faces: Vector<Rect> = Vector::new();
        self.classifier.detect_multi_scale(
            &equalized,
            &mut faces,
            CASCADE_SCALE_FACTOR,
            CASCADE_MIN_NEIGHBORS,
            self.flags,
            Size::new(CASCADE_MIN_FACE_SIZE, CASCADE_MIN_FACE_SIZE),
            Size::default(),
        )?;

        // Biggest face first; the cascade has no confidence score
        let mut detections: Vec<FaceDetection> = faces
            .iter()
            .map(|rect| FaceDetection {
                bbox: BoundingBox::from(rect),
                score: 1.0,
            })
            .collect();
        detections.sort_by(|a, b| b.bbox.area().total_cmp(&a.bbox.area()));

        debug!("Cascade found {} face(s)", detections.len());
        Ok(detections)
    }
}
