//! Face detection backends behind a single `detect` contract.
//!
//! Two variants exist: the native detector that ships with the platform's
//! `OpenCV` install, and an ONNX fallback whose weights are loaded from a
//! configured source. [`BackendResolver`] picks one, once, in that order.
//!
//! Detectors are blocking. [`DetectionBackend::detect_blocking`] moves a
//! backend onto tokio's blocking pool so inference never stalls the
//! runtime thread that paces smoothing and rendering.

/// Haar cascade detector provided by the `OpenCV` install
pub mod native;

/// SCRFD ONNX detector with downloadable weights
pub mod fallback;

use crate::error::TrackingFailure;
use crate::normalizer::BoundingBox;
use crate::Result;
use async_trait::async_trait;
use log::{error, info, warn};
use opencv::core::Mat;

/// A single detected face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceDetection {
    /// Bounding box of the detected face
    pub bbox: BoundingBox,
    /// Detector confidence, 1.0 when the detector does not score
    pub score: f32,
}

/// Result of one detection cycle. Finding no face is not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionOutcome {
    NoFace,
    Face(BoundingBox),
}

/// Which detector variant a session ended up with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackerImplementation {
    #[default]
    Unresolved,
    Native,
    Fallback,
    Unavailable,
}

/// Platform-provided detector returning every face it finds
pub trait NativeFaceDetector: Send {
    /// # Errors
    ///
    /// Returns an error if the frame cannot be processed
    fn detect(&mut self, frame: &Mat) -> Result<Vec<FaceDetection>>;
}

/// Library detector returning at most one face
pub trait FallbackFaceDetector: Send {
    /// # Errors
    ///
    /// Returns an error if inference fails
    fn detect_single(&mut self, frame: &Mat) -> Result<Option<FaceDetection>>;
}

/// Checks whether a native detector exists and builds it
pub trait NativeDetectorProbe: Send + Sync {
    /// Construct the detector, configured for low latency when `fast_mode` is set
    ///
    /// # Errors
    ///
    /// Returns an error if the platform detector is missing or unusable
    fn construct(&self, fast_mode: bool) -> Result<Box<dyn NativeFaceDetector>>;
}

/// Loads the fallback detector's model weights from its configured source
#[async_trait]
pub trait FallbackLoader: Send + Sync {
    async fn load(&self) -> Result<Box<dyn FallbackFaceDetector>>;
}

/// The resolved detector
pub enum DetectionBackend {
    Native(Box<dyn NativeFaceDetector>),
    Fallback(Box<dyn FallbackFaceDetector>),
}

impl DetectionBackend {
    #[must_use]
    pub fn implementation(&self) -> TrackerImplementation {
        match self {
            Self::Native(_) => TrackerImplementation::Native,
            Self::Fallback(_) => TrackerImplementation::Fallback,
        }
    }

    /// Locate at most one face in `frame`.
    ///
    /// Detector errors are logged and reported as [`DetectionOutcome::NoFace`]
    /// so that a single bad frame never stops tracking.
    pub fn detect(&mut self, frame: &Mat) -> DetectionOutcome {
        let result = match self {
            Self::Native(detector) => detector.detect(frame).map(|faces| faces.into_iter().next()),
            Self::Fallback(detector) => detector.detect_single(frame),
        };

        match result {
            Ok(Some(face)) if face.bbox.is_well_formed() => DetectionOutcome::Face(face.bbox),
            Ok(Some(face)) => {
                warn!("Discarding malformed face box {:?}", face.bbox);
                DetectionOutcome::NoFace
            }
            Ok(None) => DetectionOutcome::NoFace,
            Err(e) => {
                warn!("Face detection error: {}", e);
                DetectionOutcome::NoFace
            }
        }
    }

    /// Run [`Self::detect`] on the blocking pool and hand the backend back.
    ///
    /// Returns `None` if the detector panicked; the backend is lost with it.
    pub async fn detect_blocking(mut self, frame: Mat) -> Option<(Self, DetectionOutcome)> {
        let job = tokio::task::spawn_blocking(move || {
            let outcome = self.detect(&frame);
            (self, outcome)
        });
        match job.await {
            Ok(done) => Some(done),
            Err(e) => {
                error!("Face detector crashed: {}", e);
                None
            }
        }
    }
}

impl std::fmt::Debug for DetectionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DetectionBackend::{:?}", self.implementation())
    }
}

/// Ordered probe-and-fallback selection of a [`DetectionBackend`]
#[derive(Default)]
pub struct BackendResolver {
    native: Option<Box<dyn NativeDetectorProbe>>,
    fallback: Option<Box<dyn FallbackLoader>>,
}

impl BackendResolver {
    #[must_use]
    pub fn new(
        native: Option<Box<dyn NativeDetectorProbe>>,
        fallback: Option<Box<dyn FallbackLoader>>,
    ) -> Self {
        Self { native, fallback }
    }

    /// Pick the first working detector: native in fast mode, then fallback.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingFailure::BackendUnavailable`] naming why each variant failed
    pub async fn resolve(&self) -> std::result::Result<DetectionBackend, TrackingFailure> {
        let native_reason = match &self.native {
            Some(probe) => match probe.construct(true) {
                Ok(detector) => {
                    info!("Using native face detector");
                    return Ok(DetectionBackend::Native(detector));
                }
                Err(e) => {
                    warn!("Native face detector failed to initialize, trying fallback: {}", e);
                    e.to_string()
                }
            },
            None => "not available".to_string(),
        };

        let fallback_reason = match &self.fallback {
            Some(loader) => match loader.load().await {
                Ok(detector) => {
                    info!("Using fallback face detector");
                    return Ok(DetectionBackend::Fallback(detector));
                }
                Err(e) => {
                    warn!("Fallback face detector failed to load: {}", e);
                    e.to_string()
                }
            },
            None => "not available".to_string(),
        };

        Err(TrackingFailure::BackendUnavailable {
            native: native_reason,
            fallback: fallback_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct FixedNative(Vec<FaceDetection>);

    impl NativeFaceDetector for FixedNative {
        fn detect(&mut self, _frame: &Mat) -> Result<Vec<FaceDetection>> {
            Ok(self.0.clone())
        }
    }

    struct FailingFallback;

    impl FallbackFaceDetector for FailingFallback {
        fn detect_single(&mut self, _frame: &Mat) -> Result<Option<FaceDetection>> {
            Err(Error::ModelError("corrupt frame".to_string()))
        }
    }

    fn face(x: f64, score: f32) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox::new(x, 10.0, 50.0, 50.0),
            score,
        }
    }

    struct PanickingNative;

    impl NativeFaceDetector for PanickingNative {
        fn detect(&mut self, _frame: &Mat) -> Result<Vec<FaceDetection>> {
            panic!("detector state corrupted");
        }
    }

    #[test]
    fn test_native_multi_face_truncated_to_first() {
        let mut backend = DetectionBackend::Native(Box::new(FixedNative(vec![face(1.0, 0.9), face(2.0, 0.8)])));
        assert_eq!(
            backend.detect(&Mat::default()),
            DetectionOutcome::Face(BoundingBox::new(1.0, 10.0, 50.0, 50.0))
        );
    }

    #[test]
    fn test_empty_result_is_no_face() {
        let mut backend = DetectionBackend::Native(Box::new(FixedNative(Vec::new())));
        assert_eq!(backend.detect(&Mat::default()), DetectionOutcome::NoFace);
    }

    #[test]
    fn test_detector_error_is_swallowed() {
        let mut backend = DetectionBackend::Fallback(Box::new(FailingFallback));
        assert_eq!(backend.detect(&Mat::default()), DetectionOutcome::NoFace);
        assert_eq!(backend.implementation(), TrackerImplementation::Fallback);
    }

    #[test]
    fn test_zero_sized_box_is_no_face() {
        let degenerate = FaceDetection {
            bbox: BoundingBox::new(0.0, 0.0, 0.0, 10.0),
            score: 1.0,
        };
        let mut backend = DetectionBackend::Native(Box::new(FixedNative(vec![degenerate])));
        assert_eq!(backend.detect(&Mat::default()), DetectionOutcome::NoFace);
    }

    #[tokio::test]
    async fn test_blocking_detect_hands_backend_back() {
        let backend = DetectionBackend::Native(Box::new(FixedNative(vec![face(3.0, 0.7)])));
        let (backend, outcome) = backend.detect_blocking(Mat::default()).await.unwrap();
        assert_eq!(outcome, DetectionOutcome::Face(BoundingBox::new(3.0, 10.0, 50.0, 50.0)));
        assert_eq!(backend.implementation(), TrackerImplementation::Native);
    }

    #[tokio::test]
    async fn test_panicking_detector_is_dropped() {
        let backend = DetectionBackend::Native(Box::new(PanickingNative));
        assert!(backend.detect_blocking(Mat::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_resolver_without_capabilities_is_unavailable() {
        let err = BackendResolver::default().resolve().await.unwrap_err();
        assert!(matches!(err, TrackingFailure::BackendUnavailable { .. }));
    }
}
