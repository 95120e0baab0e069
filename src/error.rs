//! Error types for the parallax window library.

use std::fmt;
use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// `OpenCV` operation failed
    #[error("OpenCV error: {0}")]
    OpenCV(#[from] opencv::Error),

    /// `ONNX` Runtime inference failed
    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::OrtError),

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Downloading model weights failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Model loading or inference error
    #[error("Model error: {0}")]
    ModelError(String),

    /// Detector could not be constructed
    #[error("Detector error: {0}")]
    DetectorError(String),

    /// Camera could not be opened
    #[error("Camera error: {0}")]
    Camera(CameraFailure),

    /// A camera handle is already live for this session
    #[error("Camera already acquired; release the live handle first")]
    CameraBusy,

    /// Smoothing filter misconfigured
    #[error("Smoothing error: {0}")]
    SmoothingError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Why a camera stream could not be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFailure {
    /// The OS refused access to the device
    PermissionDenied,
    /// No usable device at the requested index
    DeviceUnavailable,
}

impl fmt::Display for CameraFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => f.write_str("permission denied"),
            Self::DeviceUnavailable => f.write_str("device unavailable"),
        }
    }
}

/// Fatal failures that move the tracking lifecycle into its error state.
///
/// Per-frame detection errors never become a `TrackingFailure`; they are
/// logged and treated as "no face" for that frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingFailure {
    /// The user (or OS policy) declined camera access
    PermissionDenied,
    /// The camera could not be opened for any other reason
    DeviceUnavailable,
    /// Neither the native nor the fallback detector is usable
    BackendUnavailable {
        /// Why the native detector was not selected
        native: String,
        /// Why the fallback detector failed, model load failures included
        fallback: String,
    },
}

impl TrackingFailure {
    /// The single user-visible message for this failure category
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "Camera access denied. Please enable camera permissions and try again.",
            Self::DeviceUnavailable => "No camera could be opened. Check that a camera is connected and not in use.",
            Self::BackendUnavailable { .. } => {
                "Failed to load face detection models. Please check your connection or model path and try again."
            }
        }
    }
}

impl From<CameraFailure> for TrackingFailure {
    fn from(failure: CameraFailure) -> Self {
        match failure {
            CameraFailure::PermissionDenied => Self::PermissionDenied,
            CameraFailure::DeviceUnavailable => Self::DeviceUnavailable,
        }
    }
}

impl fmt::Display for TrackingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => f.write_str("camera permission denied"),
            Self::DeviceUnavailable => f.write_str("camera device unavailable"),
            Self::BackendUnavailable { native, fallback } => {
                write!(f, "no face detector available (native: {native}; fallback: {fallback})")
            }
        }
    }
}

impl std::error::Error for TrackingFailure {}
