//! Configuration management for the parallax window application

use crate::constants::{
    CALM_SMOOTHING_FACTOR, DEFAULT_CAPTURE_HEIGHT, DEFAULT_CAPTURE_WIDTH, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_MODEL_CACHE_DIR, DEFAULT_MODEL_SOURCE, DEFAULT_NMS_THRESHOLD, DEFAULT_REFRESH_HZ,
    DEFAULT_SMOOTHING_FACTOR, SMOOTHING_EPSILON,
};
use crate::smoothing::validate_factor;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera configuration
    pub camera: CameraConfig,

    /// Face detection configuration
    pub detection: DetectionConfig,

    /// Smoothing configuration
    pub smoothing: SmoothingConfig,

    /// Display configuration
    pub display: DisplayConfig,
}

/// Camera parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera index
    pub index: i32,

    /// Requested capture width
    pub width: i32,

    /// Requested capture height
    pub height: i32,

    /// Flip frames horizontally before detection
    pub mirror: bool,
}

/// Face detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Try the `OpenCV` cascade detector before the ONNX fallback
    pub native_enabled: bool,

    /// Explicit cascade file; searched in the `OpenCV` data directories when unset
    pub cascade_path: Option<PathBuf>,

    /// Fallback model weights: a file path or an http(s) URL
    pub model_source: String,

    /// Where downloaded weights are cached
    pub model_cache_dir: PathBuf,

    /// Confidence threshold for the fallback detector (0.0-1.0)
    pub confidence_threshold: f32,

    /// IOU threshold for non-maximum suppression (0.0-1.0)
    pub nms_threshold: f32,
}

/// Smoothing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Per-frame convergence rate in (0, 1]; the scene preset applies when unset
    pub factor: Option<f64>,

    /// Snap distance
    pub epsilon: f64,
}

/// Display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Refresh rate driving detection and smoothing
    pub refresh_hz: u32,

    /// Open the debug view window
    pub gui: bool,

    /// Draw the last detected face box
    pub show_debug_overlay: bool,

    /// Scene preset
    pub scene: SceneKind,
}

/// Scene presets; each carries its preferred smoothing factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneKind {
    #[default]
    Default,
    Mirror,
    Matrix,
    Space,
    Pond,
}

impl SceneKind {
    pub const ALL: [SceneKind; 5] = [Self::Default, Self::Mirror, Self::Matrix, Self::Space, Self::Pond];

    /// Smoothing factor the scene was tuned for
    #[must_use]
    pub fn smoothing_factor(self) -> f64 {
        match self {
            Self::Space | Self::Pond => CALM_SMOOTHING_FACTOR,
            Self::Default | Self::Mirror | Self::Matrix => DEFAULT_SMOOTHING_FACTOR,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Mirror => "mirror",
            Self::Matrix => "matrix",
            Self::Space => "space",
            Self::Pond => "pond",
        }
    }

    /// Next preset in [`SceneKind::ALL`], wrapping around
    #[must_use]
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|&s| s == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl FromStr for SceneKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "mirror" => Ok(Self::Mirror),
            "matrix" => Ok(Self::Matrix),
            "space" => Ok(Self::Space),
            "pond" => Ok(Self::Pond),
            other => Err(Error::ConfigError(format!("Unknown scene: {other}"))),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: DEFAULT_CAPTURE_WIDTH,
            height: DEFAULT_CAPTURE_HEIGHT,
            mirror: false,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            native_enabled: true,
            cascade_path: None,
            model_source: DEFAULT_MODEL_SOURCE.to_string(),
            model_cache_dir: PathBuf::from(DEFAULT_MODEL_CACHE_DIR),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            factor: None,
            epsilon: SMOOTHING_EPSILON,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_hz: DEFAULT_REFRESH_HZ,
            gui: true,
            show_debug_overlay: true,
            scene: SceneKind::Default,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        serde_yaml::from_str(&content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a YAML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Smoothing factor in effect: explicit setting, else the scene preset
    #[must_use]
    pub fn smoothing_factor(&self) -> f64 {
        self.smoothing
            .factor
            .unwrap_or_else(|| self.display.scene.smoothing_factor())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.camera.width <= 0 || self.camera.height <= 0 {
            return Err(Error::ConfigError(format!(
                "Capture resolution must be positive, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(Error::ConfigError(
                "Confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detection.nms_threshold) {
            return Err(Error::ConfigError(
                "NMS threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.detection.model_source.trim().is_empty() {
            return Err(Error::ConfigError("Model source must not be empty".to_string()));
        }

        validate_factor(self.smoothing_factor()).map_err(|e| Error::ConfigError(e.to_string()))?;
        if !(self.smoothing.epsilon.is_finite() && self.smoothing.epsilon > 0.0) {
            return Err(Error::ConfigError("Smoothing epsilon must be positive".to_string()));
        }

        if self.display.refresh_hz == 0 {
            return Err(Error::ConfigError("Refresh rate must be greater than 0".to_string()));
        }

        Ok(())
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Parallax Window Configuration

# Camera
camera:
  index: 0
  width: 640
  height: 480
  mirror: false

# Face detection
detection:
  native_enabled: true
  # cascade_path: "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml"
  model_source: "assets/face_detector.onnx"
  model_cache_dir: ".cache/models"
  confidence_threshold: 0.5
  nms_threshold: 0.4

# Smoothing (omit factor to use the scene preset)
smoothing:
  factor: 0.08
  epsilon: 0.001

# Display
display:
  refresh_hz: 60
  gui: true
  show_debug_overlay: true
  scene: "default"
"#;
