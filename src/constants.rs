//! Constants used throughout the application

/// Default capture resolution
pub const DEFAULT_CAPTURE_WIDTH: i32 = 640;
pub const DEFAULT_CAPTURE_HEIGHT: i32 = 480;

/// Default display refresh rate driving the detection and smoothing ticks
pub const DEFAULT_REFRESH_HZ: u32 = 60;

/// Default smoothing factor for most scenes
pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.08;

/// Slower smoothing used by the space and pond scenes
pub const CALM_SMOOTHING_FACTOR: f64 = 0.05;

/// Distance below which a smoothed value snaps onto its target
pub const SMOOTHING_EPSILON: f64 = 0.001;

/// Face detector weights; also looked up next to the executable and in the model cache
pub const DEFAULT_MODEL_SOURCE: &str = "assets/face_detector.onnx";

/// Directory for downloaded model weights
pub const DEFAULT_MODEL_CACHE_DIR: &str = ".cache/models";

/// Haar cascade shipped with `OpenCV` installs
pub const NATIVE_CASCADE_FILE: &str = "haarcascades/haarcascade_frontalface_default.xml";

/// Fast-mode cascade parameters
pub const CASCADE_SCALE_FACTOR: f64 = 1.2;
pub const CASCADE_MIN_NEIGHBORS: i32 = 3;
pub const CASCADE_MIN_FACE_SIZE: i32 = 60;

/// SCRFD detection defaults
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

/// Image normalization constants for face detection
pub const IMAGE_NORMALIZATION_OFFSET: f32 = 127.5;
pub const IMAGE_NORMALIZATION_SCALE: f32 = 128.0;
