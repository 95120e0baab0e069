//! Head-tracked parallax window library.
//!
//! A webcam face tracker drives a pseudo-3D "window" effect: the face's
//! position in the camera frame becomes a normalized head position, which is
//! smoothed and used to shift the layers of a rendered scene.
//!
//! The pipeline consists of:
//! 1. Backend resolution: the `OpenCV` cascade detector when it can be built,
//!    otherwise an ONNX face detector loaded from a path or URL
//! 2. Camera capture with scoped, paired acquire/release
//! 3. A frame-paced detection loop publishing the normalized position
//! 4. Exponential smoothing of that position for rendering
//!
//! All of it is driven by a small lifecycle state machine
//! (`Idle -> Loading -> Tracking`, with `Error` and retry).
//!
//! # Examples
//!
//! ## Normalizing a detection
//!
//! ```
//! use parallax_window::normalizer::{normalize, BoundingBox, FrameSize};
//!
//! let bbox = BoundingBox::new(0.0, 200.0, 80.0, 80.0);
//! let position = normalize(&bbox, FrameSize::new(640, 480));
//! assert!((position.x - 0.875).abs() < 1e-9);
//! ```
//!
//! ## Smoothing
//!
//! ```
//! use parallax_window::smoothing::SmoothedScalar;
//!
//! # fn main() -> parallax_window::Result<()> {
//! let mut value = SmoothedScalar::new(0.0, 0.5)?;
//! value.set_target(1.0);
//! assert_eq!(value.tick(), 0.5);
//! # Ok(())
//! # }
//! ```
//!
//! ## Running a session
//!
//! ```no_run
//! use parallax_window::{app::build_resolver, capture::{FrameCaptureService, OpenCvCamera},
//!                       config::Config, session::{LogObserver, SessionSettings, TrackingSession}};
//!
//! # async fn run() {
//! let config = Config::default();
//! let capture = FrameCaptureService::new(Box::new(OpenCvCamera::new(0, false)));
//! let settings = SessionSettings { capture_width: 640, capture_height: 480, refresh_hz: 60 };
//! let mut session = TrackingSession::new(settings, build_resolver(&config), capture, Box::new(LogObserver));
//!
//! session.start().await;
//! session.set_visible(true).await;
//! let signals = session.signals();
//! println!("head at {:?}", *signals.position.borrow());
//! session.shutdown().await;
//! # }
//! ```

/// Error types and result handling
pub mod error;

/// Constants used throughout the application
pub mod constants;

/// Configuration management
pub mod config;

/// Bounding box to head position mapping
pub mod normalizer;

/// Frame clock and cancellation
pub mod schedule;

/// Exponential position smoothing
pub mod smoothing;

/// Face detector backends and their resolution
pub mod detection;

/// Camera ownership
pub mod capture;

/// Frame-paced detection loop
pub mod detection_loop;

/// Tracking lifecycle state machine
pub mod lifecycle;

/// Runtime tracking session
pub mod session;

/// Scene drawing
pub mod render;

/// Main application module
pub mod app;

pub use error::{Error, Result};
