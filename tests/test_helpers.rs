//! Helper functions and mock capabilities for tests

#![allow(dead_code)]

use async_trait::async_trait;
use opencv::core::{Mat, Scalar, CV_8UC3};
use parallax_window::capture::{CameraDevice, FrameCaptureService, VideoStream};
use parallax_window::detection::{
    BackendResolver, FallbackFaceDetector, FallbackLoader, FaceDetection, NativeDetectorProbe, NativeFaceDetector,
};
use parallax_window::error::CameraFailure;
use parallax_window::normalizer::BoundingBox;
use parallax_window::session::{LifecycleObserver, SessionSettings, TrackingSession};
use parallax_window::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WIDTH: i32 = 640;
pub const HEIGHT: i32 = 480;

/// Face near the left edge of a 640x480 frame; normalizes to x = 0.875
pub const LEFT_FACE: BoundingBox = BoundingBox {
    x: 0.0,
    y: 200.0,
    width: 80.0,
    height: 80.0,
};

/// Create a black test frame with specified dimensions
pub fn create_test_frame(width: i32, height: i32) -> Result<Mat> {
    Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(0.0)).map_err(Into::into)
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        capture_width: WIDTH,
        capture_height: HEIGHT,
        refresh_hz: 60,
    }
}

/// Shared call counters
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn drop_one(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }

    /// Raise to at least `value`
    pub fn raise(&self, value: usize) {
        self.0.fetch_max(value, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Holds a blocking detector inside `detect` until the test lets it go
#[derive(Clone)]
pub struct Gate {
    entered: tokio::sync::mpsc::UnboundedSender<()>,
    release: Arc<Mutex<std_mpsc::Receiver<()>>>,
}

/// Test side of a [`Gate`]
pub struct GateControl {
    entered: tokio::sync::mpsc::UnboundedReceiver<()>,
    release: Option<std_mpsc::Sender<()>>,
}

impl Gate {
    pub fn new() -> (Self, GateControl) {
        let (entered_tx, entered_rx) = tokio::sync::mpsc::unbounded_channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        (
            Self {
                entered: entered_tx,
                release: Arc::new(Mutex::new(release_rx)),
            },
            GateControl {
                entered: entered_rx,
                release: Some(release_tx),
            },
        )
    }

    fn pass(&self) {
        let _ = self.entered.send(());
        if let Ok(release) = self.release.lock() {
            // Err means the gate was opened for good
            let _ = release.recv();
        }
    }
}

impl GateControl {
    /// Wait until a detection is blocked in the gate
    pub async fn entered(&mut self) {
        self.entered.recv().await.expect("detector dropped before entering the gate");
    }

    /// Let every pending and future detection through
    pub fn open(&mut self) {
        self.release.take();
    }
}

/// Detector returning a fixed face; blocks the calling thread like real inference
pub struct FixedDetector {
    pub bbox: Option<BoundingBox>,
    pub work: Duration,
    pub gate: Option<Gate>,
    pub calls: Counter,
    pub in_flight: Counter,
    pub max_in_flight: Counter,
}

impl FixedDetector {
    pub fn new(bbox: Option<BoundingBox>) -> Self {
        Self {
            bbox,
            work: Duration::ZERO,
            gate: None,
            calls: Counter::default(),
            in_flight: Counter::default(),
            max_in_flight: Counter::default(),
        }
    }

    pub fn gated(bbox: Option<BoundingBox>, gate: Gate) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(bbox)
        }
    }

    fn run(&mut self) -> Option<FaceDetection> {
        self.calls.bump();
        self.in_flight.bump();
        self.max_in_flight.raise(self.in_flight.get());

        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if !self.work.is_zero() {
            std::thread::sleep(self.work);
        }

        self.in_flight.drop_one();
        self.bbox.map(|bbox| FaceDetection { bbox, score: 0.9 })
    }
}

impl NativeFaceDetector for FixedDetector {
    fn detect(&mut self, _frame: &Mat) -> Result<Vec<FaceDetection>> {
        Ok(self.run().into_iter().collect())
    }
}

impl FallbackFaceDetector for FixedDetector {
    fn detect_single(&mut self, _frame: &Mat) -> Result<Option<FaceDetection>> {
        Ok(self.run())
    }
}

/// Native capability handing out one prepared detector
pub struct PreparedNative {
    detector: Mutex<Option<FixedDetector>>,
}

impl PreparedNative {
    pub fn new(detector: FixedDetector) -> Self {
        Self {
            detector: Mutex::new(Some(detector)),
        }
    }
}

impl NativeDetectorProbe for PreparedNative {
    fn construct(&self, _fast_mode: bool) -> Result<Box<dyn NativeFaceDetector>> {
        let detector = self.detector.lock().ok().and_then(|mut slot| slot.take());
        match detector {
            Some(detector) => Ok(Box::new(detector)),
            None => Err(Error::DetectorError("prepared detector already used".to_string())),
        }
    }
}

/// Native probe that either builds a [`FixedDetector`] or fails
pub struct MockNativeProbe {
    pub available: bool,
    pub bbox: Option<BoundingBox>,
    pub constructs: Counter,
}

impl NativeDetectorProbe for MockNativeProbe {
    fn construct(&self, fast_mode: bool) -> Result<Box<dyn NativeFaceDetector>> {
        assert!(fast_mode, "native detector must be built in fast mode");
        self.constructs.bump();
        if self.available {
            Ok(Box::new(FixedDetector::new(self.bbox)))
        } else {
            Err(Error::DetectorError("FaceDetector is not supported".to_string()))
        }
    }
}

/// Fallback loader that either yields a [`FixedDetector`] or fails
pub struct MockFallbackLoader {
    pub available: bool,
    pub bbox: Option<BoundingBox>,
    pub loads: Counter,
}

#[async_trait]
impl FallbackLoader for MockFallbackLoader {
    async fn load(&self) -> Result<Box<dyn FallbackFaceDetector>> {
        self.loads.bump();
        if self.available {
            Ok(Box::new(FixedDetector::new(self.bbox)))
        } else {
            Err(Error::ModelError("weights not found".to_string()))
        }
    }
}

/// Resolver built from mocks, plus their counters
pub fn resolver(native: bool, fallback: bool, bbox: Option<BoundingBox>) -> (BackendResolver, Counter, Counter) {
    let constructs = Counter::default();
    let loads = Counter::default();
    let resolver = BackendResolver::new(
        Some(Box::new(MockNativeProbe {
            available: native,
            bbox,
            constructs: constructs.clone(),
        })),
        Some(Box::new(MockFallbackLoader {
            available: fallback,
            bbox,
            loads: loads.clone(),
        })),
    );
    (resolver, constructs, loads)
}

/// Stream producing black frames of a fixed size
pub struct MockStream {
    width: i32,
    height: i32,
    stops: Counter,
}

impl VideoStream for MockStream {
    fn read_frame(&mut self) -> Result<Option<Mat>> {
        create_test_frame(self.width, self.height).map(Some)
    }

    fn stop(&mut self) -> Result<()> {
        self.stops.bump();
        Ok(())
    }
}

/// Camera that opens [`MockStream`]s or fails with a fixed reason
#[derive(Clone, Default)]
pub struct MockCamera {
    pub failure: Option<CameraFailure>,
    /// Resolution delivered regardless of what was requested
    pub native_size: Option<(i32, i32)>,
    pub opens: Counter,
    pub stops: Counter,
}

impl MockCamera {
    pub fn denied() -> Self {
        Self {
            failure: Some(CameraFailure::PermissionDenied),
            ..Self::default()
        }
    }
}

impl CameraDevice for MockCamera {
    fn open(&self, width: i32, height: i32) -> Result<Box<dyn VideoStream>> {
        self.opens.bump();
        if let Some(failure) = self.failure {
            return Err(Error::Camera(failure));
        }
        let (width, height) = self.native_size.unwrap_or((width, height));
        Ok(Box::new(MockStream {
            width,
            height,
            stops: self.stops.clone(),
        }))
    }
}

/// Observer recording every callback
#[derive(Clone, Default)]
pub struct RecordingObserver {
    pub ready: Counter,
    pub errors: Arc<Mutex<Vec<String>>>,
}

impl RecordingObserver {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl LifecycleObserver for RecordingObserver {
    fn on_ready(&mut self) {
        self.ready.bump();
    }

    fn on_error(&mut self, reason: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(reason.to_string());
        }
    }
}

/// Session over mock capabilities
pub fn session(resolver: BackendResolver, camera: &MockCamera, observer: &RecordingObserver) -> TrackingSession {
    TrackingSession::new(
        settings(),
        resolver,
        FrameCaptureService::new(Box::new(camera.clone())),
        Box::new(observer.clone()),
    )
}

/// Let spawned loops run for a while under paused time
pub async fn run_frames(frames: u32) {
    tokio::time::sleep(Duration::from_millis(17 * u64::from(frames))).await;
}

/// Step paused time one frame period at a time.
///
/// Needed while a detection is parked on the blocking pool, since paused
/// time does not advance by itself then.
pub async fn step_frames(frames: u32, period: Duration) {
    for _ in 0..frames {
        tokio::time::advance(period).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }
}
