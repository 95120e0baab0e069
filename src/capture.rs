//! Scoped ownership of the camera stream.
//!
//! [`FrameCaptureService`] is the only owner of the live stream. Other
//! components get an opaque [`CameraHandle`] and a read-only
//! [`FrameSource`] that goes quiet as soon as the handle is released.

use crate::error::CameraFailure;
use crate::normalizer::FrameSize;
use crate::{Error, Result};
use log::{debug, info, warn};
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, CAP_PROP_BUFFERSIZE, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH};
use std::sync::{Arc, Mutex};

/// An open camera stream
pub trait VideoStream: Send {
    /// Grab the latest frame; `None` while the device is still warming up
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails mid-stream
    fn read_frame(&mut self) -> Result<Option<Mat>>;

    /// Stop every underlying hardware track
    ///
    /// # Errors
    ///
    /// Returns an error if the device refuses to close cleanly
    fn stop(&mut self) -> Result<()>;
}

/// Something that can open a camera stream at a requested resolution
pub trait CameraDevice: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::Camera`] with the failure category when the device cannot be opened
    fn open(&self, width: i32, height: i32) -> Result<Box<dyn VideoStream>>;
}

/// Opaque token for the one live stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraHandle {
    id: u64,
}

type StreamSlot = Arc<Mutex<Option<Box<dyn VideoStream>>>>;

/// Read access to the live stream for the detection loop
#[derive(Clone)]
pub struct FrameSource {
    slot: StreamSlot,
}

impl FrameSource {
    /// Latest decodable frame and its size, or `None` if nothing is ready.
    ///
    /// The read waits on the device, so it runs on the blocking pool.
    pub async fn latest_frame(&self) -> Option<(Mat, FrameSize)> {
        let slot = Arc::clone(&self.slot);
        match tokio::task::spawn_blocking(move || Self::read(&slot)).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Camera read crashed: {}", e);
                None
            }
        }
    }

    fn read(slot: &StreamSlot) -> Option<(Mat, FrameSize)> {
        let Ok(mut guard) = slot.lock() else {
            warn!("Camera stream lock poisoned");
            return None;
        };
        let stream = guard.as_mut()?;

        match stream.read_frame() {
            Ok(Some(frame)) if !frame.empty() => {
                let size = FrameSize::new(frame.cols(), frame.rows());
                Some((frame, size))
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read camera frame: {}", e);
                None
            }
        }
    }
}

/// Acquires and releases the camera; at most one live handle at a time
pub struct FrameCaptureService {
    device: Box<dyn CameraDevice>,
    slot: StreamSlot,
    live: Option<CameraHandle>,
    next_id: u64,
    acquire_count: usize,
    release_count: usize,
}

impl FrameCaptureService {
    #[must_use]
    pub fn new(device: Box<dyn CameraDevice>) -> Self {
        Self {
            device,
            slot: Arc::new(Mutex::new(None)),
            live: None,
            next_id: 0,
            acquire_count: 0,
            release_count: 0,
        }
    }

    /// Open the camera at `width` x `height`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CameraBusy`] if a handle is already live, or
    /// [`Error::Camera`] when the device cannot be opened
    pub fn acquire(&mut self, width: i32, height: i32) -> Result<CameraHandle> {
        if self.live.is_some() {
            return Err(Error::CameraBusy);
        }

        let stream = match self.device.open(width, height) {
            Ok(stream) => stream,
            Err(Error::Camera(failure)) => return Err(Error::Camera(failure)),
            Err(e) => {
                warn!("Camera open failed: {}", e);
                return Err(Error::Camera(CameraFailure::DeviceUnavailable));
            }
        };

        let mut guard = self.slot.lock().map_err(|_| Error::Camera(CameraFailure::DeviceUnavailable))?;
        *guard = Some(stream);
        drop(guard);

        self.next_id += 1;
        let handle = CameraHandle { id: self.next_id };
        self.live = Some(handle);
        self.acquire_count += 1;
        info!("Camera acquired at {}x{}", width, height);
        Ok(handle)
    }

    /// Stop the stream behind `handle`. Releasing a stale handle is a no-op.
    pub fn release(&mut self, handle: CameraHandle) {
        if self.live != Some(handle) {
            debug!("Ignoring release of inactive camera handle {:?}", handle);
            return;
        }
        self.live = None;
        self.release_count += 1;

        let stream = match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut stream) = stream {
            if let Err(e) = stream.stop() {
                warn!("Error while stopping camera: {}", e);
            }
        }
        info!("Camera released");
    }

    /// Release whatever handle is live
    pub fn release_live(&mut self) {
        if let Some(handle) = self.live {
            self.release(handle);
        }
    }

    #[must_use]
    pub fn frame_source(&self) -> FrameSource {
        FrameSource {
            slot: Arc::clone(&self.slot),
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Number of successful acquisitions so far
    #[must_use]
    pub fn acquire_count(&self) -> usize {
        self.acquire_count
    }

    /// Number of releases of a live handle so far
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.release_count
    }
}

impl Drop for FrameCaptureService {
    fn drop(&mut self) {
        self.release_live();
    }
}

/// Webcam opened through `OpenCV`
#[derive(Debug, Clone)]
pub struct OpenCvCamera {
    index: i32,
    mirror: bool,
}

impl OpenCvCamera {
    /// Camera at `index`; `mirror` flips frames horizontally before detection
    #[must_use]
    pub fn new(index: i32, mirror: bool) -> Self {
        Self { index, mirror }
    }

    /// Tell a permission problem apart from a missing device
    fn classify_failure(&self) -> CameraFailure {
        if cfg!(target_os = "linux") {
            let node = format!("/dev/video{}", self.index);
            if let Err(e) = std::fs::File::open(&node) {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    return CameraFailure::PermissionDenied;
                }
            }
        }
        CameraFailure::DeviceUnavailable
    }
}

impl CameraDevice for OpenCvCamera {
    fn open(&self, width: i32, height: i32) -> Result<Box<dyn VideoStream>> {
        info!("Opening camera {}", self.index);
        let mut capture = match VideoCapture::new(self.index, videoio::CAP_ANY) {
            Ok(capture) => capture,
            Err(e) => {
                warn!("Camera {} failed to open: {}", self.index, e);
                return Err(Error::Camera(self.classify_failure()));
            }
        };
        if !capture.is_opened()? {
            return Err(Error::Camera(self.classify_failure()));
        }

        capture.set(CAP_PROP_FRAME_WIDTH, f64::from(width))?;
        capture.set(CAP_PROP_FRAME_HEIGHT, f64::from(height))?;
        // Keep only the newest frame for low latency
        capture.set(CAP_PROP_BUFFERSIZE, 1.0)?;

        Ok(Box::new(OpenCvStream {
            capture,
            mirror: self.mirror,
        }))
    }
}

struct OpenCvStream {
    capture: VideoCapture,
    mirror: bool,
}

impl VideoStream for OpenCvStream {
    fn read_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        if self.mirror {
            let mut flipped = Mat::default();
            opencv::core::flip(&frame, &mut flipped, 1)?;
            return Ok(Some(flipped));
        }
        Ok(Some(frame))
    }

    fn stop(&mut self) -> Result<()> {
        self.capture.release()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStream {
        stops: Arc<AtomicUsize>,
    }

    impl VideoStream for CountingStream {
        fn read_frame(&mut self) -> Result<Option<Mat>> {
            Ok(None)
        }

        fn stop(&mut self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingCamera {
        stops: Arc<AtomicUsize>,
    }

    impl CameraDevice for CountingCamera {
        fn open(&self, _width: i32, _height: i32) -> Result<Box<dyn VideoStream>> {
            Ok(Box::new(CountingStream {
                stops: Arc::clone(&self.stops),
            }))
        }
    }

    struct DeniedCamera;

    impl CameraDevice for DeniedCamera {
        fn open(&self, _width: i32, _height: i32) -> Result<Box<dyn VideoStream>> {
            Err(Error::Camera(CameraFailure::PermissionDenied))
        }
    }

    fn counting_service() -> (FrameCaptureService, Arc<AtomicUsize>) {
        let stops = Arc::new(AtomicUsize::new(0));
        let service = FrameCaptureService::new(Box::new(CountingCamera {
            stops: Arc::clone(&stops),
        }));
        (service, stops)
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut service, stops) = counting_service();
        let handle = service.acquire(640, 480).unwrap();
        service.release(handle);
        service.release(handle);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(service.release_count(), 1);
        assert!(!service.is_live());
    }

    #[test]
    fn test_second_acquire_while_live_is_rejected() {
        let (mut service, _stops) = counting_service();
        let _handle = service.acquire(640, 480).unwrap();
        assert!(matches!(service.acquire(640, 480), Err(Error::CameraBusy)));
        assert_eq!(service.acquire_count(), 1);
    }

    #[test]
    fn test_stale_handle_does_not_release_new_stream() {
        let (mut service, stops) = counting_service();
        let first = service.acquire(640, 480).unwrap();
        service.release(first);
        let second = service.acquire(640, 480).unwrap();
        service.release(first);
        assert!(service.is_live());
        service.release(second);
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_releases_live_stream() {
        let (mut service, stops) = counting_service();
        service.acquire(640, 480).unwrap();
        drop(service);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_frame_source_is_quiet_after_release() {
        let (mut service, _stops) = counting_service();
        let source = service.frame_source();
        assert!(source.latest_frame().await.is_none());
        let handle = service.acquire(640, 480).unwrap();
        service.release(handle);
        assert!(source.latest_frame().await.is_none());
    }

    #[test]
    fn test_permission_denied_is_preserved() {
        let mut service = FrameCaptureService::new(Box::new(DeniedCamera));
        assert!(matches!(
            service.acquire(640, 480),
            Err(Error::Camera(CameraFailure::PermissionDenied))
        ));
        assert!(!service.is_live());
        assert_eq!(service.acquire_count(), 0);
    }
}
