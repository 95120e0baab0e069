//! Frame-paced detection driving the head position signal.

use crate::capture::FrameSource;
use crate::detection::{DetectionBackend, DetectionOutcome};
use crate::normalizer::{normalize, BoundingBox, FrameSize, HeadPosition};
use crate::schedule::{CancelToken, FrameClock};
use log::{debug, trace};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// The session's detector, `None` until resolution succeeds
pub type SharedBackend = Arc<Mutex<Option<DetectionBackend>>>;

/// Last detected face and the size of the frame it was found in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceOverlay {
    pub bbox: BoundingBox,
    pub frame: FrameSize,
}

/// Publishes detection results to rendering consumers
#[derive(Clone)]
pub struct PositionPublisher {
    position: Arc<watch::Sender<HeadPosition>>,
    overlay: Arc<watch::Sender<Option<FaceOverlay>>>,
}

/// Receiving side of a [`PositionPublisher`]
#[derive(Clone)]
pub struct TrackingSignals {
    /// Latest normalized (unsmoothed) head position
    pub position: watch::Receiver<HeadPosition>,
    /// Last detected face, for debug overlays
    pub overlay: watch::Receiver<Option<FaceOverlay>>,
}

impl PositionPublisher {
    #[must_use]
    pub fn channel() -> (Self, TrackingSignals) {
        let (position_tx, position_rx) = watch::channel(HeadPosition::CENTER);
        let (overlay_tx, overlay_rx) = watch::channel(None);
        (
            Self {
                position: Arc::new(position_tx),
                overlay: Arc::new(overlay_tx),
            },
            TrackingSignals {
                position: position_rx,
                overlay: overlay_rx,
            },
        )
    }

    pub fn publish(&self, position: HeadPosition, overlay: FaceOverlay) {
        self.position.send_replace(position);
        self.overlay.send_replace(Some(overlay));
    }

    /// Drop the debug overlay; the position holds its last value
    pub fn clear_overlay(&self) {
        self.overlay.send_if_modified(|overlay| overlay.take().is_some());
    }

    /// Return to center with no overlay
    pub fn reset(&self) {
        self.position.send_replace(HeadPosition::CENTER);
        self.clear_overlay();
    }
}

/// What one tick of the loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    /// No frame or no detector yet
    WarmingUp,
    Face,
    NoFace,
    /// Cancelled while detection was in flight; the result was dropped
    Discarded,
}

/// Counters reported when a loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub faces: u64,
    pub warmups: u64,
}

/// Repeating detection task; detections never overlap
pub struct DetectionLoop {
    backend: SharedBackend,
    source: FrameSource,
    publisher: PositionPublisher,
    clock: FrameClock,
    cancel: CancelToken,
}

impl DetectionLoop {
    #[must_use]
    pub fn new(
        backend: SharedBackend,
        source: FrameSource,
        publisher: PositionPublisher,
        clock: FrameClock,
        cancel: CancelToken,
    ) -> Self {
        Self {
            backend,
            source,
            publisher,
            clock,
            cancel,
        }
    }

    /// Run one detection per frame until cancelled
    pub async fn run(mut self) -> LoopStats {
        let mut stats = LoopStats::default();
        debug!("Detection loop started, one cycle every {:?}", self.clock.period());

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = self.clock.tick() => {}
            }

            match self.cycle().await {
                CycleResult::Discarded => break,
                CycleResult::WarmingUp => stats.warmups += 1,
                CycleResult::Face => {
                    stats.cycles += 1;
                    stats.faces += 1;
                }
                CycleResult::NoFace => stats.cycles += 1,
            }
        }

        debug!("Detection loop stopped: {:?}", stats);
        stats
    }

    /// One detection cycle against the latest frame.
    ///
    /// The frame read and the detector both run on the blocking pool. The
    /// backend lock is held for the whole detection, so cycles from every
    /// loop sharing the backend run one at a time.
    pub async fn cycle(&mut self) -> CycleResult {
        let Some((frame, size)) = self.source.latest_frame().await else {
            trace!("No decodable frame yet");
            return CycleResult::WarmingUp;
        };
        if self.cancel.is_cancelled() {
            return CycleResult::Discarded;
        }

        let outcome = {
            let mut guard = self.backend.lock().await;
            let Some(backend) = guard.take() else {
                trace!("Detector not resolved yet");
                return CycleResult::WarmingUp;
            };
            let Some((backend, outcome)) = backend.detect_blocking(frame).await else {
                // Detector is gone; later cycles warm up until the session is cleared
                self.publisher.clear_overlay();
                return CycleResult::NoFace;
            };
            *guard = Some(backend);
            outcome
        };

        if self.cancel.is_cancelled() {
            debug!("Discarding detection that finished after cancellation");
            return CycleResult::Discarded;
        }

        match outcome {
            DetectionOutcome::Face(bbox) => {
                let position = normalize(&bbox, size);
                trace!("Face at {:?} -> {:?}", bbox, position);
                self.publisher.publish(position, FaceOverlay { bbox, frame: size });
                CycleResult::Face
            }
            DetectionOutcome::NoFace => {
                self.publisher.clear_overlay();
                CycleResult::NoFace
            }
        }
    }
}
