//! Runtime side of the tracking lifecycle.
//!
//! [`TrackingSession`] owns the detector, the camera and the detection
//! loop, and performs the effects that [`LifecycleState::on`] asks for.
//! Every method takes `&mut self`, so acquisition and release are
//! serialized. Stopping never waits for the detector: the camera is
//! released at once and a detection still in flight finishes in the
//! background, where its result is discarded.

use crate::capture::{CameraHandle, FrameCaptureService};
use crate::detection::{BackendResolver, TrackerImplementation};
use crate::detection_loop::{DetectionLoop, LoopStats, PositionPublisher, SharedBackend, TrackingSignals};
use crate::error::{CameraFailure, TrackingFailure};
use crate::lifecycle::{Effect, LifecycleEvent, LifecycleState};
use crate::schedule::{CancelToken, FrameClock};
use crate::Error;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Callbacks for the UI shell
pub trait LifecycleObserver {
    /// The detector resolved and tracking can be shown
    fn on_ready(&mut self);

    /// Tracking failed; `reason` is the user-facing message
    fn on_error(&mut self, reason: &str);
}

/// Observer that only logs
#[derive(Debug, Default)]
pub struct LogObserver;

impl LifecycleObserver for LogObserver {
    fn on_ready(&mut self) {
        info!("Head tracking ready");
    }

    fn on_error(&mut self, reason: &str) {
        error!("Head tracking failed: {}", reason);
    }
}

/// Capture and pacing parameters
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub capture_width: i32,
    pub capture_height: i32,
    pub refresh_hz: u32,
}

struct ActiveTracking {
    handle: CameraHandle,
    cancel: CancelToken,
    task: JoinHandle<LoopStats>,
}

/// One tracking session: detector, camera and detection loop
pub struct TrackingSession {
    state: LifecycleState,
    settings: SessionSettings,
    resolver: BackendResolver,
    backend: SharedBackend,
    implementation: TrackerImplementation,
    capture: FrameCaptureService,
    active: Option<ActiveTracking>,
    publisher: PositionPublisher,
    signals: TrackingSignals,
    observer: Box<dyn LifecycleObserver>,
}

impl TrackingSession {
    #[must_use]
    pub fn new(
        settings: SessionSettings,
        resolver: BackendResolver,
        capture: FrameCaptureService,
        observer: Box<dyn LifecycleObserver>,
    ) -> Self {
        let (publisher, signals) = PositionPublisher::channel();
        Self {
            state: LifecycleState::Idle,
            settings,
            resolver,
            backend: Arc::new(Mutex::new(None)),
            implementation: TrackerImplementation::Unresolved,
            capture,
            active: None,
            publisher,
            signals,
            observer,
        }
    }

    /// Begin detector resolution
    pub async fn start(&mut self) {
        self.dispatch(LifecycleEvent::StartRequested).await;
    }

    /// Show or hide tracking; showing acquires the camera and starts detection
    pub async fn set_visible(&mut self, visible: bool) {
        self.dispatch(LifecycleEvent::VisibilityChanged(visible)).await;
    }

    /// Leave the error state and forget everything resolved so far
    pub async fn retry(&mut self) {
        self.dispatch(LifecycleEvent::RetryRequested).await;
    }

    /// Tear down camera and loop and return to idle
    pub async fn shutdown(&mut self) {
        self.dispatch(LifecycleEvent::Exit).await;
    }

    #[must_use]
    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    #[must_use]
    pub fn implementation(&self) -> TrackerImplementation {
        self.implementation
    }

    /// Receivers for the published head position and debug overlay
    #[must_use]
    pub fn signals(&self) -> TrackingSignals {
        self.signals.clone()
    }

    /// Whether a camera handle and detection loop are live
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn capture(&self) -> &FrameCaptureService {
        &self.capture
    }

    /// Feed `event` through the state machine, including follow-up events
    pub async fn dispatch(&mut self, event: LifecycleEvent) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            let Some(transition) = self.state.on(&event) else {
                debug!("Ignoring {:?} in state {}", event, self.state.name());
                continue;
            };

            info!("Lifecycle {} -> {} on {:?}", self.state.name(), transition.next.name(), event);
            self.state = transition.next;

            for effect in transition.effects {
                if let Some(follow_up) = self.apply(effect).await {
                    pending.push_back(follow_up);
                }
            }
        }
    }

    async fn apply(&mut self, effect: Effect) -> Option<LifecycleEvent> {
        match effect {
            Effect::ResolveBackend => match self.resolver.resolve().await {
                Ok(backend) => {
                    self.implementation = backend.implementation();
                    self.backend = Arc::new(Mutex::new(Some(backend)));
                    Some(LifecycleEvent::BackendResolved)
                }
                Err(reason) => {
                    self.implementation = TrackerImplementation::Unavailable;
                    Some(LifecycleEvent::BackendFailed(reason))
                }
            },
            Effect::NotifyReady => {
                self.observer.on_ready();
                None
            }
            Effect::NotifyError(reason) => {
                warn!("Tracking error: {}", reason);
                self.observer.on_error(reason.user_message());
                None
            }
            Effect::StartTracking => self.start_tracking().err().map(LifecycleEvent::CameraFailed),
            Effect::StopTracking => {
                self.stop_tracking().await;
                None
            }
            Effect::ClearSession => {
                // A stopped loop may still hold the old backend mid-detection
                self.backend = Arc::new(Mutex::new(None));
                self.implementation = TrackerImplementation::Unresolved;
                self.publisher.reset();
                None
            }
        }
    }

    fn start_tracking(&mut self) -> Result<(), TrackingFailure> {
        if self.active.is_some() {
            warn!("Detection loop already running; not acquiring the camera again");
            return Ok(());
        }

        let handle = self
            .capture
            .acquire(self.settings.capture_width, self.settings.capture_height)
            .map_err(|e| match e {
                Error::Camera(failure) => TrackingFailure::from(failure),
                other => {
                    warn!("Unexpected camera error: {}", other);
                    TrackingFailure::from(CameraFailure::DeviceUnavailable)
                }
            })?;

        let cancel = CancelToken::new();
        let detection = DetectionLoop::new(
            Arc::clone(&self.backend),
            self.capture.frame_source(),
            self.publisher.clone(),
            FrameClock::new(self.settings.refresh_hz),
            cancel.clone(),
        );
        let task = tokio::spawn(detection.run());

        self.active = Some(ActiveTracking { handle, cancel, task });
        Ok(())
    }

    async fn stop_tracking(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            self.capture.release(active.handle);
            if active.task.is_finished() {
                match active.task.await {
                    Ok(stats) => debug!("Detection loop joined after {} cycles", stats.cycles),
                    Err(e) => warn!("Detection loop ended abnormally: {}", e),
                }
            } else {
                debug!("Detection still in flight; its result will be discarded");
            }
        }
        // Covers a handle left behind by a failed start
        self.capture.release_live();
        self.publisher.clear_overlay();
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            active.task.abort();
            self.capture.release(active.handle);
        }
    }
}
