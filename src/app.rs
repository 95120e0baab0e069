//! Main application module for the parallax window.

use crate::{
    capture::{FrameCaptureService, OpenCvCamera},
    config::{Config, SceneKind},
    detection::{
        fallback::{ModelSource, OnnxModelLoader},
        native::CascadeProbe,
        BackendResolver, FallbackLoader, NativeDetectorProbe,
    },
    lifecycle::LifecycleState,
    normalizer::{FrameSize, HeadPosition},
    render::{draw_scene, SceneFrame},
    schedule::{CancelToken, FrameClock},
    session::{LifecycleObserver, SessionSettings, TrackingSession},
    smoothing::{SmoothedPosition, SmoothingTask},
    Result,
};
use log::{debug, info, warn};
use opencv::highgui::{self, WINDOW_NORMAL};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const WINDOW_NAME: &str = "Parallax Window";
const CANVAS: FrameSize = FrameSize::new(800, 600);

/// Notices from the tracking session to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiNotice {
    Ready,
    Error(String),
}

/// Observer forwarding lifecycle callbacks over a channel
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<UiNotice>,
}

impl ChannelObserver {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LifecycleObserver for ChannelObserver {
    fn on_ready(&mut self) {
        if self.tx.send(UiNotice::Ready).is_err() {
            debug!("UI went away before ready notice");
        }
    }

    fn on_error(&mut self, reason: &str) {
        if self.tx.send(UiNotice::Error(reason.to_string())).is_err() {
            debug!("UI went away before error notice");
        }
    }
}

/// User commands from the debug view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    ToggleVisibility,
    Retry,
    NextScene,
    Quit,
}

/// Map a `highgui` key code to a command
#[must_use]
pub fn key_action(key: i32) -> Option<KeyAction> {
    match key {
        27 => Some(KeyAction::Quit),
        k if k == i32::from(b'q') => Some(KeyAction::Quit),
        k if k == i32::from(b'v') => Some(KeyAction::ToggleVisibility),
        k if k == i32::from(b'r') => Some(KeyAction::Retry),
        k if k == i32::from(b's') => Some(KeyAction::NextScene),
        _ => None,
    }
}

/// Detector resolver for `config`: cascade first when enabled, then the ONNX model
#[must_use]
pub fn build_resolver(config: &Config) -> BackendResolver {
    let native: Option<Box<dyn NativeDetectorProbe>> = if config.detection.native_enabled {
        Some(Box::new(CascadeProbe::new(config.detection.cascade_path.clone())))
    } else {
        info!("Native face detector disabled");
        None
    };

    let fallback: Box<dyn FallbackLoader> = Box::new(OnnxModelLoader::new(
        ModelSource::parse(&config.detection.model_source),
        config.detection.model_cache_dir.clone(),
        config.detection.confidence_threshold,
        config.detection.nms_threshold,
    ));

    BackendResolver::new(native, Some(fallback))
}

#[must_use]
pub fn session_settings(config: &Config) -> SessionSettings {
    SessionSettings {
        capture_width: config.camera.width,
        capture_height: config.camera.height,
        refresh_hz: config.display.refresh_hz,
    }
}

/// Running smoothing task and its output
struct Smoother {
    cancel: CancelToken,
    task: JoinHandle<()>,
    output: watch::Receiver<HeadPosition>,
}

impl Smoother {
    fn spawn(
        initial: HeadPosition,
        factor: f64,
        epsilon: f64,
        targets: watch::Receiver<HeadPosition>,
        refresh_hz: u32,
    ) -> Result<Self> {
        let position = SmoothedPosition::new(initial, factor, epsilon)?;
        let (output_tx, output) = watch::channel(initial);
        let cancel = CancelToken::new();
        let task = tokio::spawn(
            SmoothingTask::new(position, targets, output_tx, FrameClock::new(refresh_hz), cancel.clone()).run(),
        );
        Ok(Self { cancel, task, output })
    }

    fn current(&self) -> HeadPosition {
        *self.output.borrow()
    }

    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Smoothing task ended abnormally: {}", e);
        }
    }
}

/// Main application struct
pub struct ParallaxApp {
    config: Config,
    session: TrackingSession,
    notices: mpsc::UnboundedReceiver<UiNotice>,
    smoother: Option<Smoother>,
    scene: SceneKind,
    status: String,
}

impl ParallaxApp {
    /// Create the application with the webcam and detectors described by `config`
    pub fn new(config: Config) -> Result<Self> {
        info!("Initializing Parallax Window application");
        config.validate()?;

        let capture = FrameCaptureService::new(Box::new(OpenCvCamera::new(config.camera.index, config.camera.mirror)));
        let (observer, notices) = ChannelObserver::channel();
        let session = TrackingSession::new(
            session_settings(&config),
            build_resolver(&config),
            capture,
            Box::new(observer),
        );

        Ok(Self::with_session(config, session, notices))
    }

    /// Create the application around an already assembled session
    #[must_use]
    pub fn with_session(config: Config, session: TrackingSession, notices: mpsc::UnboundedReceiver<UiNotice>) -> Self {
        let scene = config.display.scene;
        Self {
            config,
            session,
            notices,
            smoother: None,
            scene,
            status: String::from("Loading face tracking..."),
        }
    }

    #[must_use]
    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    #[must_use]
    pub fn scene(&self) -> SceneKind {
        self.scene
    }

    /// Smoothed head position, or center before tracking begins
    #[must_use]
    pub fn position(&self) -> HeadPosition {
        self.smoother.as_ref().map_or(HeadPosition::CENTER, Smoother::current)
    }

    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    fn smoothing_factor(&self) -> f64 {
        self.config.smoothing.factor.unwrap_or_else(|| self.scene.smoothing_factor())
    }

    /// Start (or restart) smoothing from `initial` with the current factor
    async fn restart_smoothing(&mut self, initial: HeadPosition) -> Result<()> {
        if let Some(old) = self.smoother.take() {
            old.stop().await;
        }
        let smoother = Smoother::spawn(
            initial,
            self.smoothing_factor(),
            self.config.smoothing.epsilon,
            self.session.signals().position,
            self.config.display.refresh_hz,
        )?;
        self.smoother = Some(smoother);
        Ok(())
    }

    /// Resolve the detector and, once ready, show tracking
    pub async fn begin_tracking(&mut self) -> Result<()> {
        self.session.start().await;
        self.drain_notices();
        if self.session.state().is_tracking() {
            self.session.set_visible(true).await;
            self.drain_notices();
        }
        if self.session.state().is_tracking() {
            self.restart_smoothing(self.position()).await?;
        }
        Ok(())
    }

    /// Apply a user command; returns `false` when the app should exit
    pub async fn handle(&mut self, action: KeyAction) -> Result<bool> {
        match action {
            KeyAction::Quit => {
                info!("Exit requested by user");
                return Ok(false);
            }
            KeyAction::ToggleVisibility => {
                if let LifecycleState::Tracking { visible } = *self.session.state() {
                    info!("Tracking {}", if visible { "hidden" } else { "shown" });
                    self.session.set_visible(!visible).await;
                    self.drain_notices();
                }
            }
            KeyAction::Retry => {
                if self.session.state().failure().is_some() {
                    info!("Retrying face tracking");
                    self.session.retry().await;
                    if let Some(old) = self.smoother.take() {
                        old.stop().await;
                    }
                    self.status = String::from("Loading face tracking...");
                    self.begin_tracking().await?;
                }
            }
            KeyAction::NextScene => {
                self.scene = self.scene.next();
                info!("Scene: {} (smoothing {})", self.scene.as_str(), self.smoothing_factor());
                if self.smoother.is_some() {
                    self.restart_smoothing(self.position()).await?;
                }
            }
        }
        Ok(true)
    }

    fn drain_notices(&mut self) {
        while let Ok(notice) = self.notices.try_recv() {
            match notice {
                UiNotice::Ready => {
                    let implementation = self.session.implementation();
                    self.status = format!("Tracking ({:?})", implementation);
                }
                UiNotice::Error(reason) => {
                    self.status = format!("{} Press 'r' to retry.", reason);
                }
            }
        }
    }

    /// Run the main application loop
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting main application loop");

        let gui = self.config.display.gui;
        if gui {
            highgui::named_window(WINDOW_NAME, WINDOW_NORMAL)?;
            highgui::resize_window(WINDOW_NAME, CANVAS.width, CANVAS.height)?;
        }

        self.begin_tracking().await?;

        let mut clock = FrameClock::new(self.config.display.refresh_hz);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut last_logged = HeadPosition::CENTER;

        loop {
            tokio::select! {
                biased;
                _ = &mut ctrl_c => {
                    info!("Interrupted");
                    break;
                }
                () = clock.tick() => {}
            }

            self.drain_notices();

            if gui {
                self.render()?;
                let key = highgui::wait_key(1)?;
                if let Some(action) = key_action(key) {
                    if !self.handle(action).await? {
                        break;
                    }
                }
            } else {
                let position = self.position();
                if position != last_logged {
                    debug!("Head position x: {:+.3} y: {:+.3}", position.x, position.y);
                    last_logged = position;
                }
            }
        }

        self.shutdown().await;
        if gui {
            highgui::destroy_all_windows()?;
        }
        info!("Application shutting down");
        Ok(())
    }

    fn render(&self) -> Result<()> {
        let overlay = if self.config.display.show_debug_overlay {
            *self.session.signals().overlay.borrow()
        } else {
            None
        };
        let frame = SceneFrame {
            scene: self.scene,
            position: self.position(),
            overlay,
            status: &self.status,
        };
        let image = draw_scene(&frame, CANVAS)?;
        highgui::imshow(WINDOW_NAME, &image)?;
        Ok(())
    }

    /// Stop smoothing and tear the session down to idle
    pub async fn shutdown(&mut self) {
        if let Some(smoother) = self.smoother.take() {
            smoother.stop().await;
        }
        self.session.shutdown().await;
    }
}
