//! End-to-end pipeline tests: normalization, smoothing and the app shell

mod test_helpers;

use parallax_window::app::{ChannelObserver, KeyAction, ParallaxApp};
use parallax_window::capture::FrameCaptureService;
use parallax_window::config::{Config, SceneKind};
use parallax_window::constants::{DEFAULT_SMOOTHING_FACTOR, SMOOTHING_EPSILON};
use parallax_window::lifecycle::LifecycleState;
use parallax_window::normalizer::{normalize, BoundingBox, FrameSize, HeadPosition};
use parallax_window::session::TrackingSession;
use parallax_window::smoothing::{SmoothedPosition, SmoothedScalar};
use test_helpers::{resolver, run_frames, settings, MockCamera, HEIGHT, LEFT_FACE, WIDTH};

const FRAME: FrameSize = FrameSize::new(WIDTH, HEIGHT);

#[test]
fn test_capture_frame_scenarios() {
    let centered = normalize(&BoundingBox::new(280.0, 200.0, 80.0, 80.0), FRAME);
    assert_eq!(centered, HeadPosition::new(0.0, 0.0));

    let left = normalize(&LEFT_FACE, FRAME);
    assert!((left.x - 0.875).abs() < 1e-12);
    assert!(left.y.abs() < 1e-12);
}

#[test]
fn test_normalized_output_stays_in_unit_square() {
    for i in 0..200 {
        let t = f64::from(i);
        let bbox = BoundingBox::new(t * 7.3 - 300.0, t * 3.1 - 100.0, 40.0 + t, 40.0 + t);
        let pos = normalize(&bbox, FRAME);
        assert!((-1.0..=1.0).contains(&pos.x), "x out of range: {}", pos.x);
        assert!((-1.0..=1.0).contains(&pos.y), "y out of range: {}", pos.y);
    }
}

#[test]
fn test_default_factor_settles_on_detected_position() {
    let target = normalize(&LEFT_FACE, FRAME);
    let mut position = SmoothedPosition::new(HeadPosition::CENTER, DEFAULT_SMOOTHING_FACTOR, SMOOTHING_EPSILON).unwrap();
    position.set_target(target);

    let mut ticks = 0;
    while position.is_active() {
        position.tick();
        ticks += 1;
    }

    assert_eq!(position.current().x, target.x);
    // (1 - 0.08)^n * 0.875 < 0.001 first holds at n = 82; one more tick snaps
    assert!((80..=90).contains(&ticks), "settled after {ticks} ticks");
}

#[test]
fn test_retargeting_mid_flight_keeps_current_value() {
    let mut s = SmoothedScalar::new(0.0, 0.5).unwrap();
    s.set_target(1.0);
    s.tick();
    s.set_target(-1.0);
    assert_eq!(s.current(), 0.5);
    assert_eq!(s.tick(), -0.25);
}

fn mock_app(camera: &MockCamera, native: bool, fallback: bool) -> ParallaxApp {
    let mut config = Config::default();
    config.display.gui = false;
    let (resolver, _, _) = resolver(native, fallback, Some(LEFT_FACE));
    let (observer, notices) = ChannelObserver::channel();
    let session = TrackingSession::new(
        settings(),
        resolver,
        FrameCaptureService::new(Box::new(camera.clone())),
        Box::new(observer),
    );
    ParallaxApp::with_session(config, session, notices)
}

#[tokio::test(start_paused = true)]
async fn test_app_tracks_and_smooths_toward_face() {
    let camera = MockCamera::default();
    let mut app = mock_app(&camera, true, true);

    app.begin_tracking().await.unwrap();
    assert_eq!(*app.session().state(), LifecycleState::Tracking { visible: true });
    assert!(app.status().starts_with("Tracking"));

    run_frames(200).await;
    let position = app.position();
    assert!((position.x - 0.875).abs() < SMOOTHING_EPSILON, "x = {}", position.x);

    app.shutdown().await;
    assert_eq!(*app.session().state(), LifecycleState::Idle);
    assert_eq!(camera.stops.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_app_toggle_visibility_and_scene() {
    let camera = MockCamera::default();
    let mut app = mock_app(&camera, true, false);
    app.begin_tracking().await.unwrap();

    assert!(app.handle(KeyAction::ToggleVisibility).await.unwrap());
    assert_eq!(*app.session().state(), LifecycleState::Tracking { visible: false });
    assert!(!app.session().capture().is_live());

    assert!(app.handle(KeyAction::ToggleVisibility).await.unwrap());
    assert!(app.session().capture().is_live());

    assert_eq!(app.scene(), SceneKind::Default);
    assert!(app.handle(KeyAction::NextScene).await.unwrap());
    assert_eq!(app.scene(), SceneKind::Mirror);

    assert!(!app.handle(KeyAction::Quit).await.unwrap());
    app.shutdown().await;
    assert_eq!(camera.opens.get(), 2);
    assert_eq!(camera.stops.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_app_reports_error_and_retries() {
    let camera = MockCamera::denied();
    let mut app = mock_app(&camera, true, false);

    app.begin_tracking().await.unwrap();
    assert!(app.session().state().failure().is_some());
    assert!(app.status().contains("retry"));

    app.handle(KeyAction::Retry).await.unwrap();
    // The camera is still denied, so the retry lands back in the error state
    assert!(app.session().state().failure().is_some());
    assert_eq!(camera.opens.get(), 2);
    assert!(!app.session().capture().is_live());
}
