//! Parallax window application: head-tracked pseudo-3D scene.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use parallax_window::app::ParallaxApp;
use parallax_window::config::{Config, SceneKind};
use std::time::Duration;

/// How long exit waits for a detection still running in native code
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Camera index to use
    #[arg(long)]
    cam: Option<i32>,

    /// Requested capture width
    #[arg(long)]
    width: Option<i32>,

    /// Requested capture height
    #[arg(long)]
    height: Option<i32>,

    /// Scene preset (default, mirror, matrix, space, pond)
    #[arg(short, long, value_parser = parse_scene)]
    scene: Option<SceneKind>,

    /// Smoothing factor in (0, 1]; overrides the scene preset
    #[arg(long)]
    smoothing: Option<f64>,

    /// Fallback model weights: file path or http(s) URL
    #[arg(short, long)]
    model_source: Option<String>,

    /// Skip the OpenCV cascade detector and use the fallback model directly
    #[arg(long)]
    no_native: bool,

    /// Run without a window (Ctrl-C to quit)
    #[arg(long)]
    headless: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<String>,
}

fn parse_scene(s: &str) -> std::result::Result<SceneKind, String> {
    s.parse().map_err(|e: parallax_window::Error| e.to_string())
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(cam) = self.cam {
            config.camera.index = cam;
        }
        if let Some(width) = self.width {
            config.camera.width = width;
        }
        if let Some(height) = self.height {
            config.camera.height = height;
        }
        if let Some(scene) = self.scene {
            config.display.scene = scene;
        }
        if let Some(factor) = self.smoothing {
            config.smoothing.factor = Some(factor);
        }
        if let Some(source) = &self.model_source {
            config.detection.model_source = source.clone();
        }
        if self.no_native {
            config.detection.native_enabled = false;
        }
        if self.headless {
            config.display.gui = false;
        }
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logger
    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    info!("Parallax Window");

    // Load configuration if provided
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading configuration from: {}", config_path);
        match Config::from_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Failed to load config file: {}. Using defaults.", e);
                Config::default()
            }
        }
    } else {
        Config::default()
    };
    args.apply(&mut config);

    // Everything async shares one thread; detection runs on the blocking pool
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    // Create and run application
    let result = runtime.block_on(async {
        let mut app = ParallaxApp::new(config).context("Invalid configuration")?;
        app.run().await?;
        Ok::<(), anyhow::Error>(())
    });

    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}
