//! Build script that locates the system OpenCV install and the Haar cascade
//! data the native face detector loads at runtime.

use std::env;
use std::path::Path;
use std::process::Command;

const CASCADE_DIRS: [&str; 3] = [
    "/usr/share/opencv4/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/opt/homebrew/share/opencv4/haarcascades",
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    check_opencv();
    check_cascade_data();

    println!(
        "cargo:rustc-env=BUILD_TARGET={}",
        env::var("TARGET").unwrap_or_default()
    );
}

fn pkg_config_version(name: &str) -> Option<String> {
    let output = Command::new("pkg-config").args(["--modversion", name]).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn check_opencv() {
    println!("cargo:rerun-if-env-changed=PKG_CONFIG_PATH");
    println!("cargo:rerun-if-env-changed=OPENCV_LINK_PATHS");
    println!("cargo:rerun-if-env-changed=OPENCV_INCLUDE_PATHS");

    match pkg_config_version("opencv4").or_else(|| pkg_config_version("opencv")) {
        Some(version) => println!("cargo:warning=Found OpenCV version: {}", version),
        None => {
            println!("cargo:warning=OpenCV not found via pkg-config. Make sure OpenCV is installed.");
            println!("cargo:warning=On Ubuntu: sudo apt-get install libopencv-dev pkg-config");
            println!("cargo:warning=On macOS: brew install opencv pkg-config");
        }
    }
}

fn check_cascade_data() {
    println!("cargo:rerun-if-env-changed=OPENCV_SAMPLES_DATA_PATH");

    let found = env::var("OPENCV_SAMPLES_DATA_PATH").is_ok()
        || CASCADE_DIRS.iter().any(|dir| Path::new(dir).is_dir());
    if !found {
        println!("cargo:warning=Haar cascade data not found; the ONNX fallback detector will be used.");
        println!("cargo:warning=Set OPENCV_SAMPLES_DATA_PATH or detection.cascade_path to enable the native detector.");
    }
}
