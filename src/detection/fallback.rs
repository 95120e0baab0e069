use super::{FaceDetection, FallbackFaceDetector, FallbackLoader};
use crate::constants::{IMAGE_NORMALIZATION_OFFSET, IMAGE_NORMALIZATION_SCALE};
use crate::normalizer::BoundingBox;
use crate::{Error, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use ndarray::{Array2, Array4, CowArray};
use opencv::core::{Mat, Rect, Scalar, Size, Vec3b, CV_8UC3};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;
use ort::{Environment, Session, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Where the fallback model weights come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Bundled file on disk
    Path(PathBuf),
    /// Remote weights, downloaded once into the cache directory
    Url(String),
}

impl ModelSource {
    /// Interpret `http://` and `https://` locations as URLs, anything else as a path
    #[must_use]
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::Url(location.to_string())
        } else {
            Self::Path(PathBuf::from(location))
        }
    }
}

/// Loads an SCRFD model from a [`ModelSource`]
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    source: ModelSource,
    cache_dir: PathBuf,
    conf_threshold: f32,
    nms_threshold: f32,
}

impl OnnxModelLoader {
    #[must_use]
    pub fn new(source: ModelSource, cache_dir: PathBuf, conf_threshold: f32, nms_threshold: f32) -> Self {
        Self {
            source,
            cache_dir,
            conf_threshold,
            nms_threshold,
        }
    }

    /// Build the detector from a local file on the blocking pool
    async fn build(&self, path: PathBuf) -> Result<ScrfdDetector> {
        let (conf_threshold, nms_threshold) = (self.conf_threshold, self.nms_threshold);
        tokio::task::spawn_blocking(move || ScrfdDetector::new(&path, conf_threshold, nms_threshold))
            .await
            .map_err(|e| Error::ModelError(format!("Model loader crashed: {e}")))?
    }

    async fn load_from_url(&self, url: &str) -> Result<ScrfdDetector> {
        let cached = self.cache_dir.join(cache_file_name(url));
        if cached.exists() {
            debug!("Using cached model {}", cached.display());
            match self.build(cached.clone()).await {
                Ok(detector) => return Ok(detector),
                Err(e) => {
                    warn!("Cached model {} is unusable, downloading again: {}", cached.display(), e);
                    if let Err(e) = std::fs::remove_file(&cached) {
                        warn!("Could not remove {}: {}", cached.display(), e);
                    }
                }
            }
        }

        info!("Downloading face detection model from {}", url);
        let bytes = reqwest::get(url).await?.error_for_status()?.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::ModelError(format!("Empty model downloaded from {url}")));
        }
        store_atomically(&self.cache_dir, &cached, &bytes)?;
        info!("Cached {} bytes of model weights at {}", bytes.len(), cached.display());
        self.build(cached).await
    }
}

#[async_trait]
impl FallbackLoader for OnnxModelLoader {
    async fn load(&self) -> Result<Box<dyn FallbackFaceDetector>> {
        let detector = match &self.source {
            ModelSource::Path(path) => {
                let found = locate_model(path, &self.cache_dir)?;
                self.build(found).await?
            }
            ModelSource::Url(url) => self.load_from_url(url).await?,
        };
        Ok(Box::new(detector))
    }
}

/// Find a model file: as given, next to the executable, then in the cache directory
fn locate_model(path: &Path, cache_dir: &Path) -> Result<PathBuf> {
    let mut candidates = vec![path.to_path_buf()];
    if path.is_relative() {
        if let Some(exe_dir) = std::env::current_exe().ok().as_deref().and_then(Path::parent) {
            candidates.push(exe_dir.join(path));
        }
    }
    if let Some(name) = path.file_name() {
        candidates.push(cache_dir.join(name));
    }

    if let Some(found) = candidates.iter().find(|candidate| candidate.is_file()) {
        return Ok(found.clone());
    }
    let searched: Vec<String> = candidates.iter().map(|c| c.display().to_string()).collect();
    Err(Error::ModelError(format!(
        "Model file not found (searched {}); set detection.model_source to a model file or an http(s) URL",
        searched.join(", ")
    )))
}

/// Write `bytes` to `target` through a temporary file in `dir`, so a
/// crash never leaves a truncated model behind
fn store_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(target).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// File name used to cache a downloaded model
fn cache_file_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .map_or_else(|| "face_detector.onnx".to_string(), str::to_string)
}

/// SCRFD face detector using ONNX Runtime
pub struct ScrfdDetector {
    session: Session,
    input_size: (i32, i32),
    conf_threshold: f32,
    nms_threshold: f32,
    num_anchors: usize,
    strides: Vec<i32>,
    offset: usize,
    center_cache: HashMap<(i32, i32, i32), Array2<f32>>,
}

impl ScrfdDetector {
    /// Create a detector from an ONNX model file
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded
    pub fn new<P: AsRef<Path>>(model_path: P, conf_threshold: f32, nms_threshold: f32) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_detector")
                .with_log_level(ort::LoggingLevel::Warning)
                .build()?,
        );

        let session = ort::SessionBuilder::new(&environment)?
            .with_optimization_level(ort::GraphOptimizationLevel::Level3)?
            .with_model_from_file(model_path)?;

        let input_meta = session
            .inputs
            .first()
            .ok_or_else(|| Error::ModelError("Model has no inputs".to_string()))?;

        // [batch, channels, height, width]; dynamic axes fall back to 640
        let dims = &input_meta.dimensions;
        let input_size = if dims.len() >= 4 {
            let height = dims[2].map_or(640, |d| d as i32);
            let width = dims[3].map_or(640, |d| d as i32);
            (width, height)
        } else {
            (640, 640)
        };

        // Keypoint heads are ignored; only the score and box heads are read
        let (offset, strides, num_anchors) = match session.outputs.len() {
            6 | 9 => (3, vec![8, 16, 32], 2),
            10 | 15 => (5, vec![8, 16, 32, 64, 128], 1),
            n => {
                warn!("Unknown model configuration with {} outputs, using defaults", n);
                (3, vec![8, 16, 32], 2)
            }
        };

        Ok(Self {
            session,
            input_size,
            conf_threshold,
            nms_threshold,
            num_anchors,
            strides,
            offset,
            center_cache: HashMap::new(),
        })
    }

    /// Detect faces, highest score first
    ///
    /// # Errors
    ///
    /// Returns an error if preprocessing or inference fails
    pub fn detect(&mut self, image: &Mat) -> Result<Vec<FaceDetection>> {
        let img_height = image.rows();
        let img_width = image.cols();
        if img_width <= 0 || img_height <= 0 {
            return Err(Error::InvalidInput("Empty frame".to_string()));
        }

        // Letterbox into the model input, keeping aspect ratio
        let ratio_img = img_height as f32 / img_width as f32;
        let (input_width, input_height) = self.input_size;
        let ratio_model = input_height as f32 / input_width as f32;
        let (new_width, new_height) = if ratio_img > ratio_model {
            ((input_height as f32 / ratio_img) as i32, input_height)
        } else {
            (input_width, (input_width as f32 * ratio_img) as i32)
        };
        let det_scale = new_height as f32 / img_height as f32;

        let mut resized = Mat::default();
        imgproc::resize(
            image,
            &mut resized,
            Size::new(new_width, new_height),
            0.0,
            0.0,
            InterpolationFlags::INTER_LINEAR as i32,
        )?;

        let mut det_img = Mat::new_rows_cols_with_default(input_height, input_width, CV_8UC3, Scalar::all(0.0))?;
        {
            let mut roi = det_img.roi_mut(Rect::new(0, 0, new_width, new_height))?;
            resized.copy_to(&mut roi)?;
        }

        let input = Self::preprocess(&det_img)?;
        let (scores, boxes) = self.forward(input)?;

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let keep = nms(&boxes, &order, self.nms_threshold);
        Ok(keep
            .into_iter()
            .map(|i| {
                let [x1, y1, x2, y2] = boxes[i].map(|v| f64::from(v / det_scale));
                FaceDetection {
                    bbox: BoundingBox::new(x1, y1, x2 - x1, y2 - y1),
                    score: scores[i],
                }
            })
            .collect())
    }

    /// BGR u8 image to normalized RGB NCHW tensor
    fn preprocess(image: &Mat) -> Result<Array4<f32>> {
        let height = image.rows() as usize;
        let width = image.cols() as usize;
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        for row in 0..height {
            for col in 0..width {
                let pixel = image.at_2d::<Vec3b>(row as i32, col as i32)?;
                for ch in 0..3 {
                    // BGR in, RGB out
                    let value = f32::from(pixel[2 - ch]);
                    array[[0, ch, row, col]] = (value - IMAGE_NORMALIZATION_OFFSET) / IMAGE_NORMALIZATION_SCALE;
                }
            }
        }

        Ok(array)
    }

    /// Run inference and decode every anchor above the confidence threshold
    fn forward(&mut self, input: Array4<f32>) -> Result<(Vec<f32>, Vec<[f32; 4]>)> {
        let input_height = input.shape()[2] as i32;
        let input_width = input.shape()[3] as i32;

        let cow_array = CowArray::from(input.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut scores = Vec::new();
        let mut boxes = Vec::new();

        for (idx, &stride) in self.strides.iter().enumerate() {
            let score_tensor = outputs
                .get(idx)
                .ok_or_else(|| Error::ModelError(format!("Missing score output {idx}")))?
                .try_extract::<f32>()?;
            let score_view = score_tensor.view();
            let stride_scores: Vec<f32> = score_view.iter().copied().collect();

            let bbox_tensor = outputs
                .get(idx + self.offset)
                .ok_or_else(|| Error::ModelError(format!("Missing bbox output {}", idx + self.offset)))?
                .try_extract::<f32>()?;
            let bbox_view = bbox_tensor.view();
            let distances: Vec<f32> = bbox_view.iter().map(|&d| d * stride as f32).collect();

            let centers = anchor_centers(
                &mut self.center_cache,
                self.num_anchors,
                (input_height / stride, input_width / stride, stride),
            );
            let anchors = centers.nrows().min(stride_scores.len()).min(distances.len() / 4);

            for i in 0..anchors {
                let score = stride_scores[i];
                if score < self.conf_threshold {
                    continue;
                }
                let (cx, cy) = (centers[[i, 0]], centers[[i, 1]]);
                let d = &distances[i * 4..i * 4 + 4];
                scores.push(score);
                boxes.push([cx - d[0], cy - d[1], cx + d[2], cy + d[3]]);
            }
        }

        Ok((scores, boxes))
    }
}

impl FallbackFaceDetector for ScrfdDetector {
    fn detect_single(&mut self, frame: &Mat) -> Result<Option<FaceDetection>> {
        Ok(self.detect(frame)?.into_iter().next())
    }
}

/// Anchor centers for one `(height, width, stride)` feature map, cached by shape
fn anchor_centers(
    cache: &mut HashMap<(i32, i32, i32), Array2<f32>>,
    num_anchors: usize,
    key: (i32, i32, i32),
) -> Array2<f32> {
    if let Some(centers) = cache.get(&key) {
        return centers.clone();
    }

    let (height, width, stride) = key;
    let n_points = (height.max(0) * width.max(0)) as usize * num_anchors;
    let mut centers = Array2::zeros((n_points, 2));
    let mut i = 0;
    for y in 0..height {
        for x in 0..width {
            for _ in 0..num_anchors {
                centers[[i, 0]] = (x * stride) as f32;
                centers[[i, 1]] = (y * stride) as f32;
                i += 1;
            }
        }
    }

    if cache.len() < 100 {
        cache.insert(key, centers.clone());
    }
    centers
}

/// Greedy non-maximum suppression over `[x1, y1, x2, y2]` boxes visited in `order`
fn nms(boxes: &[[f32; 4]], order: &[usize], threshold: f32) -> Vec<usize> {
    let mut keep = Vec::new();
    let mut remaining = order.to_vec();

    while let Some((&i, rest)) = remaining.split_first() {
        keep.push(i);
        let a = boxes[i];
        let area_a = (a[2] - a[0] + 1.0) * (a[3] - a[1] + 1.0);

        remaining = rest
            .iter()
            .copied()
            .filter(|&j| {
                let b = boxes[j];
                let area_b = (b[2] - b[0] + 1.0) * (b[3] - b[1] + 1.0);
                let w = (a[2].min(b[2]) - a[0].max(b[0]) + 1.0).max(0.0);
                let h = (a[3].min(b[3]) - a[1].max(b[1]) + 1.0).max(0.0);
                let inter = w * h;
                inter / (area_a + area_b - inter) <= threshold
            })
            .collect();
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_source_parsing() {
        assert_eq!(
            ModelSource::parse("https://example.com/weights/scrfd.onnx"),
            ModelSource::Url("https://example.com/weights/scrfd.onnx".to_string())
        );
        assert_eq!(
            ModelSource::parse("assets/face_detector.onnx"),
            ModelSource::Path(PathBuf::from("assets/face_detector.onnx"))
        );
    }

    #[test]
    fn test_cache_file_name() {
        assert_eq!(cache_file_name("https://example.com/m/scrfd_500m.onnx"), "scrfd_500m.onnx");
        assert_eq!(cache_file_name("https://example.com/"), "face_detector.onnx");
    }

    #[test]
    fn test_nms_suppresses_overlapping_boxes() {
        let boxes = vec![
            [10.0, 10.0, 60.0, 60.0],
            [12.0, 12.0, 62.0, 62.0],
            [200.0, 200.0, 250.0, 250.0],
        ];
        let keep = nms(&boxes, &[0, 1, 2], 0.4);
        assert_eq!(keep, vec![0, 2]);
    }

    #[test]
    fn test_anchor_centers_repeat_per_anchor() {
        let mut cache = HashMap::new();
        let centers = anchor_centers(&mut cache, 2, (2, 2, 8));
        assert_eq!(centers.nrows(), 8);
        assert_eq!((centers[[0, 0]], centers[[1, 0]]), (0.0, 0.0));
        assert_eq!((centers[[2, 0]], centers[[2, 1]]), (8.0, 0.0));
        assert_eq!((centers[[4, 0]], centers[[4, 1]]), (0.0, 8.0));
        assert!(cache.contains_key(&(2, 2, 8)));
    }

    #[test]
    fn test_nms_keeps_order_of_scores() {
        let boxes = vec![[0.0, 0.0, 10.0, 10.0], [100.0, 100.0, 110.0, 110.0]];
        assert_eq!(nms(&boxes, &[1, 0], 0.4), vec![1, 0]);
        assert!(nms(&boxes, &[], 0.4).is_empty());
    }

    #[tokio::test]
    async fn test_missing_model_file_fails_to_load() {
        let loader = OnnxModelLoader::new(
            ModelSource::Path(PathBuf::from("/nonexistent/model.onnx")),
            std::env::temp_dir(),
            0.5,
            0.4,
        );
        match loader.load().await {
            Err(Error::ModelError(msg)) => assert!(msg.contains("not found")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("loading should fail without a model file"),
        }
    }

    #[test]
    fn test_model_found_in_cache_dir() {
        let cache = tempfile::tempdir().unwrap();
        let cached = cache.path().join("face_detector.onnx");
        std::fs::write(&cached, b"weights").unwrap();

        let found = locate_model(Path::new("assets/face_detector.onnx"), cache.path()).unwrap();
        assert_eq!(found, cached);

        match locate_model(Path::new("assets/other.onnx"), cache.path()) {
            Err(Error::ModelError(msg)) => assert!(msg.contains("model_source")),
            other => panic!("expected a missing model error, got {other:?}"),
        }
    }

    #[test]
    fn test_store_atomically_leaves_only_target() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("models");
        let target = models.join("scrfd.onnx");

        store_atomically(&models, &target, b"first").unwrap();
        store_atomically(&models, &target, b"second").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"second");
        let entries: Vec<_> = std::fs::read_dir(&models).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_cached_model_is_discarded_before_download() {
        let cache = tempfile::tempdir().unwrap();
        let cached = cache.path().join("scrfd.onnx");
        std::fs::write(&cached, b"truncated download").unwrap();

        // Nothing listens on the discard port, so the re-download fails too
        let loader = OnnxModelLoader::new(
            ModelSource::Url("http://127.0.0.1:9/scrfd.onnx".to_string()),
            cache.path().to_path_buf(),
            0.5,
            0.4,
        );
        assert!(loader.load().await.is_err());
        assert!(!cached.exists());
    }
}
