//! Photo analysis: detection plus descriptor extraction.
//!
//! [`OnnxFaceAnalyzer`] owns its models and loads them on first use. There
//! is no process-wide instance; callers construct one and pass it where
//! analysis is needed.

use crate::detector::{self, DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, DetectedFace, Detection, FaceDescriptor};
use std::path::PathBuf;
use thiserror::Error;

const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// Model assets are missing or could not be loaded.
    #[error("face models unavailable: {0}")]
    Unavailable(String),
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detector/embedder seam consumed by the CLI and the viewer.
pub trait FaceAnalyzer {
    /// Find every face in an encoded image and extract its descriptor.
    fn analyze(&mut self, image_bytes: &[u8]) -> Result<Detection, AnalyzerError>;
}

/// Where the models live and how to run them.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub model_dir: PathBuf,
    /// Minimum SCRFD score for a face to be reported.
    pub detection_threshold: f32,
    pub intra_threads: usize,
}

impl AnalyzerConfig {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            detection_threshold: detector::DEFAULT_CONFIDENCE_THRESHOLD,
            intra_threads: 2,
        }
    }

    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL_FILE)
    }

    pub fn recognizer_path(&self) -> PathBuf {
        self.model_dir.join(ARCFACE_MODEL_FILE)
    }
}

/// `$XDG_DATA_HOME/facetag/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facetag")
        .join("models")
}

struct LoadedModels {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl LoadedModels {
    fn load(config: &AnalyzerConfig) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&config.detector_path(), config.intra_threads)
            .map_err(|e| AnalyzerError::Unavailable(e.to_string()))?
            .with_confidence_threshold(config.detection_threshold);
        let recognizer = FaceRecognizer::load(&config.recognizer_path(), config.intra_threads)
            .map_err(|e| AnalyzerError::Unavailable(e.to_string()))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

/// SCRFD + ArcFace analyzer with lazy, one-time model loading.
pub struct OnnxFaceAnalyzer {
    config: AnalyzerConfig,
    models: Option<LoadedModels>,
}

impl OnnxFaceAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            models: None,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.models.is_some()
    }

    /// Load both models if not already loaded. A failed load leaves the
    /// analyzer unloaded so the next call retries.
    pub fn load(&mut self) -> Result<(), AnalyzerError> {
        self.models().map(|_| ())
    }

    fn models(&mut self) -> Result<&mut LoadedModels, AnalyzerError> {
        let models = match self.models.take() {
            Some(models) => models,
            None => {
                let loaded = LoadedModels::load(&self.config)?;
                tracing::info!(dir = %self.config.model_dir.display(), "face models loaded");
                loaded
            }
        };
        Ok(self.models.insert(models))
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn analyze(&mut self, image_bytes: &[u8]) -> Result<Detection, AnalyzerError> {
        let models = self.models()?;
        let image = image::load_from_memory(image_bytes)?.to_rgb8();

        let boxes = models.detector.detect(&image)?;
        let recognizer = &mut models.recognizer;
        let faces = describe_faces(boxes, |bbox| recognizer.extract(&image, bbox))?;

        tracing::info!(
            faces = faces.len(),
            width = image.width(),
            height = image.height(),
            "analyzed photo"
        );

        Ok(Detection {
            faces,
            image_width: image.width(),
            image_height: image.height(),
        })
    }
}

/// Attach a descriptor to each detected box. A face that cannot be aligned
/// is skipped; any other recognizer failure fails the whole photo.
fn describe_faces(
    boxes: Vec<BoundingBox>,
    mut extract: impl FnMut(&BoundingBox) -> Result<FaceDescriptor, RecognizerError>,
) -> Result<Vec<DetectedFace>, AnalyzerError> {
    let mut faces = Vec::with_capacity(boxes.len());
    for bbox in boxes {
        let descriptor = match extract(&bbox) {
            Ok(descriptor) => descriptor,
            Err(e @ (RecognizerError::NoLandmarks | RecognizerError::DegenerateLandmarks)) => {
                tracing::warn!(
                    confidence = bbox.confidence,
                    x = bbox.x,
                    y = bbox.y,
                    error = %e,
                    "skipping face that cannot be aligned"
                );
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        faces.push(DetectedFace {
            confidence: bbox.confidence,
            bounding_box: bbox,
            descriptor,
        });
    }
    Ok(faces)
}
