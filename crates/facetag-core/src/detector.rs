//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model on RGB photos: anchor-free decoding over three strides,
//! followed by greedy non-maximum suppression.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Default minimum detector score for a face to be reported.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Where each tensor for one stride sits in the model's output list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    scores: usize,
    boxes: usize,
    landmarks: usize,
}

/// Resize factor between the photo and the model input. The photo is
/// placed at the top-left corner; the rest is padding.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
}

impl Letterbox {
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (x / self.scale, y / self.scale)
    }
}

/// Raw output slices for one stride.
struct StrideTensors<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    landmarks: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    layout: [StrideOutputs; 3],
    confidence_threshold: f32,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model with landmarks has 9 outputs, got {}",
                output_names.len()
            )));
        }

        let layout = output_layout(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?layout,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            layout,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        })
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Detect faces in an RGB photo. Boxes are in photo pixels, sorted by
    /// descending confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = letterbox(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let layout = self.layout[slot];
            let extract = |index: usize, what: &str| {
                outputs[index]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let tensors = StrideTensors {
                scores: extract(layout.scores, "scores")?,
                boxes: extract(layout.boxes, "boxes")?,
                landmarks: extract(layout.landmarks, "landmarks")?,
            };
            candidates.extend(decode_stride(
                &tensors,
                stride,
                letterbox,
                self.confidence_threshold,
            ));
        }

        let faces: Vec<BoundingBox> = suppress_overlaps(candidates, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .map(|b| b.clamp_to(image.width(), image.height()))
            .filter(|b| b.width > 0.0 && b.height > 0.0)
            .collect();

        tracing::debug!(faces = faces.len(), "SCRFD detection finished");
        Ok(faces)
    }
}

/// Resize the photo into the 640×640 NCHW input tensor.
fn letterbox(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let size = SCRFD_INPUT_SIZE as usize;
    let (w, h) = image.dimensions();
    let scale = (SCRFD_INPUT_SIZE as f32 / w.max(1) as f32)
        .min(SCRFD_INPUT_SIZE as f32 / h.max(1) as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // Padding pixels are black, as in the reference preprocessing.
    let pad = (0.0 - SCRFD_MEAN) / SCRFD_STD;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), pad);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, Letterbox { scale })
}

/// Map output tensors to strides by name (`score_8`, `bbox_16`, `kps_32`, ...),
/// falling back to the standard order `[scores ×3, boxes ×3, landmarks ×3]`
/// when the export uses numeric names.
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                scores: position("score", stride)?,
                boxes: position("bbox", stride)?,
                landmarks: position("kps", stride)?,
            })
        })
        .collect();

    match named.as_deref() {
        Some(&[a, b, c]) => [a, b, c],
        _ => std::array::from_fn(|i| StrideOutputs {
            scores: i,
            boxes: i + 3,
            landmarks: i + 6,
        }),
    }
}

/// Decode every anchor above `threshold` for one stride.
fn decode_stride(
    tensors: &StrideTensors<'_>,
    stride: usize,
    letterbox: Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE as usize / stride;
    let step = stride as f32;

    tensors
        .scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * step;
            let cy = (cell / grid_w) as f32 * step;

            let offsets = tensors.boxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(cx - offsets[0] * step, cy - offsets[1] * step);
            let (x2, y2) = letterbox.unmap(cx + offsets[2] * step, cy + offsets[3] * step);

            let landmarks = tensors.landmarks.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.unmap(cx + k[2 * i] * step, cy + k[2 * i + 1] * step)
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by descending confidence.
fn suppress_overlaps(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
