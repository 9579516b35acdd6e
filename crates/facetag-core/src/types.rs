use crate::descriptors::DescriptorError;
use serde::{Deserialize, Serialize};

/// Identifier of a person in the metadata store.
pub type IdentityId = i64;

/// Identifier of a persisted face tag.
pub type TagId = i64;

/// Lowest confidence that lands in the medium tier.
pub const MEDIUM_TIER_MIN_CONFIDENCE: f32 = 0.6;
/// Lowest confidence that lands in the high tier.
pub const HIGH_TIER_MIN_CONFIDENCE: f32 = 0.8;

/// Bounding box for a detected face in image pixels, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score for this box. Reported separately on [`DetectedFace`].
    #[serde(skip)]
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    #[serde(skip)]
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.width * self.height + other.width * other.height - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Clip the box to the image rectangle `[0, width] × [0, height]`.
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        let (w, h) = (width as f32, height as f32);
        let x1 = self.x.clamp(0.0, w);
        let y1 = self.y.clamp(0.0, h);
        let x2 = (self.x + self.width).clamp(0.0, w);
        let y2 = (self.y + self.height).clamp(0.0, h);
        BoundingBox {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
            confidence: self.confidence,
            landmarks: self.landmarks,
        }
    }

    /// Convert a pixel box into percentage-of-image coordinates.
    pub fn to_percent(&self, image_width: u32, image_height: u32) -> TagRect {
        if image_width == 0 || image_height == 0 {
            return TagRect::default();
        }
        let clipped = self.clamp_to(image_width, image_height);
        let sx = 100.0 / image_width as f64;
        let sy = 100.0 / image_height as f64;
        TagRect {
            x: clipped.x as f64 * sx,
            y: clipped.y as f64 * sy,
            width: clipped.width as f64 * sx,
            height: clipped.height as f64 * sy,
        }
    }
}

/// Face descriptor (embedding) vector, typically 512-dimensional for ArcFace.
///
/// Always non-empty with finite components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.is_empty() {
            return Err(DescriptorError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(DescriptorError::NonFinite { index });
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Euclidean distance to another descriptor of the same dimension.
    pub fn distance(&self, other: &FaceDescriptor) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for FaceDescriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<FaceDescriptor> for Vec<f32> {
    fn from(descriptor: FaceDescriptor) -> Self {
        descriptor.0
    }
}

/// One face found by the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub descriptor: FaceDescriptor,
}

/// Output of one analyzer call over a single image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub faces: Vec<DetectedFace>,
    pub image_width: u32,
    pub image_height: u32,
}

/// Confidence bucket of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    Low,
    Medium,
    High,
}

impl MatchTier {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= HIGH_TIER_MIN_CONFIDENCE {
            MatchTier::High
        } else if confidence >= MEDIUM_TIER_MIN_CONFIDENCE {
            MatchTier::Medium
        } else {
            MatchTier::Low
        }
    }
}

/// Result of matching a candidate descriptor against a roster.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    /// Closest identity, absent when the roster was empty.
    pub identity_id: Option<IdentityId>,
    /// `max(0, 1 - distance)`, in [0, 1].
    pub confidence: f32,
    /// Euclidean distance to the closest roster descriptor.
    pub distance: f32,
    pub is_match: bool,
    pub tier: MatchTier,
}

impl MatchResult {
    /// The result reported when there is nothing to compare against.
    pub fn no_match() -> Self {
        Self {
            identity_id: None,
            confidence: 0.0,
            distance: 1.0,
            is_match: false,
            tier: MatchTier::Low,
        }
    }

    pub fn should_auto_confirm(&self) -> bool {
        self.tier == MatchTier::High
    }

    pub fn should_suggest(&self) -> bool {
        self.confidence >= MEDIUM_TIER_MIN_CONFIDENCE
    }
}

/// A rectangle in percentage-of-image units (0–100 on both axes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TagRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl TagRect {
    /// Smallest rectangle spanning two corner points, in either drag direction.
    pub fn from_corners(a: (f64, f64), b: (f64, f64)) -> Self {
        let (x1, x2) = (a.0.min(b.0), a.0.max(b.0));
        let (y1, y2) = (a.1.min(b.1), a.1.max(b.1));
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// Intersection-over-union with another rectangle.
    pub fn iou(&self, other: &TagRect) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.width * self.height + other.width * other.height - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Whether the rectangle can be stored: positive size, inside the image.
    pub fn is_storable(&self) -> bool {
        const EPS: f64 = 1e-6;
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.width > 0.0
            && self.height > 0.0
            && self.x >= -EPS
            && self.y >= -EPS
            && self.x + self.width <= 100.0 + EPS
            && self.y + self.height <= 100.0 + EPS
    }
}

/// A face tag on a photo, as owned by the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceTag {
    pub id: TagId,
    pub photo_ref: String,
    #[serde(flatten)]
    pub rect: TagRect,
    pub confidence: f64,
    pub is_manual: bool,
    #[serde(rename = "personId")]
    pub identity_id: Option<IdentityId>,
    #[serde(rename = "personName")]
    pub identity_name: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
}

/// A named person as stored, with its reference descriptors still serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub id: IdentityId,
    pub name: String,
    pub reference_descriptors: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
}
