//! facetag-core — Face identification primitives for a photo library.
//!
//! Matches face descriptors against a roster of known identities, manages
//! each identity's rolling set of reference descriptors, and extracts
//! descriptors from photos using SCRFD detection and ArcFace recognition
//! via ONNX Runtime.

pub mod alignment;
pub mod analyzer;
pub mod descriptors;
pub mod detector;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use analyzer::{default_model_dir, AnalyzerConfig, AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use descriptors::{add_descriptor, deserialize, serialize, DescriptorError, MAX_REFERENCE_DESCRIPTORS};
pub use matcher::{plan_face_actions, EuclideanMatcher, FaceAction, Matcher, Roster, RosterEntry};
pub use types::{
    BoundingBox, DetectedFace, Detection, FaceDescriptor, FaceTag, IdentityId, IdentityRecord,
    MatchResult, MatchTier, TagId, TagRect,
};
