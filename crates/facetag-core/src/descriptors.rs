//! Rolling set of reference descriptors per identity.
//!
//! Identities keep their reference descriptors as text (a JSON array of
//! arrays of floats) in the metadata store. New samples are appended and the
//! oldest are evicted once the set holds [`MAX_REFERENCE_DESCRIPTORS`].

use crate::types::FaceDescriptor;
use thiserror::Error;

/// Upper bound on reference descriptors kept per identity.
pub const MAX_REFERENCE_DESCRIPTORS: usize = 10;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("descriptor is empty")]
    Empty,
    #[error("descriptor has a non-finite value at index {index}")]
    NonFinite { index: usize },
    #[error("descriptor {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("malformed descriptor list: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode descriptors as a JSON array of arrays.
pub fn serialize(descriptors: &[FaceDescriptor]) -> Result<String, DescriptorError> {
    Ok(serde_json::to_string(descriptors)?)
}

/// Decode a JSON array of arrays into descriptors of one shared dimension.
pub fn deserialize(text: &str) -> Result<Vec<FaceDescriptor>, DescriptorError> {
    let descriptors: Vec<FaceDescriptor> = serde_json::from_str(text)?;
    if let Some(first) = descriptors.first() {
        let expected = first.dimension();
        if let Some((index, d)) = descriptors
            .iter()
            .enumerate()
            .find(|(_, d)| d.dimension() != expected)
        {
            return Err(DescriptorError::DimensionMismatch {
                index,
                expected,
                found: d.dimension(),
            });
        }
    }
    Ok(descriptors)
}

/// Append `new` to the stored set and keep only the most recent samples.
///
/// Absent or malformed `existing` text starts a fresh set. Stored samples of
/// a different dimension than `new` (an older embedding model) are dropped.
pub fn add_descriptor(
    existing: Option<&str>,
    new: &FaceDescriptor,
) -> Result<String, DescriptorError> {
    let mut descriptors = match existing.map(str::trim).filter(|s| !s.is_empty()) {
        None => Vec::new(),
        Some(text) => deserialize(text).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "discarding malformed stored descriptors");
            Vec::new()
        }),
    };

    let before = descriptors.len();
    descriptors.retain(|d| d.dimension() == new.dimension());
    if descriptors.len() != before {
        tracing::warn!(
            dropped = before - descriptors.len(),
            dimension = new.dimension(),
            "dropping stored descriptors with a different dimension"
        );
    }

    descriptors.push(new.clone());
    if descriptors.len() > MAX_REFERENCE_DESCRIPTORS {
        let excess = descriptors.len() - MAX_REFERENCE_DESCRIPTORS;
        descriptors.drain(..excess);
    }

    serialize(&descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(values: &[f32]) -> FaceDescriptor {
        FaceDescriptor::new(values.to_vec()).unwrap()
    }

    #[test]
    fn test_round_trip_text() {
        let text = "[[0.1,0.2,0.3],[-1.0,0.5,0.25]]";
        let list = deserialize(text).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(serialize(&list).unwrap(), text);
    }

    #[test]
    fn test_round_trip_values() {
        let list = vec![d(&[0.125, -0.5]), d(&[0.75, 3.0])];
        let text = serialize(&list).unwrap();
        assert_eq!(deserialize(&text).unwrap(), list);
        assert_eq!(serialize(&deserialize(&text).unwrap()).unwrap(), text);
    }

    #[test]
    fn test_deserialize_empty_list() {
        assert!(deserialize("[]").unwrap().is_empty());
    }

    #[test]
    fn test_deserialize_rejects_bad_input() {
        assert!(matches!(deserialize("not json"), Err(DescriptorError::Malformed(_))));
        assert!(matches!(deserialize("[[]]"), Err(DescriptorError::Malformed(_))));
        assert!(matches!(deserialize("[1.0, 2.0]"), Err(DescriptorError::Malformed(_))));
        assert!(matches!(
            deserialize("[[1.0,2.0],[1.0]]"),
            Err(DescriptorError::DimensionMismatch { index: 1, expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_add_to_absent_and_malformed() {
        let new = d(&[0.5, 0.5]);
        for existing in [None, Some(""), Some("{oops"), Some("[[1.0],[1.0,2.0]]")] {
            let text = add_descriptor(existing, &new).unwrap();
            assert_eq!(deserialize(&text).unwrap(), vec![new.clone()]);
        }
    }

    #[test]
    fn test_add_appends_in_order() {
        let first = add_descriptor(None, &d(&[1.0])).unwrap();
        let second = add_descriptor(Some(&first), &d(&[2.0])).unwrap();
        assert_eq!(deserialize(&second).unwrap(), vec![d(&[1.0]), d(&[2.0])]);
    }

    #[test]
    fn test_add_never_exceeds_bound_and_evicts_oldest() {
        let mut text: Option<String> = None;
        for i in 1..=11 {
            let next = add_descriptor(text.as_deref(), &d(&[i as f32])).unwrap();
            assert!(deserialize(&next).unwrap().len() <= MAX_REFERENCE_DESCRIPTORS);
            text = Some(next);
        }
        let list = deserialize(text.as_deref().unwrap()).unwrap();
        assert_eq!(list.len(), MAX_REFERENCE_DESCRIPTORS);
        assert!(!list.contains(&d(&[1.0])));
        assert_eq!(list.first(), Some(&d(&[2.0])));
    }

    #[test]
    fn test_twelve_additions_keep_three_through_twelve() {
        let mut text: Option<String> = None;
        for i in 1..=12 {
            text = Some(add_descriptor(text.as_deref(), &d(&[i as f32, 0.0])).unwrap());
        }
        let list = deserialize(text.as_deref().unwrap()).unwrap();
        let expected: Vec<FaceDescriptor> = (3..=12).map(|i| d(&[i as f32, 0.0])).collect();
        assert_eq!(list, expected);
    }

    #[test]
    fn test_add_drops_other_dimension() {
        let stored = serialize(&[d(&[1.0, 2.0]), d(&[3.0, 4.0])]).unwrap();
        let text = add_descriptor(Some(&stored), &d(&[9.0, 9.0, 9.0])).unwrap();
        assert_eq!(deserialize(&text).unwrap(), vec![d(&[9.0, 9.0, 9.0])]);
    }
}
