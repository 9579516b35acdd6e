//! Nearest-neighbor identity matching over face descriptors.

use crate::descriptors;
use crate::types::{
    DetectedFace, FaceDescriptor, IdentityId, IdentityRecord, MatchResult, MatchTier,
};

/// Largest Euclidean distance still counted as the same person.
pub const MATCH_DISTANCE_THRESHOLD: f32 = 0.45;

/// One reference descriptor belonging to an identity.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub identity_id: IdentityId,
    pub descriptor: FaceDescriptor,
}

/// Snapshot of known identities' reference descriptors.
///
/// Iteration order is the caller's; ties between equally distant entries
/// resolve to the first one.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self { entries }
    }

    /// Flatten stored identities into roster entries.
    ///
    /// Identities without descriptors contribute nothing; malformed stored
    /// text is logged and skipped.
    pub fn from_identities(identities: &[IdentityRecord]) -> Self {
        let mut entries = Vec::new();
        for identity in identities {
            let Some(text) = identity.reference_descriptors.as_deref() else {
                continue;
            };
            match descriptors::deserialize(text) {
                Ok(list) => entries.extend(list.into_iter().map(|descriptor| RosterEntry {
                    identity_id: identity.id,
                    descriptor,
                })),
                Err(e) => tracing::warn!(
                    identity = identity.id,
                    error = %e,
                    "skipping identity with malformed reference descriptors"
                ),
            }
        }
        Self { entries }
    }

    pub fn push(&mut self, identity_id: IdentityId, descriptor: FaceDescriptor) {
        self.entries.push(RosterEntry {
            identity_id,
            descriptor,
        });
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strategy for classifying a candidate descriptor against a roster.
pub trait Matcher {
    fn best_match(&self, candidate: &FaceDescriptor, roster: &Roster) -> MatchResult;
}

/// Euclidean nearest-neighbor matcher.
///
/// Scans every roster entry once and keeps the closest.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(MATCH_DISTANCE_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn best_match(&self, candidate: &FaceDescriptor, roster: &Roster) -> MatchResult {
        let mut best: Option<(IdentityId, f32)> = None;

        for entry in roster.entries() {
            if entry.descriptor.dimension() != candidate.dimension() {
                tracing::warn!(
                    identity = entry.identity_id,
                    expected = candidate.dimension(),
                    found = entry.descriptor.dimension(),
                    "skipping roster entry with mismatched dimension"
                );
                continue;
            }
            let distance = candidate.distance(&entry.descriptor);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((entry.identity_id, distance));
            }
        }

        let Some((identity_id, distance)) = best else {
            return MatchResult::no_match();
        };

        let confidence = (1.0 - distance).clamp(0.0, 1.0);
        MatchResult {
            identity_id: Some(identity_id),
            confidence,
            distance,
            is_match: distance <= self.threshold,
            tier: MatchTier::from_confidence(confidence),
        }
    }
}

/// What the viewer should do with one detected face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceAction {
    /// High tier: tag the face with the matched identity without asking.
    AutoApply,
    /// Medium tier: offer the matched identity to the user.
    Suggest,
    Ignore,
}

impl FaceAction {
    pub fn for_result(result: &MatchResult) -> Self {
        if result.identity_id.is_none() {
            FaceAction::Ignore
        } else if result.should_auto_confirm() {
            FaceAction::AutoApply
        } else if result.should_suggest() {
            FaceAction::Suggest
        } else {
            FaceAction::Ignore
        }
    }
}

/// Match every face independently against the same roster snapshot.
///
/// Two faces may resolve to the same identity.
pub fn plan_face_actions<M: Matcher + ?Sized>(
    matcher: &M,
    faces: &[DetectedFace],
    roster: &Roster,
) -> Vec<(MatchResult, FaceAction)> {
    faces
        .iter()
        .map(|face| {
            let result = matcher.best_match(&face.descriptor, roster);
            let action = FaceAction::for_result(&result);
            (result, action)
        })
        .collect()
}
