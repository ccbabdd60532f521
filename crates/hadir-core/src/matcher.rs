//! Nearest-reference matching by Euclidean distance.

use crate::face_db::ReferenceSet;
use crate::types::{BoundingBox, Detection, Embedding, IdentityId, MatchResult};

/// Maximum distance for a positive match unless configured otherwise.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a live embedding against the reference set.
pub trait Matcher {
    fn compare(&self, live: &Embedding, references: &ReferenceSet, threshold: f32) -> MatchResult;
}

/// Which identity wins when several sit at exactly the minimum distance.
///
/// Neither choice carries meaning; it only has to be stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// Keep the first identity reached in reference-set order.
    #[default]
    FirstEncountered,
    /// Let later identities replace an equal earlier one.
    LastEncountered,
}

impl TieBreak {
    fn replaces(self, candidate: f32, best: f32) -> bool {
        match self {
            TieBreak::FirstEncountered => candidate < best,
            TieBreak::LastEncountered => candidate <= best,
        }
    }
}

/// Which face of a multi-face frame is forwarded to the matcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaceSelection {
    /// The first face in detector output order.
    #[default]
    FirstDetected,
    /// The face with the largest bounding region; earlier wins on equal area.
    LargestRegion,
}

impl FaceSelection {
    /// Index of the chosen face in detector output order.
    pub fn select_index(&self, faces: &[BoundingBox]) -> Option<usize> {
        match self {
            FaceSelection::FirstDetected => (!faces.is_empty()).then_some(0),
            FaceSelection::LargestRegion => faces
                .iter()
                .enumerate()
                .fold(None, |best: Option<(usize, f32)>, (i, f)| match best {
                    Some((_, area)) if area >= f.area() => best,
                    _ => Some((i, f.area())),
                })
                .map(|(i, _)| i),
        }
    }
}

/// Euclidean nearest-neighbour matcher.
///
/// Visits every reference embedding; an identity with several embeddings is
/// scored by its closest one.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher {
    pub tie_break: TieBreak,
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, live: &Embedding, references: &ReferenceSet, threshold: f32) -> MatchResult {
        let mut best: Option<(IdentityId, f32)> = None;

        for entry in references.entries() {
            for reference in &entry.embeddings {
                let distance = live.euclidean_distance(reference);
                let better = match best {
                    None => true,
                    Some((_, best_distance)) => self.tie_break.replaces(distance, best_distance),
                };
                if better {
                    best = Some((entry.id, distance));
                }
            }
        }

        match best {
            Some((identity_id, distance)) if distance <= threshold => {
                MatchResult::Matched { identity_id, distance }
            }
            Some((_, distance)) => MatchResult::Unmatched { best_distance: distance },
            None => MatchResult::Unmatched { best_distance: f32::INFINITY },
        }
    }
}

/// Match the outcome of one sampled frame.
///
/// `None` (no face in the frame) short-circuits to `NoFaceDetected`.
pub fn match_detection<M: Matcher>(
    matcher: &M,
    detection: Option<&Detection>,
    references: &ReferenceSet,
    threshold: f32,
) -> MatchResult {
    match detection {
        Some(face) => matcher.compare(&face.embedding, references, threshold),
        None => MatchResult::NoFaceDetected,
    }
}
