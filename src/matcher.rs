use ndarray::ArrayView1;
use serde::Serialize;

use crate::{storage::Gallery, Embedding};

/// Outcome of identifying a probe against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchResult {
    /// Nothing enrolled, matching cannot proceed
    NoGalleryData,
    /// The probe yielded no face embedding
    NoFaceDetected,
    Match { identity: String, distance: f32 },
    /// Closest entry was at or beyond the threshold
    Unknown { distance: f32 },
}

impl MatchResult {
    pub fn identity(&self) -> Option<&str> {
        match self {
            MatchResult::Match { identity, .. } => Some(identity.as_str()),
            _ => None,
        }
    }
}

/// Closest gallery entry by Euclidean distance. Ties go to the earlier entry.
pub fn nearest<'g>(gallery: &'g Gallery, probe: &Embedding) -> Option<(&'g str, f32)> {
    gallery
        .iter()
        .map(|(identity, e)| (identity, probe.distance_to(ArrayView1::from(e))))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Linear scan of the gallery. Only the first probe embedding is considered.
pub fn identify(gallery: &Gallery, probes: &[Embedding], threshold: f32) -> MatchResult {
    if gallery.is_empty() {
        return MatchResult::NoGalleryData;
    }
    let Some(probe) = probes.first() else {
        return MatchResult::NoFaceDetected;
    };

    match nearest(gallery, probe) {
        Some((identity, distance)) if distance < threshold => MatchResult::Match {
            identity: identity.to_string(),
            distance,
        },
        Some((_, distance)) => MatchResult::Unknown { distance },
        None => MatchResult::NoGalleryData,
    }
}
