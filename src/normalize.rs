use serde::{Deserialize, Serialize};

use crate::ImageId;

/// Calibration factor for the engine's native distance metric. Changing
/// it changes every score handed out, so it stays fixed.
pub const SCORE_NORMALIZATION_FACTOR: f64 = 38.70;

/// A single query hit on the public 0-100 scale, where larger is more
/// similar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// The matched image.
    pub id: ImageId,
    /// Similarity in `[0.0, 100.0]`.
    pub score: f64,
}

/// Converts raw engine results, ordered from least to most similar, into
/// `Match`es ordered from most to least similar.
///
/// The first returned item is always the best match.
pub fn normalize_results(raw: &[(ImageId, f64)]) -> Vec<Match> {
    raw.iter()
        .rev()
        .map(|&(id, raw_score)| Match { id, score: normalize_score(raw_score) })
        .collect()
}

/// Maps a single raw (smaller is more similar) distance onto `[0, 100]`.
pub fn normalize_score(raw_score: f64) -> f64 {
    let score = -100.0 * raw_score / SCORE_NORMALIZATION_FACTOR;
    // NaN compares false on both sides and floors to 0.0
    if score > 100.0 {
        100.0
    } else if score > 0.0 {
        score
    } else {
        0.0
    }
}
