//! Deterministic confidence scoring.
//!
//! Scores are computed in whole hundredths so that tier boundaries are exact:
//!
//! | extraction_source | base | per signal | cap |
//! |---|---|---|---|
//! | `BOTH` | 0.90 | +0.01 | 1.00 |
//! | `TRACK_A` / `TRACK_B` | 0.70 | +0.01 | 0.89 |
//!
//! Signals: non-empty citation text, resolved date, non-empty page list.
//! Single-track evidence never reaches the high tier.

use serde::{Deserialize, Serialize};

use crate::reference::{CanonicalReference, ExtractedReference, ExtractionSource, Reference};

const CORROBORATED_BASE: u32 = 90;
const SINGLE_TRACK_BASE: u32 = 70;
const SIGNAL_BONUS: u32 = 1;
const CORROBORATED_CAP: u32 = 100;
const SINGLE_TRACK_CAP: u32 = 89;

/// Review tier derived from a confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    /// ≥ 0.90
    High,
    /// [0.70, 0.90)
    Medium,
    /// < 0.70
    Low,
}

impl ConfidenceTier {
    pub const ALL: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    pub fn from_score(score: f64) -> Self {
        if score >= 0.90 {
            Self::High
        } else if score >= 0.70 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Number of corroborating signals present on a reference.
pub fn signals(reference: &ExtractedReference) -> u32 {
    let cited = !reference.exact_citation_text.trim().is_empty();
    let dated = reference
        .referenced_date
        .as_deref()
        .is_some_and(|d| !d.trim().is_empty());
    let paged = !reference.page_numbers.is_empty();
    [cited, dated, paged].into_iter().filter(|&s| s).count() as u32
}

/// Confidence for a canonical reference given the tracks that corroborated it.
pub fn score(reference: &ExtractedReference, source: ExtractionSource) -> f64 {
    let bonus = signals(reference) * SIGNAL_BONUS;
    let hundredths = match source {
        ExtractionSource::Both => (CORROBORATED_BASE + bonus).min(CORROBORATED_CAP),
        ExtractionSource::TrackA | ExtractionSource::TrackB => {
            (SINGLE_TRACK_BASE + bonus).min(SINGLE_TRACK_CAP)
        }
    };
    f64::from(hundredths) / 100.0
}

/// Format a sequential reference id: `REF001`, `REF002`, ...
pub fn reference_id(ordinal: usize) -> String {
    format!("REF{ordinal:03}")
}

/// Score every canonical reference and assign ids in output order.
pub fn finalize(canonical: Vec<CanonicalReference>) -> Vec<Reference> {
    canonical
        .into_iter()
        .enumerate()
        .map(|(i, c)| Reference {
            id: reference_id(i + 1),
            confidence_score: score(&c.reference, c.extraction_source),
            extraction_source: c.extraction_source,
            reference: c.reference,
        })
        .collect()
}
