//! The persisted output aggregate: source metadata, references, statistics, run metadata.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::reference::{DocumentType, ExtractionSource, Reference, RelationshipType, SourceDocument};
use crate::scorer::ConfidenceTier;

pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Overall processing completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    /// Both tracks produced candidates.
    Completed,
    /// One extraction track failed; the other carried the run.
    Partial,
    /// Never written by a successful run; kept for schema compatibility.
    Failed,
}

/// What happened to the optional adjudication step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjudicationStatus {
    /// No adjudicator configured; the rule-based merge is final.
    NotRequested,
    /// The adjudicated merge passed validation and replaced the rule-based merge.
    Accepted,
    /// Adjudication failed, timed out, or returned invalid output; rule-based merge kept.
    Fallback,
}

/// Pipeline stages that record timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Conversion,
    TrackA,
    TrackB,
    Consensus,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversion => "CONVERSION",
            Self::TrackA => "TRACK_A",
            Self::TrackB => "TRACK_B",
            Self::Consensus => "CONSENSUS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Done,
    Failed,
}

/// Start/end record of one stage, kept regardless of outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    /// ISO 8601 timestamp string.
    pub started_at: String,
    /// ISO 8601 timestamp string.
    pub finished_at: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Pages on which at least one reference appears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCoverage {
    pub pages_with_references: Vec<u32>,
    pub total_pages_covered: usize,
    pub total_pages: u32,
}

/// Aggregated counts over the final reference list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub total_references_found: usize,
    pub by_document_type: BTreeMap<DocumentType, usize>,
    pub by_relationship_type: BTreeMap<RelationshipType, usize>,
    /// high (≥ 0.90), medium [0.70, 0.90), low (< 0.70)
    pub by_confidence_level: BTreeMap<ConfidenceTier, usize>,
    pub by_extraction_source: BTreeMap<ExtractionSource, usize>,
    pub page_coverage: PageCoverage,
}

impl SummaryStatistics {
    /// Count references per type, relationship, tier and source. Every variant is present.
    pub fn from_references(references: &[Reference], total_pages: u32) -> Self {
        let mut by_document_type: BTreeMap<_, _> =
            DocumentType::ALL.into_iter().map(|v| (v, 0)).collect();
        let mut by_relationship_type: BTreeMap<_, _> =
            RelationshipType::ALL.into_iter().map(|v| (v, 0)).collect();
        let mut by_confidence_level: BTreeMap<_, _> =
            ConfidenceTier::ALL.into_iter().map(|v| (v, 0)).collect();
        let mut by_extraction_source: BTreeMap<_, _> =
            ExtractionSource::ALL.into_iter().map(|v| (v, 0)).collect();
        let mut pages = BTreeSet::new();

        for r in references {
            *by_document_type.entry(r.reference.document_type).or_insert(0) += 1;
            *by_relationship_type
                .entry(r.reference.relationship_type)
                .or_insert(0) += 1;
            *by_confidence_level
                .entry(ConfidenceTier::from_score(r.confidence_score))
                .or_insert(0) += 1;
            *by_extraction_source.entry(r.extraction_source).or_insert(0) += 1;
            pages.extend(r.reference.page_numbers.iter().copied());
        }

        let pages_with_references: Vec<u32> = pages.into_iter().collect();
        Self {
            total_references_found: references.len(),
            by_document_type,
            by_relationship_type,
            by_confidence_level,
            by_extraction_source,
            page_coverage: PageCoverage {
                total_pages_covered: pages_with_references.len(),
                pages_with_references,
                total_pages,
            },
        }
    }
}

/// Metadata about pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub pipeline_version: String,
    /// Collaborator role → model or service name.
    pub models_used: BTreeMap<String, String>,
    pub processing_time_seconds: u64,
    pub stages: Vec<StageRecord>,
    pub track_a_references_found: usize,
    pub track_b_references_found: usize,
    /// Number of references in the final list.
    pub merged_count: usize,
    pub duplicates_removed: usize,
    pub conflicts_resolved: usize,
    pub self_references_filtered: usize,
    pub unresolved_candidates: usize,
    pub validation_status: ValidationStatus,
    pub adjudication: AdjudicationStatus,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Final output of one run. Built once, written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub source_document: SourceDocument,
    pub references: Vec<Reference>,
    pub summary_statistics: SummaryStatistics,
    pub processing_metadata: ProcessingMetadata,
}
