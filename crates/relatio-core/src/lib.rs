pub mod envelope;
pub mod matcher;
pub mod merger;
pub mod normalize;
pub mod pages;
pub mod reference;
pub mod scorer;
pub mod source;
pub mod validate;

pub use envelope::{
    AdjudicationStatus, Envelope, PageCoverage, ProcessingMetadata, Stage, StageRecord,
    StageStatus, SummaryStatistics, ValidationStatus,
};
pub use matcher::{MatchConfig, is_match};
pub use merger::{MergeOutcome, MergeStats, dedupe, merge};
pub use reference::{
    CandidateReference, CanonicalReference, DocumentType, ExtractedReference, ExtractionSource,
    Reference, RelationshipType, SourceDocument, Track, TrackSet,
};
pub use scorer::{ConfidenceTier, finalize};
pub use source::detect_source_document;
pub use validate::{ValidationError, parse_adjudicated, parse_track_output};
