//! Reference types shared by the extraction tracks, the merger and the envelope.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of regulatory document being referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    SebiCircular,
    Act,
    Regulation,
    Guideline,
    Notification,
    Other,
}

impl DocumentType {
    pub const ALL: [Self; 6] = [
        Self::SebiCircular,
        Self::Act,
        Self::Regulation,
        Self::Guideline,
        Self::Notification,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SebiCircular => "SEBI_CIRCULAR",
            Self::Act => "ACT",
            Self::Regulation => "REGULATION",
            Self::Guideline => "GUIDELINE",
            Self::Notification => "NOTIFICATION",
            Self::Other => "OTHER",
        }
    }
}

/// How the source circular relates to the referenced document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Replaces the referenced document entirely.
    Supersedes,
    /// Modifies specific parts of the referenced document.
    Amends,
    /// Cancels the referenced document.
    Repeals,
    /// General reference without modification.
    RefersTo,
    /// Provides additional explanation.
    Clarifies,
    /// Based on, or authorised by, the referenced document.
    DerivesFrom,
}

impl RelationshipType {
    pub const ALL: [Self; 6] = [
        Self::Supersedes,
        Self::Amends,
        Self::Repeals,
        Self::RefersTo,
        Self::Clarifies,
        Self::DerivesFrom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supersedes => "SUPERSEDES",
            Self::Amends => "AMENDS",
            Self::Repeals => "REPEALS",
            Self::RefersTo => "REFERS_TO",
            Self::Clarifies => "CLARIFIES",
            Self::DerivesFrom => "DERIVES_FROM",
        }
    }
}

/// Error returned when a string is not one of the fixed enumeration values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// Fold free-form labels like "sebi circular" or "refers-to" into `SEBI_CIRCULAR` / `REFERS_TO`.
fn fold_label(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

impl FromStr for DocumentType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded = fold_label(s);
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == folded)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

impl FromStr for RelationshipType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded = fold_label(s);
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == folded)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// One of the two independent extraction passes over the same document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Track {
    #[serde(rename = "TRACK_A")]
    A,
    #[serde(rename = "TRACK_B")]
    B,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "TRACK_A",
            Self::B => "TRACK_B",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tracks corroborated a canonical reference. Derived, never hand-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractionSource {
    TrackA,
    TrackB,
    Both,
}

impl ExtractionSource {
    pub const ALL: [Self; 3] = [Self::TrackA, Self::TrackB, Self::Both];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrackA => "TRACK_A",
            Self::TrackB => "TRACK_B",
            Self::Both => "BOTH",
        }
    }

    pub fn contains(&self, track: Track) -> bool {
        matches!(
            (self, track),
            (Self::Both, _) | (Self::TrackA, Track::A) | (Self::TrackB, Track::B)
        )
    }
}

impl From<Track> for ExtractionSource {
    fn from(track: Track) -> Self {
        match track {
            Track::A => Self::TrackA,
            Track::B => Self::TrackB,
        }
    }
}

/// Set of tracks contributing to a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackSet {
    pub a: bool,
    pub b: bool,
}

impl TrackSet {
    pub fn insert(&mut self, track: Track) {
        match track {
            Track::A => self.a = true,
            Track::B => self.b = true,
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            a: self.a || other.a,
            b: self.b || other.b,
        }
    }

    /// `None` for the empty set.
    pub fn source(self) -> Option<ExtractionSource> {
        match (self.a, self.b) {
            (true, true) => Some(ExtractionSource::Both),
            (true, false) => Some(ExtractionSource::TrackA),
            (false, true) => Some(ExtractionSource::TrackB),
            (false, false) => None,
        }
    }
}

impl From<Track> for TrackSet {
    fn from(track: Track) -> Self {
        let mut set = Self::default();
        set.insert(track);
        set
    }
}

impl From<ExtractionSource> for TrackSet {
    fn from(source: ExtractionSource) -> Self {
        Self {
            a: source.contains(Track::A),
            b: source.contains(Track::B),
        }
    }
}

/// The fields an extraction track emits for a single regulatory relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedReference {
    pub referenced_document_title: String,
    pub referenced_sebi_number: Option<String>,
    /// `YYYY-MM-DD` when the track's date could be parsed, otherwise the raw text.
    pub referenced_date: Option<String>,
    pub document_type: DocumentType,
    pub relationship_type: RelationshipType,
    /// Ascending, deduplicated, positive.
    pub page_numbers: Vec<u32>,
    pub exact_citation_text: String,
    pub context_paragraph: String,
    pub section_location: String,
}

impl ExtractedReference {
    /// A bare reference carrying only identity and classification.
    pub fn new(
        title: impl Into<String>,
        document_type: DocumentType,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            referenced_document_title: title.into(),
            referenced_sebi_number: None,
            referenced_date: None,
            document_type,
            relationship_type,
            page_numbers: Vec::new(),
            exact_citation_text: String::new(),
            context_paragraph: String::new(),
            section_location: String::new(),
        }
    }

    /// Short label for log lines and warnings.
    pub fn label(&self) -> &str {
        match self.referenced_sebi_number.as_deref() {
            Some(n) if !n.trim().is_empty() => n,
            _ => &self.referenced_document_title,
        }
    }
}

/// A reference as emitted by exactly one track. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReference {
    pub track: Track,
    #[serde(flatten)]
    pub reference: ExtractedReference,
}

impl CandidateReference {
    pub fn new(track: Track, reference: ExtractedReference) -> Self {
        Self { track, reference }
    }
}

/// A merged reference before scoring and id assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalReference {
    pub reference: ExtractedReference,
    pub extraction_source: ExtractionSource,
}

/// The final, merged, confidence-scored reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Sequential (`REF001`, `REF002`, ...) in output order; stable within one run only.
    #[serde(alias = "reference_id")]
    pub id: String,
    #[serde(flatten)]
    pub reference: ExtractedReference,
    pub confidence_score: f64,
    pub extraction_source: ExtractionSource,
}

/// Metadata about the source circular being processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub filename: String,
    pub circular_title: String,
    pub sebi_reference_number: Option<String>,
    /// `YYYY-MM-DD`.
    pub date_issued: Option<String>,
    pub total_pages: u32,
    /// ISO 8601 timestamp string (UTC).
    pub processing_timestamp: String,
}
