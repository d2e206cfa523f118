//! Parsing of untrusted collaborator output.
//!
//! Track output is parsed leniently: field aliases are accepted, unknown enum
//! values are coerced and junk pages dropped. Adjudication output replaces the
//! rule-based merge wholesale, so it is held to the exact reference schema and
//! any deviation is an error.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::normalize::canonical_date;
use crate::reference::{
    CandidateReference, CanonicalReference, DocumentType, ExtractedReference, ExtractionSource,
    RelationshipType, Track, TrackSet,
};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no JSON payload found in output")]
    NoPayload,

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON array of references or an object with a `references` array")]
    NotAList,

    #[error("reference [{index}]: {source}")]
    Item {
        index: usize,
        source: serde_json::Error,
    },

    #[error("reference [{index}]: page number {page} is not positive")]
    InvalidPage { index: usize, page: u32 },

    #[error("reference [{index}]: claims {track} which produced no candidates")]
    UnsupportedTrack { index: usize, track: Track },

    #[error("{returned} references returned for {candidates} candidates")]
    TooManyReferences { returned: usize, candidates: usize },
}

/// A fenced code block, as chat models like to wrap JSON in.
static FENCED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("FENCED_RE should compile")
});

/// Isolate the JSON document inside collaborator output.
fn json_payload(text: &str) -> Result<&str, ValidationError> {
    let text = match FENCED_RE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text,
    };
    let start = text
        .find(['[', '{'])
        .ok_or(ValidationError::NoPayload)?;
    Ok(text[start..].trim_end())
}

/// The first JSON value in `payload`. Anything after it is ignored.
fn first_value(payload: &str) -> Result<Value, serde_json::Error> {
    let mut values = serde_json::Deserializer::from_str(payload).into_iter::<Value>();
    match values.next() {
        Some(value) => value,
        None => serde_json::from_str(payload),
    }
}

/// Close a truncated document right after its last complete nested value.
///
/// Returns `None` when nothing inside the document ever closed, or when the
/// document is already balanced.
fn repair_truncated(payload: &str) -> Option<String> {
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut cut: Option<(usize, Vec<char>)> = None;

    for (i, c) in payload.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => open.push(c),
            '}' | ']' => {
                open.pop()?;
                if open.is_empty() {
                    return None;
                }
                cut = Some((i + 1, open.clone()));
            }
            _ => {}
        }
    }

    let (end, still_open) = cut?;
    let mut repaired = payload[..end].to_string();
    for c in still_open.iter().rev() {
        repaired.push(if *c == '{' { '}' } else { ']' });
    }
    Some(repaired)
}

const LIST_KEYS: [&str; 2] = ["references", "merged_references"];

/// Keys that mark a bare object as a single reference rather than a wrapper.
const IDENTITY_KEYS: [&str; 5] = [
    "referenced_document_title",
    "title",
    "referenced_sebi_number",
    "sebi_number",
    "reference_number",
];

/// The reference array: either the document itself or one of the wrapping keys.
fn reference_list(value: Value) -> Result<Vec<Value>, ValidationError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => LIST_KEYS
            .into_iter()
            .find_map(|key| match map.remove(key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or(ValidationError::NotAList),
        _ => Err(ValidationError::NotAList),
    }
}

/// Loosely-typed track item; anything can be missing or mistyped.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawReference {
    #[serde(alias = "title")]
    referenced_document_title: Option<Value>,
    #[serde(alias = "sebi_number", alias = "reference_number")]
    referenced_sebi_number: Option<Value>,
    #[serde(alias = "date")]
    referenced_date: Option<Value>,
    #[serde(alias = "type")]
    document_type: Option<Value>,
    #[serde(alias = "relationship")]
    relationship_type: Option<Value>,
    #[serde(alias = "pages", alias = "page")]
    page_numbers: Option<Value>,
    #[serde(alias = "cite", alias = "text", alias = "citation")]
    exact_citation_text: Option<Value>,
    #[serde(alias = "context")]
    context_paragraph: Option<Value>,
    #[serde(alias = "location", alias = "section")]
    section_location: Option<Value>,
}

fn text(value: Option<Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn page(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u32::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|&p| p > 0)
}

fn pages(value: Option<Value>) -> Vec<u32> {
    let mut pages: Vec<u32> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(page).collect(),
        Some(v) => page(&v).into_iter().collect(),
        None => Vec::new(),
    };
    pages.sort_unstable();
    pages.dedup();
    pages
}

impl RawReference {
    fn into_reference(self) -> ExtractedReference {
        let document_type = text(self.document_type)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DocumentType::Other);
        let relationship_type = text(self.relationship_type)
            .and_then(|s| s.parse().ok())
            .unwrap_or(RelationshipType::RefersTo);

        ExtractedReference {
            referenced_document_title: text(self.referenced_document_title).unwrap_or_default(),
            referenced_sebi_number: text(self.referenced_sebi_number),
            referenced_date: text(self.referenced_date).and_then(|d| canonical_date(&d)),
            document_type,
            relationship_type,
            page_numbers: pages(self.page_numbers),
            exact_citation_text: text(self.exact_citation_text).unwrap_or_default(),
            context_paragraph: text(self.context_paragraph).unwrap_or_default(),
            section_location: text(self.section_location).unwrap_or_default(),
        }
    }
}

/// Parse one track's raw output into candidates tagged with that track.
///
/// Items that are not JSON objects are skipped with a warning; only a missing
/// or malformed top-level document is an error.
pub fn parse_track_output(track: Track, output: &str) -> Result<Vec<CandidateReference>, ValidationError> {
    let payload = json_payload(output)?;
    let value = match first_value(payload) {
        Ok(value) => value,
        Err(e) => {
            let repaired = repair_truncated(payload).ok_or(e)?;
            warn!(%track, "track output was truncated; keeping its complete items");
            first_value(&repaired)?
        }
    };
    let items = match value {
        Value::Object(map)
            if !LIST_KEYS.iter().any(|k| map.contains_key(*k))
                && IDENTITY_KEYS.iter().any(|k| map.contains_key(*k)) =>
        {
            vec![Value::Object(map)]
        }
        value => reference_list(value)?,
    };

    let mut candidates = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<RawReference>(item) {
            Ok(raw) => candidates.push(CandidateReference::new(track, raw.into_reference())),
            Err(e) => warn!(%track, index, error = %e, "skipping unreadable track item"),
        }
    }
    Ok(candidates)
}

/// Exact reference schema expected back from adjudication.
#[derive(Debug, Deserialize)]
struct AdjudicatedReference {
    referenced_document_title: String,
    referenced_sebi_number: Option<String>,
    referenced_date: Option<String>,
    document_type: DocumentType,
    relationship_type: RelationshipType,
    page_numbers: Vec<u32>,
    exact_citation_text: String,
    context_paragraph: String,
    section_location: String,
    extraction_source: ExtractionSource,
}

/// Validate an adjudicated merge against the reference schema.
///
/// `produced` is the set of tracks that actually yielded candidates and
/// `candidates` their combined count; a merge cannot claim a silent track or
/// invent more references than it was given.
pub fn parse_adjudicated(
    output: &str,
    produced: TrackSet,
    candidates: usize,
) -> Result<Vec<CanonicalReference>, ValidationError> {
    let value: Value = serde_json::from_str(json_payload(output)?)?;
    let items = reference_list(value)?;

    if items.len() > candidates {
        return Err(ValidationError::TooManyReferences {
            returned: items.len(),
            candidates,
        });
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let r: AdjudicatedReference =
                serde_json::from_value(item).map_err(|source| ValidationError::Item { index, source })?;

            if let Some(&page) = r.page_numbers.iter().find(|&&p| p == 0) {
                return Err(ValidationError::InvalidPage { index, page });
            }
            for track in [Track::A, Track::B] {
                let claimed = r.extraction_source.contains(track);
                let present = TrackSet::from(track).union(produced) == produced;
                if claimed && !present {
                    return Err(ValidationError::UnsupportedTrack { index, track });
                }
            }

            let mut page_numbers = r.page_numbers;
            page_numbers.sort_unstable();
            page_numbers.dedup();

            Ok(CanonicalReference {
                reference: ExtractedReference {
                    referenced_document_title: r.referenced_document_title.trim().to_string(),
                    referenced_sebi_number: r
                        .referenced_sebi_number
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty()),
                    referenced_date: r.referenced_date.and_then(|d| canonical_date(&d)),
                    document_type: r.document_type,
                    relationship_type: r.relationship_type,
                    page_numbers,
                    exact_citation_text: r.exact_citation_text,
                    context_paragraph: r.context_paragraph,
                    section_location: r.section_location,
                },
                extraction_source: r.extraction_source,
            })
        })
        .collect()
}
