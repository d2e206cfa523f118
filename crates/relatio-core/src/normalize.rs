//! Identity-field normalisation used by the matcher.
//!
//! Two extraction tracks rarely agree on surface form: one writes
//! `SEBI/HO/MIRSD/2023/105`, the other `sebi/ho/mirsd/2023/105.`; one writes
//! `May 1, 2023`, the other `2023-05-01`. Everything here folds those
//! variations away so equality can be decided on the folded value.
//!
//! Empty input always normalises to `None`; absent values never compare equal.

use std::collections::BTreeSet;

use chrono::NaiveDate;

/// Date layouts accepted by [`parse_date`], tried in order after commas are removed.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%B %d %Y",
    "%d %B %Y",
];

/// Normalise a reference number: case-folded, ASCII alphanumerics only.
///
/// `"SEBI/HO/MIRSD/2023/105"` → `"sebihomirsd2023105"`
pub fn normalize_number(s: &str) -> Option<String> {
    let folded: String = s
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    (!folded.is_empty()).then_some(folded)
}

/// Normalise a title: case-folded, punctuation replaced by spaces, whitespace collapsed.
///
/// `"SEBI (Stock Brokers) Regulations,  1992"` → `"sebi stock brokers regulations 1992"`
pub fn normalize_title(s: &str) -> Option<String> {
    let spaced: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Token set of an already-normalised title.
pub fn title_tokens(normalized: &str) -> BTreeSet<String> {
    normalized.split(' ').map(str::to_string).collect()
}

/// Overlap ratio of two token sets: `|A ∩ B| / max(|A|, |B|)`.
///
/// Symmetric, 1.0 for identical sets, 0.0 when either set is empty.
pub fn token_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let larger = a.len().max(b.len());
    if larger == 0 {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    shared as f64 / larger as f64
}

/// Parse a date written in any of the layouts the tracks produce.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let cleaned = s.replace(',', " ");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
}

/// Normalise a date to a single calendar representation.
///
/// Parseable dates become `YYYY-MM-DD`; anything else falls back to its
/// folded text form so that two identical unparseable strings still agree.
pub fn normalize_date(s: &str) -> Option<String> {
    match parse_date(s) {
        Some(d) => Some(d.format("%Y-%m-%d").to_string()),
        None => normalize_title(s),
    }
}

/// Display form of a date for the output envelope: ISO when parseable, trimmed text otherwise.
pub fn canonical_date(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(match parse_date(trimmed) {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => trimmed.to_string(),
    })
}
