//! Pairwise "same relationship" decision between two references.
//!
//! The matcher is symmetric but deliberately not transitive; the merger's
//! clustering decides how chains of matches collapse.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::normalize::{normalize_date, normalize_number, normalize_title, title_tokens, token_overlap};
use crate::reference::{ExtractedReference, RelationshipType, SourceDocument};

/// Tunable matcher thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Minimum title token-overlap ratio for a fuzzy title match.
    pub title_overlap_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            title_overlap_threshold: 0.8,
        }
    }
}

/// Normalised identity fields of one reference (or of the source document).
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub number: Option<String>,
    pub title: Option<String>,
    pub tokens: BTreeSet<String>,
    pub date: Option<String>,
    pub relationship: Option<RelationshipType>,
}

impl Identity {
    pub fn of(reference: &ExtractedReference) -> Self {
        Self::build(
            reference.referenced_sebi_number.as_deref(),
            &reference.referenced_document_title,
            reference.referenced_date.as_deref(),
            Some(reference.relationship_type),
        )
    }

    /// Identity of the source document itself, used for self-reference exclusion.
    pub fn of_source(source: &SourceDocument) -> Self {
        Self::build(
            source.sebi_reference_number.as_deref(),
            &source.circular_title,
            source.date_issued.as_deref(),
            None,
        )
    }

    fn build(
        number: Option<&str>,
        title: &str,
        date: Option<&str>,
        relationship: Option<RelationshipType>,
    ) -> Self {
        let title = normalize_title(title);
        let tokens = title.as_deref().map(title_tokens).unwrap_or_default();
        Self {
            number: number.and_then(normalize_number),
            title,
            tokens,
            date: date.and_then(normalize_date),
            relationship,
        }
    }

    /// A reference with neither a number nor a title cannot be identified.
    pub fn is_resolvable(&self) -> bool {
        self.number.is_some() || self.title.is_some()
    }

    /// Apply the matching rules in order, short-circuiting on the first hit.
    pub fn matches(&self, other: &Self, config: &MatchConfig) -> bool {
        // 1. Same reference number.
        if let (Some(a), Some(b)) = (&self.number, &other.number)
            && a == b
        {
            return true;
        }

        let (Some(ta), Some(tb)) = (&self.title, &other.title) else {
            return false;
        };

        // 2. Same title and same relationship.
        if ta == tb
            && let (Some(ra), Some(rb)) = (self.relationship, other.relationship)
            && ra == rb
        {
            return true;
        }

        // 3. Similar title and same date, or neither dated.
        self.dates_agree(other) && self.title_similar(other, config)
    }

    /// Whether this reference points back at the source document.
    ///
    /// When both sides carry a reference number the numbers decide on their own:
    /// a master circular citing its predecessor of the same title is not a
    /// self-reference. Otherwise the title rules apply, minus the relationship
    /// check which the source document does not have.
    pub fn is_self_reference(&self, source: &Self, config: &MatchConfig) -> bool {
        if let (Some(a), Some(b)) = (&self.number, &source.number) {
            return a == b;
        }
        let (Some(ta), Some(tb)) = (&self.title, &source.title) else {
            return false;
        };
        ta == tb || (self.dates_agree(source) && self.title_similar(source, config))
    }

    fn dates_agree(&self, other: &Self) -> bool {
        self.date == other.date
    }

    fn title_similar(&self, other: &Self, config: &MatchConfig) -> bool {
        token_overlap(&self.tokens, &other.tokens) >= config.title_overlap_threshold
    }
}

/// Decide whether two references describe the same relationship.
pub fn is_match(a: &ExtractedReference, b: &ExtractedReference, config: &MatchConfig) -> bool {
    Identity::of(a).matches(&Identity::of(b), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::DocumentType;
    use proptest::prelude::*;

    fn circular(title: &str, number: Option<&str>, rel: RelationshipType) -> ExtractedReference {
        let mut r = ExtractedReference::new(title, DocumentType::SebiCircular, rel);
        r.referenced_sebi_number = number.map(str::to_string);
        r
    }

    fn source(title: &str, number: Option<&str>, date: Option<&str>) -> SourceDocument {
        SourceDocument {
            filename: "circular.pdf".into(),
            circular_title: title.into(),
            sebi_reference_number: number.map(str::to_string),
            date_issued: date.map(str::to_string),
            total_pages: 4,
            processing_timestamp: "2026-01-21T06:30:00Z".into(),
        }
    }

    #[test]
    fn same_number_matches_regardless_of_title() {
        let cfg = MatchConfig::default();
        let a = circular("Circular on margin", Some("SEBI/HO/MIRSD/2023/105"), RelationshipType::Supersedes);
        let b = circular("", Some("sebi/ho/mirsd/2023/105"), RelationshipType::RefersTo);
        assert!(is_match(&a, &b, &cfg));
    }

    #[test]
    fn different_numbers_do_not_match_by_number() {
        let cfg = MatchConfig::default();
        let a = circular("", Some("SEBI/HO/MIRSD/2023/105"), RelationshipType::Supersedes);
        let b = circular("", Some("SEBI/HO/MIRSD/2023/106"), RelationshipType::Supersedes);
        assert!(!is_match(&a, &b, &cfg));
    }

    #[test]
    fn exact_title_requires_same_relationship() {
        let cfg = MatchConfig::default();
        let mut a = circular("SEBI Act, 1992", None, RelationshipType::DerivesFrom);
        let mut b = circular("SEBI Act 1992", None, RelationshipType::DerivesFrom);
        assert!(is_match(&a, &b, &cfg));

        // Different relationship, different dates: rules 2 and 3 both fail.
        b.relationship_type = RelationshipType::Amends;
        a.referenced_date = Some("1992-01-30".into());
        b.referenced_date = Some("1992-04-04".into());
        assert!(!is_match(&a, &b, &cfg));
    }

    #[test]
    fn similar_title_with_same_date_matches() {
        let cfg = MatchConfig::default();
        let mut a = circular("Circular on cyber security framework", None, RelationshipType::RefersTo);
        let mut b = circular("Circular cyber security framework", None, RelationshipType::Amends);
        a.referenced_date = Some("August 20, 2024".into());
        b.referenced_date = Some("2024-08-20".into());
        assert!(is_match(&a, &b, &cfg));

        b.referenced_date = Some("2024-08-21".into());
        assert!(!is_match(&a, &b, &cfg));
    }

    #[test]
    fn similar_title_both_undated_matches() {
        let cfg = MatchConfig::default();
        let a = circular("Circular on cyber security framework", None, RelationshipType::RefersTo);
        let b = circular("Circular cyber security framework", None, RelationshipType::Amends);
        assert!(is_match(&a, &b, &cfg));
    }

    #[test]
    fn similar_title_one_dated_does_not_match() {
        let cfg = MatchConfig::default();
        let mut a = circular("Circular on cyber security framework", None, RelationshipType::RefersTo);
        let b = circular("Circular cyber security framework", None, RelationshipType::Amends);
        a.referenced_date = Some("2024-08-20".into());
        assert!(!is_match(&a, &b, &cfg));
    }

    #[test]
    fn dissimilar_titles_do_not_match() {
        let cfg = MatchConfig::default();
        let a = circular("Framework for Alternative Investment Funds", None, RelationshipType::RefersTo);
        let b = circular("Guidelines on Portfolio Managers", None, RelationshipType::RefersTo);
        assert!(!is_match(&a, &b, &cfg));
    }

    #[test]
    fn absence_never_matches_absence() {
        let cfg = MatchConfig::default();
        let a = circular("", None, RelationshipType::RefersTo);
        let b = circular("", None, RelationshipType::RefersTo);
        assert!(!Identity::of(&a).is_resolvable());
        assert!(!is_match(&a, &b, &cfg));
    }

    #[test]
    fn threshold_is_tunable() {
        let strict = MatchConfig { title_overlap_threshold: 0.95 };
        let a = circular("Circular on cyber security framework", None, RelationshipType::RefersTo);
        let b = circular("Circular cyber security framework", None, RelationshipType::Amends);
        assert!(!is_match(&a, &b, &strict));
    }

    #[test]
    fn self_reference_by_number() {
        let cfg = MatchConfig::default();
        let src = Identity::of_source(&source("Review of framework", Some("SEBI/HO/MIRSD/2024/120"), None));
        let r = Identity::of(&circular("", Some("SEBI/HO/MIRSD/2024/120"), RelationshipType::RefersTo));
        assert!(r.is_self_reference(&src, &cfg));
    }

    #[test]
    fn same_title_different_number_is_not_self_reference() {
        let cfg = MatchConfig::default();
        let src = Identity::of_source(&source(
            "Master Circular for Portfolio Managers",
            Some("SEBI/HO/IMD/2024/120"),
            Some("2024-09-15"),
        ));
        let r = Identity::of(&circular(
            "Master Circular for Portfolio Managers",
            Some("SEBI/HO/IMD/2023/11"),
            RelationshipType::Supersedes,
        ));
        assert!(!r.is_self_reference(&src, &cfg));
    }

    #[test]
    fn self_reference_by_title_when_number_unknown() {
        let cfg = MatchConfig::default();
        let src = Identity::of_source(&source("Review of Framework for Stock Brokers", None, None));
        let r = Identity::of(&circular(
            "review of framework for stock brokers",
            Some("SEBI/HO/MIRSD/2024/120"),
            RelationshipType::RefersTo,
        ));
        assert!(r.is_self_reference(&src, &cfg));
    }

    fn arb_reference() -> impl Strategy<Value = ExtractedReference> {
        let number = proptest::option::of(prop_oneof![
            Just("SEBI/HO/MIRSD/2023/105".to_string()),
            Just("sebi/ho/mirsd/2023/105".to_string()),
            Just("SEBI/HO/CFD/2022/7".to_string()),
            Just("".to_string()),
        ]);
        let title = prop_oneof![
            Just("SEBI Act, 1992".to_string()),
            Just("SEBI Act 1992".to_string()),
            Just("Circular on cyber security framework".to_string()),
            Just("Circular cyber security framework".to_string()),
            Just("Master Circular for Mutual Funds".to_string()),
            Just("".to_string()),
        ];
        let date = proptest::option::of(prop_oneof![
            Just("2023-05-01".to_string()),
            Just("May 1, 2023".to_string()),
            Just("2024-08-20".to_string()),
        ]);
        let rel = prop_oneof![
            Just(RelationshipType::RefersTo),
            Just(RelationshipType::Supersedes),
            Just(RelationshipType::Amends),
        ];
        (number, title, date, rel).prop_map(|(number, title, date, rel)| {
            let mut r = ExtractedReference::new(title, DocumentType::Other, rel);
            r.referenced_sebi_number = number;
            r.referenced_date = date;
            r
        })
    }

    proptest! {
        #[test]
        fn matcher_is_reflexive_for_resolvable(a in arb_reference()) {
            let cfg = MatchConfig::default();
            prop_assume!(Identity::of(&a).is_resolvable());
            prop_assert!(is_match(&a, &a, &cfg));
        }

        #[test]
        fn matcher_is_symmetric(a in arb_reference(), b in arb_reference()) {
            let cfg = MatchConfig::default();
            prop_assert_eq!(is_match(&a, &b, &cfg), is_match(&b, &a, &cfg));
        }
    }
}
