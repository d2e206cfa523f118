//! Single-linkage clustering of candidate references and field-level conflict resolution.
//!
//! Candidates are visited in stable input order (Track A, then Track B). Each
//! joins the first open cluster containing any member it matches, otherwise it
//! opens a new cluster. Output order is the order clusters were opened.
//!
//! # Conflict resolution per field
//!
//! | field | policy |
//! |---|---|
//! | `document_type`, `relationship_type` | member with a citation wins; tie → Track A |
//! | `page_numbers` | union, ascending, deduplicated |
//! | `exact_citation_text`, `context_paragraph` | longest |
//! | `referenced_date` | any non-null; disagreement → Track A, flagged |
//! | `referenced_document_title` | longest |
//! | `referenced_sebi_number` | first non-empty, Track A first |
//! | `extraction_source` | union of member tracks |

use std::collections::BTreeSet;

use tracing::debug;

use crate::matcher::{Identity, MatchConfig};
use crate::normalize::{canonical_date, normalize_date};
use crate::reference::{
    CandidateReference, CanonicalReference, ExtractedReference, ExtractionSource, SourceDocument,
    Track, TrackSet,
};

/// Counters and flags produced by one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Candidates absorbed into an earlier cluster.
    pub duplicates_removed: usize,
    /// Field disagreements settled by the conflict policy.
    pub conflicts_resolved: usize,
    /// Clusters dropped because they point back at the source document.
    pub self_references_filtered: usize,
    /// Inputs with neither a number nor a title, dropped before clustering.
    pub unresolved_candidates: usize,
    /// Human-readable notes about information that was overridden.
    pub warnings: Vec<String>,
}

/// Canonical references in cluster-opening order, plus the pass's counters.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub references: Vec<CanonicalReference>,
    pub stats: MergeStats,
}

struct Member<'a> {
    reference: &'a ExtractedReference,
    tracks: TrackSet,
    identity: Identity,
}

impl Member<'_> {
    fn has_track_a(&self) -> bool {
        self.tracks.a
    }
}

/// A grouping of members judged equivalent. Lives only for one merge pass.
struct MatchCluster<'a> {
    members: Vec<Member<'a>>,
}

impl<'a> MatchCluster<'a> {
    fn accepts(&self, identity: &Identity, config: &MatchConfig) -> bool {
        self.members.iter().any(|m| m.identity.matches(identity, config))
    }

    fn tracks(&self) -> TrackSet {
        self.members
            .iter()
            .fold(TrackSet::default(), |acc, m| acc.union(m.tracks))
    }
}

/// Merge candidates from both tracks into canonical references.
pub fn merge(
    candidates: &[CandidateReference],
    source: &SourceDocument,
    config: &MatchConfig,
) -> MergeOutcome {
    let items = candidates
        .iter()
        .map(|c| (&c.reference, TrackSet::from(c.track)));
    merge_items(items, source, config)
}

/// Collapse an already-merged list (e.g. adjudicated output) through the same clustering.
///
/// Members keep the tracks they claim, so two entries claiming `TRACK_A` and
/// `TRACK_B` that turn out to match become one `BOTH` reference.
pub fn dedupe(
    references: &[CanonicalReference],
    source: &SourceDocument,
    config: &MatchConfig,
) -> MergeOutcome {
    let items = references
        .iter()
        .map(|c| (&c.reference, TrackSet::from(c.extraction_source)));
    merge_items(items, source, config)
}

fn merge_items<'a>(
    items: impl Iterator<Item = (&'a ExtractedReference, TrackSet)>,
    source: &SourceDocument,
    config: &MatchConfig,
) -> MergeOutcome {
    let mut stats = MergeStats::default();
    let mut clusters: Vec<MatchCluster<'a>> = Vec::new();

    for (reference, tracks) in items {
        let identity = Identity::of(reference);
        if !identity.is_resolvable() {
            stats.unresolved_candidates += 1;
            continue;
        }
        let member = Member {
            reference,
            tracks,
            identity,
        };
        match clusters
            .iter_mut()
            .find(|c| c.accepts(&member.identity, config))
        {
            Some(cluster) => {
                stats.duplicates_removed += 1;
                cluster.members.push(member);
            }
            None => clusters.push(MatchCluster {
                members: vec![member],
            }),
        }
    }

    let source_identity = Identity::of_source(source);
    let mut references = Vec::with_capacity(clusters.len());

    for cluster in &clusters {
        let canonical = canonicalize(cluster, &mut stats);
        let identity = Identity::of(&canonical.reference);
        if identity.is_self_reference(&source_identity, config) {
            debug!(reference = canonical.reference.label(), "filtering self-reference");
            stats.self_references_filtered += 1;
            continue;
        }
        references.push(canonical);
    }

    debug!(
        clusters = clusters.len(),
        kept = references.len(),
        duplicates = stats.duplicates_removed,
        "merge pass complete"
    );

    MergeOutcome { references, stats }
}

/// Resolve one cluster into a single reference.
fn canonicalize(cluster: &MatchCluster<'_>, stats: &mut MergeStats) -> CanonicalReference {
    let members = &cluster.members;
    let leader = provenance_leader(members);

    if distinct(members.iter().map(|m| m.reference.document_type)) > 1 {
        stats.conflicts_resolved += 1;
    }
    if distinct(members.iter().map(|m| m.reference.relationship_type)) > 1 {
        stats.conflicts_resolved += 1;
    }

    let title = longest(members.iter().map(|m| m.reference.referenced_document_title.as_str()));
    let number = prefer_track_a(members, |r| {
        r.referenced_sebi_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    })
    .map(str::to_string);
    let label = number.as_deref().unwrap_or(title.as_str()).to_string();
    let date = resolve_date(members, &label, stats);

    let page_numbers: BTreeSet<u32> = members
        .iter()
        .flat_map(|m| m.reference.page_numbers.iter().copied())
        .filter(|&p| p > 0)
        .collect();

    let section_location = if leader.reference.section_location.trim().is_empty() {
        prefer_track_a(members, |r| {
            let s = r.section_location.trim();
            (!s.is_empty()).then_some(s)
        })
        .unwrap_or_default()
        .to_string()
    } else {
        leader.reference.section_location.trim().to_string()
    };

    let reference = ExtractedReference {
        referenced_document_title: title,
        referenced_sebi_number: number,
        referenced_date: date,
        document_type: leader.reference.document_type,
        relationship_type: leader.reference.relationship_type,
        page_numbers: page_numbers.into_iter().collect(),
        exact_citation_text: longest(members.iter().map(|m| m.reference.exact_citation_text.as_str())),
        context_paragraph: longest(members.iter().map(|m| m.reference.context_paragraph.as_str())),
        section_location,
    };

    // Non-empty clusters only ever come out of `merge_items`.
    let extraction_source = cluster.tracks().source().unwrap_or(ExtractionSource::Both);

    CanonicalReference {
        reference,
        extraction_source,
    }
}

/// The member whose classification wins: richer provenance first, then Track A, then input order.
fn provenance_leader<'m, 'a>(members: &'m [Member<'a>]) -> &'m Member<'a> {
    members
        .iter()
        .filter(is_cited)
        .find(|m| m.has_track_a())
        .or_else(|| members.iter().find(is_cited))
        .or_else(|| members.iter().find(|m| m.has_track_a()))
        .unwrap_or(&members[0])
}

fn is_cited(member: &&Member<'_>) -> bool {
    !member.reference.exact_citation_text.trim().is_empty()
}

/// First value produced by a Track A member, else by any member, in input order.
fn prefer_track_a<'a, T>(
    members: &[Member<'a>],
    pick: impl Fn(&'a ExtractedReference) -> Option<T>,
) -> Option<T> {
    members
        .iter()
        .filter(|m| m.has_track_a())
        .find_map(|m| pick(m.reference))
        .or_else(|| members.iter().find_map(|m| pick(m.reference)))
}

fn resolve_date(members: &[Member<'_>], label: &str, stats: &mut MergeStats) -> Option<String> {
    let dated: Vec<(&Member<'_>, &str)> = members
        .iter()
        .filter_map(|m| {
            m.reference
                .referenced_date
                .as_deref()
                .filter(|d| !d.trim().is_empty())
                .map(|d| (m, d))
        })
        .collect();

    let (kept_member, kept) = dated
        .iter()
        .find(|(m, _)| m.has_track_a())
        .or_else(|| dated.first())
        .copied()?;

    let kept_norm = normalize_date(kept);
    let discarded: BTreeSet<&str> = dated
        .iter()
        .filter(|(_, d)| normalize_date(d) != kept_norm)
        .map(|(_, d)| d.trim())
        .collect();

    if !discarded.is_empty() {
        stats.conflicts_resolved += 1;
        let kept_from = kept_member
            .tracks
            .source()
            .map(|s| s.as_str())
            .unwrap_or(Track::A.as_str());
        stats.warnings.push(format!(
            "conflicting referenced_date for '{label}': kept '{}' ({kept_from}), discarded {}",
            kept.trim(),
            discarded
                .iter()
                .map(|d| format!("'{d}'"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    canonical_date(kept)
}

/// Longest trimmed string (by characters); earlier wins ties.
fn longest<'s>(values: impl Iterator<Item = &'s str>) -> String {
    let mut best = "";
    for v in values.map(str::trim) {
        if v.chars().count() > best.chars().count() {
            best = v;
        }
    }
    best.to_string()
}

fn distinct<T: Ord>(values: impl Iterator<Item = T>) -> usize {
    values.collect::<BTreeSet<_>>().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{DocumentType, RelationshipType};

    fn source() -> SourceDocument {
        SourceDocument {
            filename: "sebi_circular_2024_120.pdf".into(),
            circular_title: "Master Circular on Portfolio Management Services".into(),
            sebi_reference_number: Some("SEBI/HO/MIRSD/2024/120".into()),
            date_issued: Some("2024-09-15".into()),
            total_pages: 47,
            processing_timestamp: "2026-01-21T06:30:00Z".into(),
        }
    }

    fn candidate(track: Track, number: Option<&str>, title: &str) -> CandidateReference {
        let mut r = ExtractedReference::new(title, DocumentType::SebiCircular, RelationshipType::Supersedes);
        r.referenced_sebi_number = number.map(str::to_string);
        CandidateReference::new(track, r)
    }

    #[test]
    fn same_number_across_tracks_merges_to_both() {
        let a = candidate(Track::A, Some("SEBI/HO/MIRSD/2023/105"), "");
        let mut b = candidate(Track::B, Some("SEBI/HO/MIRSD/2023/105"), "");
        b.reference.page_numbers = vec![1, 2];

        let out = merge(&[a, b], &source(), &MatchConfig::default());
        assert_eq!(out.references.len(), 1);
        let r = &out.references[0];
        assert_eq!(r.extraction_source, ExtractionSource::Both);
        assert_eq!(r.reference.page_numbers, vec![1, 2]);
        assert_eq!(out.stats.duplicates_removed, 1);
    }

    #[test]
    fn single_track_clusters_keep_their_track() {
        let a = candidate(Track::A, Some("SEBI/HO/CFD/2022/7"), "");
        let b = candidate(Track::A, Some("SEBI/HO/CFD/2022/8"), "");
        let out = merge(&[a, b], &source(), &MatchConfig::default());
        assert_eq!(out.references.len(), 2);
        assert!(out
            .references
            .iter()
            .all(|r| r.extraction_source == ExtractionSource::TrackA));
    }

    #[test]
    fn output_order_follows_cluster_opening() {
        let a1 = candidate(Track::A, Some("N/1"), "");
        let a2 = candidate(Track::A, Some("N/2"), "");
        let b1 = candidate(Track::B, Some("N/3"), "");
        let b2 = candidate(Track::B, Some("N/1"), "");
        let out = merge(&[a1, a2, b1, b2], &source(), &MatchConfig::default());
        let numbers: Vec<_> = out
            .references
            .iter()
            .map(|r| r.reference.referenced_sebi_number.clone().unwrap())
            .collect();
        assert_eq!(numbers, vec!["N/1", "N/2", "N/3"]);
    }

    #[test]
    fn pages_are_unioned_sorted_deduplicated() {
        let mut a = candidate(Track::A, Some("N/1"), "");
        a.reference.page_numbers = vec![5, 2];
        let mut b = candidate(Track::B, Some("N/1"), "");
        b.reference.page_numbers = vec![2, 3];
        let out = merge(&[a, b], &source(), &MatchConfig::default());
        assert_eq!(out.references[0].reference.page_numbers, vec![2, 3, 5]);
    }

    #[test]
    fn cited_member_wins_classification() {
        let mut a = candidate(Track::A, Some("N/1"), "");
        a.reference.relationship_type = RelationshipType::RefersTo;
        let mut b = candidate(Track::B, Some("N/1"), "");
        b.reference.relationship_type = RelationshipType::Repeals;
        b.reference.document_type = DocumentType::Notification;
        b.reference.exact_citation_text = "hereby repealed".into();

        let out = merge(&[a, b], &source(), &MatchConfig::default());
        let r = &out.references[0].reference;
        assert_eq!(r.relationship_type, RelationshipType::Repeals);
        assert_eq!(r.document_type, DocumentType::Notification);
        assert_eq!(out.stats.conflicts_resolved, 2);
    }

    #[test]
    fn classification_tie_prefers_track_a() {
        let mut a = candidate(Track::A, Some("N/1"), "");
        a.reference.relationship_type = RelationshipType::Amends;
        a.reference.exact_citation_text = "is amended".into();
        let mut b = candidate(Track::B, Some("N/1"), "");
        b.reference.relationship_type = RelationshipType::Clarifies;
        b.reference.exact_citation_text = "is clarified further".into();

        let out = merge(&[b, a], &source(), &MatchConfig::default());
        assert_eq!(out.references[0].reference.relationship_type, RelationshipType::Amends);
    }

    #[test]
    fn longer_text_fields_win() {
        let mut a = candidate(Track::A, Some("N/1"), "Circular");
        a.reference.exact_citation_text = "short".into();
        a.reference.context_paragraph = "a much longer context paragraph".into();
        let mut b = candidate(Track::B, Some("N/1"), "Circular on Margin Obligations");
        b.reference.exact_citation_text = "a longer citation".into();
        b.reference.context_paragraph = "short".into();

        let out = merge(&[a, b], &source(), &MatchConfig::default());
        let r = &out.references[0].reference;
        assert_eq!(r.exact_citation_text, "a longer citation");
        assert_eq!(r.context_paragraph, "a much longer context paragraph");
        assert_eq!(r.referenced_document_title, "Circular on Margin Obligations");
    }

    #[test]
    fn conflicting_dates_prefer_track_a_and_warn() {
        let mut a = candidate(Track::A, Some("N/1"), "");
        a.reference.referenced_date = Some("May 1, 2023".into());
        let mut b = candidate(Track::B, Some("N/1"), "");
        b.reference.referenced_date = Some("2023-06-01".into());

        let out = merge(&[b, a], &source(), &MatchConfig::default());
        assert_eq!(out.references[0].reference.referenced_date.as_deref(), Some("2023-05-01"));
        assert_eq!(out.stats.conflicts_resolved, 1);
        assert_eq!(out.stats.warnings.len(), 1);
        assert!(out.stats.warnings[0].contains("2023-06-01"));
    }

    #[test]
    fn equivalent_dates_are_not_a_conflict() {
        let mut a = candidate(Track::A, Some("N/1"), "");
        a.reference.referenced_date = Some("May 1, 2023".into());
        let mut b = candidate(Track::B, Some("N/1"), "");
        b.reference.referenced_date = Some("2023-05-01".into());

        let out = merge(&[a, b], &source(), &MatchConfig::default());
        assert_eq!(out.stats.conflicts_resolved, 0);
        assert!(out.stats.warnings.is_empty());
    }

    #[test]
    fn non_null_date_fills_gap() {
        let a = candidate(Track::A, Some("N/1"), "");
        let mut b = candidate(Track::B, Some("N/1"), "");
        b.reference.referenced_date = Some("2023-06-01".into());
        let out = merge(&[a, b], &source(), &MatchConfig::default());
        assert_eq!(out.references[0].reference.referenced_date.as_deref(), Some("2023-06-01"));
    }

    #[test]
    fn self_reference_is_filtered_not_merged() {
        let own = candidate(Track::A, Some("SEBI/HO/MIRSD/2024/120"), "");
        let other = candidate(Track::A, Some("SEBI/HO/MIRSD/2023/105"), "");
        let out = merge(&[own, other], &source(), &MatchConfig::default());
        assert_eq!(out.references.len(), 1);
        assert_eq!(out.stats.self_references_filtered, 1);
        assert_eq!(out.stats.duplicates_removed, 0);
    }

    #[test]
    fn unresolvable_candidates_are_counted_and_dropped() {
        let blank = candidate(Track::B, None, "  ");
        let other = candidate(Track::A, Some("N/1"), "");
        let out = merge(&[other, blank], &source(), &MatchConfig::default());
        assert_eq!(out.references.len(), 1);
        assert_eq!(out.stats.unresolved_candidates, 1);
    }

    #[test]
    fn accounting_identity_holds() {
        let cands = vec![
            candidate(Track::A, Some("N/1"), ""),
            candidate(Track::A, Some("SEBI/HO/MIRSD/2024/120"), ""),
            candidate(Track::A, None, ""),
            candidate(Track::B, Some("N/1"), ""),
            candidate(Track::B, Some("N/2"), ""),
            candidate(Track::B, Some("n/2"), ""),
        ];
        let out = merge(&cands, &source(), &MatchConfig::default());
        let s = &out.stats;
        assert_eq!(
            cands.len(),
            out.references.len() + s.duplicates_removed + s.self_references_filtered + s.unresolved_candidates
        );
    }

    #[test]
    fn dedupe_combines_claimed_tracks() {
        let mut r = ExtractedReference::new("SEBI Act, 1992", DocumentType::Act, RelationshipType::DerivesFrom);
        r.page_numbers = vec![1];
        let a = CanonicalReference {
            reference: r.clone(),
            extraction_source: ExtractionSource::TrackA,
        };
        r.page_numbers = vec![3];
        let b = CanonicalReference {
            reference: r,
            extraction_source: ExtractionSource::TrackB,
        };
        let out = dedupe(&[a, b], &source(), &MatchConfig::default());
        assert_eq!(out.references.len(), 1);
        assert_eq!(out.references[0].extraction_source, ExtractionSource::Both);
        assert_eq!(out.references[0].reference.page_numbers, vec![1, 3]);
    }

    mod accounting {
        use super::*;
        use proptest::prelude::*;

        fn arb_candidate() -> impl Strategy<Value = CandidateReference> {
            let track = prop_oneof![Just(Track::A), Just(Track::B)];
            let number = proptest::option::of(prop_oneof![
                Just("SEBI/HO/MIRSD/2024/120"),
                Just("SEBI/HO/MIRSD/2023/105"),
                Just("sebi/ho/mirsd/2023/105"),
                Just("SEBI/HO/CFD/2022/7"),
            ]);
            let title = prop_oneof![
                Just(""),
                Just("SEBI Act, 1992"),
                Just("Master Circular on Portfolio Management Services"),
                Just("Stock Brokers Regulations"),
            ];
            (track, number, title).prop_map(|(t, n, title)| candidate(t, n, title))
        }

        proptest! {
            #[test]
            fn every_candidate_is_accounted_for(cands in proptest::collection::vec(arb_candidate(), 0..12)) {
                let out = merge(&cands, &source(), &MatchConfig::default());
                let s = &out.stats;
                prop_assert_eq!(
                    cands.len(),
                    out.references.len() + s.duplicates_removed + s.self_references_filtered + s.unresolved_candidates
                );
            }
        }
    }
}
