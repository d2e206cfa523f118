//! Consensus: rule-based merge, optional adjudication with fallback, envelope assembly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use relatio_core::envelope::PIPELINE_VERSION;
use relatio_core::{
    AdjudicationStatus, CandidateReference, CanonicalReference, Envelope, MatchConfig, MergeOutcome,
    ProcessingMetadata, Reference, SourceDocument, StageRecord, SummaryStatistics, Track, TrackSet,
    ValidationStatus, dedupe, finalize, merge, pages, parse_adjudicated,
};
use tracing::{debug, info, warn};

use crate::adjudicator::{AdjudicationError, AdjudicationRequest, Adjudicator};

pub const DEFAULT_ADJUDICATION_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_ADJUDICATION_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(4);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Everything consensus needs from the earlier stages.
#[derive(Debug, Clone, Copy)]
pub struct ConsensusInput<'a> {
    pub source: &'a SourceDocument,
    /// Converted text, used to back-fill missing pages.
    pub markdown: &'a str,
    pub track_a: &'a [CandidateReference],
    pub track_b: &'a [CandidateReference],
}

/// The selected merge, scored, plus its accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusOutcome {
    pub references: Vec<Reference>,
    pub track_a_references_found: usize,
    pub track_b_references_found: usize,
    pub duplicates_removed: usize,
    pub conflicts_resolved: usize,
    pub self_references_filtered: usize,
    pub unresolved_candidates: usize,
    pub adjudication: AdjudicationStatus,
    pub warnings: Vec<String>,
}

/// Run-level facts only the pipeline controller knows.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFacts {
    pub stages: Vec<StageRecord>,
    pub models_used: BTreeMap<String, String>,
    pub processing_time_seconds: u64,
    pub validation_status: ValidationStatus,
}

impl ConsensusOutcome {
    fn from_merge(
        merged: MergeOutcome,
        input: &ConsensusInput<'_>,
        adjudication: AdjudicationStatus,
    ) -> Self {
        let MergeOutcome {
            mut references,
            stats,
        } = merged;
        let filled = pages::backfill(&mut references, input.markdown);
        debug!(filled, "pages back-filled before scoring");
        let references = finalize(references);

        // Exact on the rule-based path; on the adjudicated path the adjudicator's
        // own collapsing is attributed to duplicates.
        let raw_total = input.track_a.len() + input.track_b.len();
        let duplicates_removed = raw_total.saturating_sub(
            references.len() + stats.self_references_filtered + stats.unresolved_candidates,
        );

        Self {
            track_a_references_found: input.track_a.len(),
            track_b_references_found: input.track_b.len(),
            duplicates_removed,
            conflicts_resolved: stats.conflicts_resolved,
            self_references_filtered: stats.self_references_filtered,
            unresolved_candidates: stats.unresolved_candidates,
            adjudication,
            warnings: stats.warnings,
            references,
        }
    }

    /// Wrap the outcome in the persisted envelope. Pure; the caller writes it once.
    pub fn into_envelope(self, source: SourceDocument, run: RunFacts) -> Envelope {
        let summary_statistics = SummaryStatistics::from_references(&self.references, source.total_pages);
        Envelope {
            processing_metadata: ProcessingMetadata {
                pipeline_version: PIPELINE_VERSION.to_string(),
                models_used: run.models_used,
                processing_time_seconds: run.processing_time_seconds,
                stages: run.stages,
                track_a_references_found: self.track_a_references_found,
                track_b_references_found: self.track_b_references_found,
                merged_count: self.references.len(),
                duplicates_removed: self.duplicates_removed,
                conflicts_resolved: self.conflicts_resolved,
                self_references_filtered: self.self_references_filtered,
                unresolved_candidates: self.unresolved_candidates,
                validation_status: run.validation_status,
                adjudication: self.adjudication,
                warnings: self.warnings,
            },
            source_document: source,
            references: self.references,
            summary_statistics,
        }
    }
}

/// Produces the final reference list. Never fails: adjudication problems degrade to the rule-based merge.
pub struct ConsensusOrchestrator {
    adjudicator: Option<Arc<dyn Adjudicator>>,
    match_config: MatchConfig,
    adjudication_timeout: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl ConsensusOrchestrator {
    /// Rule-based consensus only.
    pub fn new(match_config: MatchConfig) -> Self {
        Self {
            adjudicator: None,
            match_config,
            adjudication_timeout: DEFAULT_ADJUDICATION_TIMEOUT,
            max_attempts: DEFAULT_ADJUDICATION_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_adjudicator(mut self, adjudicator: Arc<dyn Adjudicator>, timeout: Duration) -> Self {
        self.adjudicator = Some(adjudicator);
        self.adjudication_timeout = timeout;
        self
    }

    /// Transport failures are retried up to `max_attempts` calls in total, the
    /// pause doubling from `backoff`. Retries never outlast the adjudication timeout.
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    pub fn match_config(&self) -> &MatchConfig {
        &self.match_config
    }

    pub fn adjudicator_model(&self) -> Option<&str> {
        self.adjudicator.as_deref().map(|a| a.model())
    }

    /// The deterministic merge of both tracks, before scoring.
    fn rule_based(&self, input: &ConsensusInput<'_>) -> MergeOutcome {
        let candidates: Vec<CandidateReference> = input
            .track_a
            .iter()
            .chain(input.track_b)
            .cloned()
            .collect();
        merge(&candidates, input.source, &self.match_config)
    }

    pub async fn run(&self, input: ConsensusInput<'_>) -> ConsensusOutcome {
        let baseline = self.rule_based(&input);
        info!(
            track_a = input.track_a.len(),
            track_b = input.track_b.len(),
            merged = baseline.references.len(),
            duplicates = baseline.stats.duplicates_removed,
            "rule-based merge complete"
        );

        let Some(adjudicator) = self.adjudicator.as_deref() else {
            return ConsensusOutcome::from_merge(baseline, &input, AdjudicationStatus::NotRequested);
        };
        if input.track_a.is_empty() && input.track_b.is_empty() {
            debug!("no candidates; adjudication not requested");
            return ConsensusOutcome::from_merge(baseline, &input, AdjudicationStatus::NotRequested);
        }

        let rule_based = ConsensusOutcome::from_merge(baseline, &input, AdjudicationStatus::Fallback);
        let adjudicated = self.adjudicate(adjudicator, &input, &rule_based.references).await;
        match adjudicated {
            Ok(merged) => {
                info!(
                    model = adjudicator.model(),
                    merged = merged.references.len(),
                    "adjudicated merge accepted"
                );
                ConsensusOutcome::from_merge(merged, &input, AdjudicationStatus::Accepted)
            }
            Err(e) => {
                warn!(model = adjudicator.model(), error = %e, "adjudication failed; using rule-based merge");
                let mut outcome = rule_based;
                outcome
                    .warnings
                    .push(format!("adjudication skipped, rule-based merge used: {e}"));
                outcome
            }
        }
    }

    /// Call the adjudicator, retrying transport failures with exponential backoff.
    ///
    /// Every attempt and every pause shares one deadline. A retry whose pause
    /// would cross it is not made; the last failure is returned instead.
    async fn ask(
        &self,
        adjudicator: &dyn Adjudicator,
        request: AdjudicationRequest<'_>,
    ) -> Result<String, AdjudicationError> {
        let deadline = Instant::now() + self.adjudication_timeout;
        let mut backoff = self.retry_backoff;
        let mut attempt = 1;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Ok(result) = tokio::time::timeout(remaining, adjudicator.adjudicate(request)).await else {
                return Err(AdjudicationError::Timeout(self.adjudication_timeout));
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.max_attempts && Instant::now() + backoff < deadline => {
                    warn!(
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "adjudication attempt failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_RETRY_BACKOFF);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Call the adjudicator under the timeout and validate what it says.
    async fn adjudicate(
        &self,
        adjudicator: &dyn Adjudicator,
        input: &ConsensusInput<'_>,
        rule_based: &[Reference],
    ) -> Result<MergeOutcome, AdjudicationError> {
        let request = AdjudicationRequest {
            source_document: input.source,
            track_a: input.track_a,
            track_b: input.track_b,
            rule_based_merge: rule_based,
        };
        let text = self.ask(adjudicator, request).await?;

        let mut produced = TrackSet::default();
        if !input.track_a.is_empty() {
            produced.insert(Track::A);
        }
        if !input.track_b.is_empty() {
            produced.insert(Track::B);
        }
        let raw_total = input.track_a.len() + input.track_b.len();
        let adjudicated: Vec<CanonicalReference> = parse_adjudicated(&text, produced, raw_total)?;

        // The adjudicator's list goes through the same clustering and
        // self-reference filter as the rule-based one.
        let deduped = dedupe(&adjudicated, input.source, &self.match_config);
        let duplicates_removed = deduped.stats.duplicates_removed;
        if duplicates_removed > 0 {
            debug!(duplicates_removed, "collapsed duplicates in adjudicated merge");
        }
        Ok(deduped)
    }
}
