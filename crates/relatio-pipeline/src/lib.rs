//! Pipeline controller: conversion → Track A / Track B → consensus.
//!
//! Conversion failure and failure of both tracks are fatal and leave no
//! envelope behind. A single failed track, or a failed adjudication, degrades
//! the run but still produces exactly one envelope.

mod config;
mod context;
mod error;
pub mod state;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relatio_ai::{ConsensusInput, ConsensusOrchestrator, RunFacts};
use relatio_core::{
    CandidateReference, Envelope, Stage, StageRecord, StageStatus, Track,
    ValidationStatus, detect_source_document,
};
use relatio_extract::{CollaboratorError, Converter, TrackExtractor, TrackInput};
use relatio_store::OutputLayout;
use tracing::{error, info, warn};

pub use config::PipelineConfig;
pub use context::{RunContext, StageTimer};
pub use error::PipelineError;
pub use state::{IllegalTransition, PipelineState, StateMachine, TransitionRecord};

/// What a completed run hands back to its caller.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub envelope_path: PathBuf,
    pub envelope: Envelope,
    pub transitions: Vec<TransitionRecord>,
}

/// A track's candidates, or why there are none.
type TrackResult = Result<Vec<CandidateReference>, String>;

pub struct Pipeline {
    converter: Arc<dyn Converter>,
    track_a: Arc<dyn TrackExtractor>,
    track_b: Arc<dyn TrackExtractor>,
    consensus: ConsensusOrchestrator,
    config: PipelineConfig,
}

impl Pipeline {
    /// Fails when an extractor sits in the other track's slot, since its
    /// candidates would be attributed to the wrong track.
    pub fn new(
        converter: Arc<dyn Converter>,
        track_a: Arc<dyn TrackExtractor>,
        track_b: Arc<dyn TrackExtractor>,
        consensus: ConsensusOrchestrator,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        for (slot, extractor) in [(Track::A, &track_a), (Track::B, &track_b)] {
            if extractor.track() != slot {
                return Err(PipelineError::MiswiredTrack {
                    slot,
                    reports: extractor.track(),
                });
            }
        }
        Ok(Self {
            converter,
            track_a,
            track_b,
            consensus,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn consensus(&self) -> &ConsensusOrchestrator {
        &self.consensus
    }

    /// Process one document end to end and write its envelope.
    pub async fn run(&self, input: &Path) -> Result<RunReport, PipelineError> {
        let layout = OutputLayout::for_input(&self.config.output_dir, input)?;
        let mut ctx = RunContext::new();
        info!(input = %input.display(), output = %layout.dir().display(), "pipeline run started");

        match self.run_stages(input, &layout, &mut ctx).await {
            Ok((envelope_path, envelope)) => {
                ctx.machine.advance(PipelineState::Done, None)?;
                info!(
                    path = %envelope_path.display(),
                    references = envelope.references.len(),
                    seconds = ctx.elapsed_seconds(),
                    "pipeline run complete"
                );
                Ok(RunReport {
                    envelope_path,
                    envelope,
                    transitions: ctx.machine.transitions().to_vec(),
                })
            }
            Err(e) => {
                error!(state = %ctx.machine.current(), error = %e, "pipeline run failed");
                ctx.machine.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        input: &Path,
        layout: &OutputLayout,
        ctx: &mut RunContext,
    ) -> Result<(PathBuf, Envelope), PipelineError> {
        // Conversion: everything downstream depends on it.
        ctx.machine.advance(PipelineState::Converting, None)?;
        ctx.use_model("conversion", self.converter.name());
        let timer = StageTimer::start(Stage::Conversion);
        let converted = match with_timeout(self.config.conversion_timeout, self.converter.convert(input)).await {
            Ok(converted) => {
                ctx.record(timer.finish(StageStatus::Done, None));
                converted
            }
            Err(reason) => {
                ctx.record(timer.finish(StageStatus::Failed, Some(reason.clone())));
                return Err(PipelineError::Conversion(reason));
            }
        };

        let filename = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| layout.stem().to_string());
        let source = detect_source_document(
            &converted.markdown,
            &filename,
            converted.page_count,
            ctx.started_at(),
        );
        info!(
            title = %source.circular_title,
            number = source.sebi_reference_number.as_deref().unwrap_or("-"),
            pages = source.total_pages,
            tables = converted.has_tables,
            "source document detected"
        );

        let markdown_path = if self.config.save_intermediate {
            layout
                .write_markdown(&converted.markdown)
                .inspect_err(|e| warn!(error = %e, "could not save converted markdown"))
                .ok()
        } else {
            None
        };

        // Extraction: independent tracks over the same immutable text.
        let track_input = TrackInput {
            markdown: &converted.markdown,
            markdown_path: markdown_path.as_deref(),
            source: &source,
        };
        ctx.use_model("track_a", self.track_a.name());
        ctx.use_model("track_b", self.track_b.name());
        let (a, b) = self.extract(track_input, ctx).await?;

        let validation_status = match (&a, &b) {
            (Ok(_), Ok(_)) => ValidationStatus::Completed,
            (Err(ea), Err(eb)) => {
                return Err(PipelineError::BothTracksFailed {
                    track_a: ea.clone(),
                    track_b: eb.clone(),
                });
            }
            _ => ValidationStatus::Partial,
        };

        let mut warnings = Vec::new();
        for (track, result) in [(Track::A, &a), (Track::B, &b)] {
            match result {
                Ok(candidates) if self.config.save_intermediate => {
                    if let Err(e) = layout.write_candidates(track, candidates, self.config.pretty_json) {
                        warn!(%track, error = %e, "could not save track candidates");
                    }
                }
                Ok(_) => {}
                Err(reason) => {
                    warn!(%track, reason = %reason, "continuing with the surviving track");
                    warnings.push(format!("{track} failed and was treated as empty: {reason}"));
                }
            }
        }
        let track_a = a.unwrap_or_default();
        let track_b = b.unwrap_or_default();

        // Consensus.
        ctx.machine.advance(PipelineState::Consensus, None)?;
        ctx.use_model(
            "consensus",
            self.consensus.adjudicator_model().unwrap_or("rules"),
        );
        let timer = StageTimer::start(Stage::Consensus);
        let mut outcome = self
            .consensus
            .run(ConsensusInput {
                source: &source,
                markdown: &converted.markdown,
                track_a: &track_a,
                track_b: &track_b,
            })
            .await;
        let detail = format!("adjudication {}", adjudication_label(outcome.adjudication));
        ctx.record(timer.finish(StageStatus::Done, Some(detail)));

        warnings.append(&mut outcome.warnings);
        outcome.warnings = warnings;

        let envelope = outcome.into_envelope(
            source,
            RunFacts {
                stages: ctx.stages().to_vec(),
                models_used: ctx.models_used().clone(),
                processing_time_seconds: ctx.elapsed_seconds(),
                validation_status,
            },
        );

        let path = layout.write_envelope(&envelope, self.config.pretty_json)?;
        Ok((path, envelope))
    }

    /// Run both tracks, concurrently or in order, and record their stages.
    async fn extract(
        &self,
        input: TrackInput<'_>,
        ctx: &mut RunContext,
    ) -> Result<(TrackResult, TrackResult), PipelineError> {
        let timeout = self.config.extraction_timeout;

        if self.config.concurrent_tracks {
            ctx.machine.advance(PipelineState::ExtractingA, Some("concurrent"))?;
            ctx.machine.advance(PipelineState::ExtractingB, Some("concurrent"))?;
            let ((rec_a, a), (rec_b, b)) = tokio::join!(
                run_track(self.track_a.as_ref(), Stage::TrackA, input, timeout),
                run_track(self.track_b.as_ref(), Stage::TrackB, input, timeout),
            );
            ctx.record(rec_a);
            ctx.record(rec_b);
            Ok((a, b))
        } else {
            ctx.machine.advance(PipelineState::ExtractingA, None)?;
            let (rec_a, a) = run_track(self.track_a.as_ref(), Stage::TrackA, input, timeout).await;
            ctx.record(rec_a);
            ctx.machine.advance(PipelineState::ExtractingB, None)?;
            let (rec_b, b) = run_track(self.track_b.as_ref(), Stage::TrackB, input, timeout).await;
            ctx.record(rec_b);
            Ok((a, b))
        }
    }
}

async fn run_track(
    extractor: &dyn TrackExtractor,
    stage: Stage,
    input: TrackInput<'_>,
    timeout: Duration,
) -> (StageRecord, TrackResult) {
    let timer = StageTimer::start(stage);
    match with_timeout(timeout, extractor.extract(input)).await {
        Ok(candidates) => {
            let detail = format!("{} candidates", candidates.len());
            (timer.finish(StageStatus::Done, Some(detail)), Ok(candidates))
        }
        Err(reason) => (timer.finish(StageStatus::Failed, Some(reason.clone())), Err(reason)),
    }
}

/// Bound a collaborator call. Expiry drops (cancels) the call.
async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, String> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {limit:?}")),
    }
}

fn adjudication_label(status: relatio_core::AdjudicationStatus) -> &'static str {
    use relatio_core::AdjudicationStatus::*;
    match status {
        NotRequested => "not requested",
        Accepted => "accepted",
        Fallback => "fell back to rules",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_becomes_failure_reason() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, CollaboratorError>(1)
        };
        let err = with_timeout(Duration::from_millis(20), slow).await.unwrap_err();
        assert!(err.starts_with("timed out after"));
    }

    #[tokio::test]
    async fn collaborator_error_becomes_failure_reason() {
        let failing = async { Err::<u32, _>(CollaboratorError::Unsupported("no converter".into())) };
        assert_eq!(with_timeout(Duration::from_secs(1), failing).await, Err("no converter".into()));
    }
}
