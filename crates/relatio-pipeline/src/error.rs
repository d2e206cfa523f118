use relatio_core::Track;
use relatio_store::StoreError;
use thiserror::Error;

use crate::state::IllegalTransition;

/// Fatal run outcomes. Everything else degrades into the envelope.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("both extraction tracks failed (TRACK_A: {track_a}; TRACK_B: {track_b})")]
    BothTracksFailed { track_a: String, track_b: String },

    #[error("{slot} slot holds an extractor for {reports}")]
    MiswiredTrack { slot: Track, reports: Track },

    #[error("output error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),
}
