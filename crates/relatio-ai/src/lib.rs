//! Consensus layer: rule-based reconciliation of the two tracks, optionally
//! refined by an external adjudicator, assembled into the final envelope.

pub mod adjudicator;
pub mod consensus;

pub use adjudicator::{AdjudicationError, AdjudicationRequest, Adjudicator, HttpAdjudicator};
pub use consensus::{ConsensusInput, ConsensusOrchestrator, ConsensusOutcome, RunFacts};
