//! Pipeline state machine with legal-transition guards and a transition log.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Every run starts at `Init` and ends at `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,
    /// Raw document → markdown. Everything downstream needs its output.
    Converting,
    ExtractingA,
    ExtractingB,
    /// Merge, score, optionally adjudicate, persist the envelope.
    Consensus,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Converting => "CONVERTING",
            Self::ExtractingA => "EXTRACTING_A",
            Self::ExtractingB => "EXTRACTING_B",
            Self::Consensus => "CONSENSUS",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ```text
/// INIT → CONVERTING → EXTRACTING_A → EXTRACTING_B → CONSENSUS → DONE
/// any non-terminal state → FAILED
/// ```
fn is_legal_transition(from: PipelineState, to: PipelineState) -> bool {
    use PipelineState::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Init, Converting)
            | (Converting, ExtractingA)
            | (ExtractingA, ExtractingB)
            | (ExtractingB, Consensus)
            | (Consensus, Done)
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PipelineState,
    pub to: PipelineState,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal pipeline transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

pub struct StateMachine {
    current: PipelineState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: PipelineState::Init,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn advance(&mut self, to: PipelineState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }
        debug!(from = %self.current, to = %to, reason, "pipeline transition");
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(str::to_string),
        });
        self.current = to;
        Ok(())
    }

    /// Move to `Failed` from wherever the run is. A no-op once terminal.
    pub fn fail(&mut self, reason: &str) {
        if !self.current.is_terminal() {
            // Always legal from a non-terminal state.
            let _ = self.advance(PipelineState::Failed, Some(reason));
        }
    }
}
