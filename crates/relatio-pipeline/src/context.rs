//! Per-run mutable state: the state machine, stage timings and collaborator names.
//!
//! A fresh [`RunContext`] is built for every run and passed by reference
//! through the controller; nothing here is global.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use relatio_core::{Stage, StageRecord, StageStatus};
use tracing::{info, warn};

use crate::state::StateMachine;

/// Start of a stage, captured before its collaborator is called.
#[derive(Debug, Clone, Copy)]
pub struct StageTimer {
    stage: Stage,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl StageTimer {
    pub fn start(stage: Stage) -> Self {
        info!(stage = stage.as_str(), "stage started");
        Self {
            stage,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Close the stage. The record is produced whatever the outcome.
    pub fn finish(self, status: StageStatus, detail: Option<String>) -> StageRecord {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        match status {
            StageStatus::Done => info!(stage = self.stage.as_str(), duration_ms, "stage finished"),
            StageStatus::Failed => warn!(
                stage = self.stage.as_str(),
                duration_ms,
                detail = detail.as_deref().unwrap_or(""),
                "stage failed"
            ),
        }
        StageRecord {
            stage: self.stage,
            status,
            started_at: timestamp(self.started_at),
            finished_at: timestamp(Utc::now()),
            duration_ms,
            detail,
        }
    }
}

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct RunContext {
    pub machine: StateMachine,
    started: Instant,
    started_at: DateTime<Utc>,
    stages: Vec<StageRecord>,
    models_used: BTreeMap<String, String>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            machine: StateMachine::new(),
            started: Instant::now(),
            started_at: Utc::now(),
            stages: Vec::new(),
            models_used: BTreeMap::new(),
        }
    }

    /// When the run began, formatted for `processing_timestamp`.
    pub fn started_at(&self) -> String {
        timestamp(self.started_at)
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn record(&mut self, record: StageRecord) {
        self.stages.push(record);
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    pub fn use_model(&mut self, role: &str, name: &str) {
        self.models_used.insert(role.to_string(), name.to_string());
    }

    pub fn models_used(&self) -> &BTreeMap<String, String> {
        &self.models_used
    }
}
