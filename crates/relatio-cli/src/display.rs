//! Run summary printed after a successful (possibly degraded) run.
//!
//! A header card for the circular, a stage table, the reconciliation counters
//! and any warnings, followed by the envelope path.

use relatio_core::{AdjudicationStatus, StageRecord, StageStatus, ValidationStatus};
use relatio_pipeline::RunReport;

pub fn print_run_summary(report: &RunReport) {
    let env = &report.envelope;
    let meta = &env.processing_metadata;
    let source = &env.source_document;

    println!("=== {} ===", source.filename);
    println!("{}", source.circular_title);
    if let Some(number) = &source.sebi_reference_number {
        println!("{number}");
    }
    println!();

    print!("{}", render_stages(&meta.stages));
    println!();

    println!("Results");
    field("references", env.references.len());
    field(
        "track A / track B",
        format!("{} / {}", meta.track_a_references_found, meta.track_b_references_found),
    );
    field("duplicates removed", meta.duplicates_removed);
    field("conflicts resolved", meta.conflicts_resolved);
    field("self-references filtered", meta.self_references_filtered);
    field("unresolved candidates", meta.unresolved_candidates);
    field("validation", validation_label(meta.validation_status));
    field("adjudication", adjudication_label(meta.adjudication));
    field("total time", format!("{}s", meta.processing_time_seconds));

    if !meta.warnings.is_empty() {
        println!();
        println!("Warnings");
        for w in &meta.warnings {
            println!("  - {w}");
        }
    }

    println!();
    println!("Output: {}", report.envelope_path.display());
}

fn field(name: &str, value: impl std::fmt::Display) {
    println!("  {:<26} {}", name, value);
}

/// Stage / duration / status table, one row per recorded stage.
fn render_stages(stages: &[StageRecord]) -> String {
    let mut out = format!("  {:<12} {:>10}  {}\n", "STAGE", "DURATION", "STATUS");
    for s in stages {
        let status = match s.status {
            StageStatus::Done => "done",
            StageStatus::Failed => "FAILED",
        };
        out.push_str(&format!(
            "  {:<12} {:>10}  {}",
            s.stage.as_str(),
            format_duration(s.duration_ms),
            status
        ));
        if let Some(detail) = &s.detail {
            out.push_str(&format!(" ({detail})"));
        }
        out.push('\n');
    }
    out
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms} ms")
    } else {
        format!("{:.1} s", ms as f64 / 1000.0)
    }
}

fn validation_label(status: ValidationStatus) -> &'static str {
    match status {
        ValidationStatus::Completed => "completed",
        ValidationStatus::Partial => "partial (one track failed)",
        ValidationStatus::Failed => "failed",
    }
}

fn adjudication_label(status: AdjudicationStatus) -> &'static str {
    match status {
        AdjudicationStatus::NotRequested => "not requested",
        AdjudicationStatus::Accepted => "accepted",
        AdjudicationStatus::Fallback => "fell back to rule-based merge",
    }
}
