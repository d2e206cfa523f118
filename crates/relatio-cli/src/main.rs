mod display;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use relatio_ai::{ConsensusOrchestrator, HttpAdjudicator};
use relatio_core::{MatchConfig, Track};
use relatio_extract::{
    CommandConverter, Converter, HttpTrackExtractor, JsonFileTrack, MarkdownConverter,
    TrackExtractor,
};
use relatio_pipeline::{Pipeline, PipelineConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: u8 = 0;
const EXIT_PIPELINE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

/// Reconcile the references found in a SEBI circular by two independent extraction tracks.
#[derive(Parser, Debug)]
#[command(name = "relatio")]
#[command(version)]
struct Args {
    /// Circular to process. Markdown or text is read directly; anything else needs --convert-command.
    input: PathBuf,

    /// Root directory for `<stem>/<stem>_final.json`
    #[arg(short, long, env = "RELATIO_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Converter printing markdown on stdout, e.g. `docling --to md {input}`
    #[arg(long, env = "RELATIO_CONVERT_COMMAND")]
    convert_command: Option<String>,

    /// Track A source: extraction service URL or JSON candidate file
    #[arg(long, env = "RELATIO_TRACK_A")]
    track_a: String,

    /// Track B source: extraction service URL or JSON candidate file
    #[arg(long, env = "RELATIO_TRACK_B")]
    track_b: String,

    /// Adjudication service URL. Without it the rule-based merge is final.
    #[arg(long, env = "RELATIO_ADJUDICATOR_URL")]
    adjudicator_url: Option<String>,

    #[arg(long, env = "RELATIO_ADJUDICATOR_MODEL", default_value = "adjudicator")]
    adjudicator_model: String,

    #[arg(long, env = "RELATIO_ADJUDICATOR_API_KEY", hide_env_values = true)]
    adjudicator_api_key: Option<String>,

    /// Seconds
    #[arg(long, env = "RELATIO_CONVERSION_TIMEOUT", default_value_t = 300)]
    conversion_timeout: u64,

    /// Seconds, per track
    #[arg(long, env = "RELATIO_EXTRACTION_TIMEOUT", default_value_t = 600)]
    extraction_timeout: u64,

    /// Seconds
    #[arg(long, env = "RELATIO_ADJUDICATION_TIMEOUT", default_value_t = 120)]
    adjudication_timeout: u64,

    /// Minimum title token overlap for a fuzzy match (0.0-1.0)
    #[arg(long, env = "RELATIO_TITLE_OVERLAP", default_value_t = 0.8)]
    title_overlap: f64,

    /// Run Track A then Track B instead of both at once
    #[arg(long, env = "RELATIO_SEQUENTIAL")]
    sequential: bool,

    /// Write compact JSON
    #[arg(long, env = "RELATIO_COMPACT")]
    compact: bool,

    /// Skip saving the converted markdown and per-track candidates
    #[arg(long, env = "RELATIO_NO_INTERMEDIATE")]
    no_intermediate: bool,

    #[arg(long, env = "RELATIO_DEBUG")]
    debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "RELATIO_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(&args) {
        eprintln!("error: {e:#}");
        return ExitCode::from(EXIT_CONFIG);
    }
    info!("relatio v{}", env!("CARGO_PKG_VERSION"));

    let pipeline = match build_pipeline(&args) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match pipeline.run(&args.input).await {
        Ok(report) => {
            display::print_run_summary(&report);
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_PIPELINE)
        }
    }
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_env("RELATIO_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));

    match &args.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn build_pipeline(args: &Args) -> Result<Pipeline> {
    if !(0.0..=1.0).contains(&args.title_overlap) {
        bail!("--title-overlap must be between 0 and 1, got {}", args.title_overlap);
    }
    let match_config = MatchConfig {
        title_overlap_threshold: args.title_overlap,
    };
    let extraction_timeout = Duration::from_secs(args.extraction_timeout);

    let converter: Arc<dyn Converter> = match &args.convert_command {
        Some(cmd) => Arc::new(CommandConverter::parse(cmd).context("conversion command is empty or has unbalanced quotes")?),
        None => Arc::new(MarkdownConverter),
    };
    let track_a = track_source(Track::A, &args.track_a, extraction_timeout)?;
    let track_b = track_source(Track::B, &args.track_b, extraction_timeout)?;

    let mut consensus = ConsensusOrchestrator::new(match_config);
    if let Some(url) = &args.adjudicator_url {
        let adjudicator = HttpAdjudicator::new(
            url.clone(),
            args.adjudicator_model.clone(),
            args.adjudicator_api_key.clone(),
        );
        consensus = consensus.with_adjudicator(
            Arc::new(adjudicator),
            Duration::from_secs(args.adjudication_timeout),
        );
    }

    let config = PipelineConfig {
        output_dir: args.output_dir.clone(),
        conversion_timeout: Duration::from_secs(args.conversion_timeout),
        extraction_timeout,
        concurrent_tracks: !args.sequential,
        save_intermediate: !args.no_intermediate,
        pretty_json: !args.compact,
    };

    Ok(Pipeline::new(converter, track_a, track_b, consensus, config)?)
}

/// A URL selects the HTTP extraction service; anything else must be a candidate file.
fn track_source(track: Track, source: &str, timeout: Duration) -> Result<Arc<dyn TrackExtractor>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let extractor = HttpTrackExtractor::new(track, source.to_string())
            .with_request_timeout(timeout)
            .with_context(|| format!("cannot build {track} client"))?;
        return Ok(Arc::new(extractor));
    }
    let path = Path::new(source);
    if !path.is_file() {
        bail!("{track} source {source} is neither a URL nor an existing file");
    }
    Ok(Arc::new(JsonFileTrack::new(track, path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["relatio", "circular.md", "--track-a", "http://localhost:1", "--track-b", "http://localhost:2"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_map_onto_pipeline_config() {
        let pipeline = build_pipeline(&args(&[])).unwrap();
        let config = pipeline.config();
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert!(config.concurrent_tracks);
        assert!(config.save_intermediate);
        assert!(config.pretty_json);
        assert_eq!(config.extraction_timeout, Duration::from_secs(600));
    }

    #[test]
    fn flags_override_defaults() {
        let pipeline = build_pipeline(&args(&["--sequential", "--compact", "--no-intermediate", "--title-overlap", "0.6"])).unwrap();
        let config = pipeline.config();
        assert!(!config.concurrent_tracks);
        assert!(!config.save_intermediate);
        assert!(!config.pretty_json);
        assert_eq!(pipeline.consensus().match_config().title_overlap_threshold, 0.6);
    }

    #[test]
    fn missing_candidate_file_is_a_config_error() {
        let err = track_source(Track::A, "/nonexistent/track_a.json", Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("neither a URL nor an existing file"));
    }

    #[test]
    fn out_of_range_overlap_is_rejected() {
        assert!(build_pipeline(&args(&["--title-overlap", "1.5"])).is_err());
    }
}
