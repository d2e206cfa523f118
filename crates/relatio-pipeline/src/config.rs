use std::path::PathBuf;
use std::time::Duration;

/// Runtime knobs for one pipeline instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Root under which `<stem>/<stem>_final.json` is written.
    pub output_dir: PathBuf,
    pub conversion_timeout: Duration,
    /// Applied to each track separately.
    pub extraction_timeout: Duration,
    /// Run both tracks at once; otherwise Track A, then Track B.
    pub concurrent_tracks: bool,
    /// Also save the markdown and each track's candidates.
    pub save_intermediate: bool,
    pub pretty_json: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            conversion_timeout: Duration::from_secs(300),
            extraction_timeout: Duration::from_secs(600),
            concurrent_tracks: true,
            save_intermediate: true,
            pretty_json: true,
        }
    }
}
