//! A track whose output was produced ahead of time and saved as JSON.

use std::path::PathBuf;

use async_trait::async_trait;
use relatio_core::{CandidateReference, Track, parse_track_output};
use tracing::info;

use crate::{CollaboratorError, TrackExtractor, TrackInput};

/// Replays a saved candidate list (e.g. a previous run's `<stem>_track_a.json`).
#[derive(Debug, Clone)]
pub struct JsonFileTrack {
    track: Track,
    path: PathBuf,
    name: String,
}

impl JsonFileTrack {
    pub fn new(track: Track, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("file:{}", path.display());
        Self { track, path, name }
    }
}

#[async_trait]
impl TrackExtractor for JsonFileTrack {
    fn track(&self) -> Track {
        self.track
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(
        &self,
        _input: TrackInput<'_>,
    ) -> Result<Vec<CandidateReference>, CollaboratorError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let candidates = parse_track_output(self.track, &text)?;
        info!(track = %self.track, path = %self.path.display(), count = candidates.len(), "loaded saved candidates");
        Ok(candidates)
    }
}
