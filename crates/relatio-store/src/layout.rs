//! Per-document output files.
//!
//! ```text
//! <output>/<stem>/<stem>.md            converted text (intermediate)
//! <output>/<stem>/<stem>_track_a.json  Track A candidates (intermediate)
//! <output>/<stem>/<stem>_track_b.json  Track B candidates (intermediate)
//! <output>/<stem>/<stem>_final.json    the envelope
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use relatio_core::{CandidateReference, Envelope, Track};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::StoreError;

/// Where one document's outputs go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    dir: PathBuf,
    stem: String,
}

impl OutputLayout {
    /// Layout for `input` under `output_root`, keyed by the input's file stem.
    pub fn for_input(output_root: &Path, input: &Path) -> Result<Self, StoreError> {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StoreError::InvalidInput(input.to_path_buf()))?
            .to_string();
        Ok(Self {
            dir: output_root.join(&stem),
            stem,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn envelope_path(&self) -> PathBuf {
        self.dir.join(format!("{}_final.json", self.stem))
    }

    pub fn markdown_path(&self) -> PathBuf {
        self.dir.join(format!("{}.md", self.stem))
    }

    pub fn track_path(&self, track: Track) -> PathBuf {
        let suffix = match track {
            Track::A => "track_a",
            Track::B => "track_b",
        };
        self.dir.join(format!("{}_{suffix}.json", self.stem))
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))
    }

    /// Persist the envelope in one step: written to a temporary file beside
    /// the target, then renamed over it. Readers never see a partial file.
    pub fn write_envelope(&self, envelope: &Envelope, pretty: bool) -> Result<PathBuf, StoreError> {
        let path = self.envelope_path();
        self.write_json_atomic(&path, envelope, pretty)?;
        info!(
            path = %path.display(),
            references = envelope.references.len(),
            "envelope written"
        );
        Ok(path)
    }

    pub fn write_markdown(&self, markdown: &str) -> Result<PathBuf, StoreError> {
        let path = self.markdown_path();
        self.ensure_dir()?;
        fs::write(&path, markdown).map_err(|e| StoreError::io(&path, e))?;
        debug!(path = %path.display(), "saved converted markdown");
        Ok(path)
    }

    pub fn write_candidates(
        &self,
        track: Track,
        candidates: &[CandidateReference],
        pretty: bool,
    ) -> Result<PathBuf, StoreError> {
        let path = self.track_path(track);
        self.write_json_atomic(&path, candidates, pretty)?;
        debug!(path = %path.display(), %track, count = candidates.len(), "saved track candidates");
        Ok(path)
    }

    fn write_json_atomic<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        value: &T,
        pretty: bool,
    ) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let json = if pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        tmp.write_all(&json).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(path)?;
        Ok(())
    }
}

/// Read a previously written envelope.
pub fn load_envelope(path: &Path) -> Result<Envelope, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}
