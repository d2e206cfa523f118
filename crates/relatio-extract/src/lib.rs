//! Collaborators that feed the reconciliation core: document conversion and
//! the two extraction tracks.
//!
//! Both are opaque producers behind async traits. The pipeline wraps every
//! call in a timeout and never inspects how a collaborator does its work.

pub mod convert;
pub mod file;
pub mod http;

use std::path::Path;

use async_trait::async_trait;
use relatio_core::{CandidateReference, SourceDocument, Track, ValidationError};
use thiserror::Error;

pub use convert::{CommandConverter, MarkdownConverter};
pub use file::JsonFileTrack;
pub use http::HttpTrackExtractor;

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("`{program}` exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("unusable output: {0}")]
    Output(#[from] ValidationError),
    #[error("{0}")]
    Unsupported(String),
}

/// Converted text plus what the converter learned about the document's structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub markdown: String,
    /// Page count as reported by the converter, if it knows.
    pub page_count: Option<u32>,
    pub has_tables: bool,
}

impl Converted {
    pub fn from_markdown(markdown: String, page_count: Option<u32>) -> Self {
        let has_tables = markdown
            .lines()
            .any(|l| l.trim_start().starts_with('|') && l.contains("---"));
        Self {
            markdown,
            page_count,
            has_tables,
        }
    }
}

/// Turns a raw input document into normalised markdown.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Short name recorded in `models_used`.
    fn name(&self) -> &str;

    async fn convert(&self, input: &Path) -> Result<Converted, CollaboratorError>;
}

/// What a track sees: the converted text, where it lives on disk, and the source's identity.
#[derive(Debug, Clone, Copy)]
pub struct TrackInput<'a> {
    pub markdown: &'a str,
    /// Saved markdown, for tracks that read or search the text themselves.
    pub markdown_path: Option<&'a Path>,
    pub source: &'a SourceDocument,
}

/// One independent extraction pass.
#[async_trait]
pub trait TrackExtractor: Send + Sync {
    fn track(&self) -> Track;

    /// Short name recorded in `models_used`.
    fn name(&self) -> &str;

    async fn extract(&self, input: TrackInput<'_>)
    -> Result<Vec<CandidateReference>, CollaboratorError>;
}
