//! HTTP client for a remote extraction service.

use std::time::Duration;

use async_trait::async_trait;
use relatio_core::{CandidateReference, Track, parse_track_output};
use serde::Serialize;
use tracing::info;

use crate::{CollaboratorError, TrackExtractor, TrackInput};

#[derive(Serialize)]
struct ExtractRequest<'a> {
    track: Track,
    filename: &'a str,
    circular_title: &'a str,
    markdown: &'a str,
}

/// Posts the converted text to `<base_url>/extract` and parses the reply as track output.
pub struct HttpTrackExtractor {
    client: reqwest::Client,
    base_url: String,
    track: Track,
    name: String,
}

impl HttpTrackExtractor {
    /// `base_url` should be like `http://localhost:8080` (a trailing slash is trimmed).
    pub fn new(track: Track, base_url: String) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            name: format!("http:{base_url}"),
            base_url,
            track,
        }
    }

    /// Bound each request independently of the pipeline's stage timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, CollaboratorError> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }
}

#[async_trait]
impl TrackExtractor for HttpTrackExtractor {
    fn track(&self) -> Track {
        self.track
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(
        &self,
        input: TrackInput<'_>,
    ) -> Result<Vec<CandidateReference>, CollaboratorError> {
        let url = format!("{}/extract", self.base_url);
        let body = ExtractRequest {
            track: self.track,
            filename: &input.source.filename,
            circular_title: &input.source.circular_title,
            markdown: input.markdown,
        };

        info!(url = %url, track = %self.track, bytes = input.markdown.len(), "requesting extraction");
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        let candidates = parse_track_output(self.track, &text)?;
        info!(track = %self.track, count = candidates.len(), "extraction complete");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use relatio_core::SourceDocument;

    fn source() -> SourceDocument {
        SourceDocument {
            filename: "circular.pdf".into(),
            circular_title: "Review of Framework".into(),
            sebi_reference_number: None,
            date_issued: None,
            total_pages: 1,
            processing_timestamp: "2026-01-21T06:30:00Z".into(),
        }
    }

    #[test]
    fn trims_trailing_slash() {
        let client = HttpTrackExtractor::new(Track::A, "http://localhost:8080/".into());
        assert_eq!(client.base_url, "http://localhost:8080");
        assert_eq!(client.name(), "http:http://localhost:8080");
    }

    #[tokio::test]
    async fn posts_markdown_and_parses_reply() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/extract")
                    .header("content-type", "application/json");
                then.status(200).json_body(serde_json::json!({
                    "references": [
                        {"referenced_sebi_number": "SEBI/HO/MIRSD/2023/105", "relationship_type": "SUPERSEDES"}
                    ]
                }));
            })
            .await;

        let src = source();
        let input = TrackInput {
            markdown: "[PAGE 1]\nbody",
            markdown_path: None,
            source: &src,
        };
        let client = HttpTrackExtractor::new(Track::B, server.base_url());
        let cands = client.extract(input).await.unwrap();

        mock.assert_async().await;
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].track, Track::B);
        assert_eq!(
            cands[0].reference.referenced_sebi_number.as_deref(),
            Some("SEBI/HO/MIRSD/2023/105")
        );
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/extract");
                then.status(503).body("overloaded");
            })
            .await;

        let src = source();
        let input = TrackInput {
            markdown: "",
            markdown_path: None,
            source: &src,
        };
        let err = HttpTrackExtractor::new(Track::A, server.base_url())
            .extract(input)
            .await
            .unwrap_err();
        match err {
            CollaboratorError::Server { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
