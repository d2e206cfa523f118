//! External adjudication of the rule-based merge.
//!
//! An adjudicator sees both candidate lists and the rule-based merge and
//! answers with a replacement merge. Its answer is raw text: nothing it says is
//! trusted until it has passed [`relatio_core::parse_adjudicated`].

use std::time::Duration;

use async_trait::async_trait;
use relatio_core::{CandidateReference, Reference, SourceDocument, ValidationError};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum AdjudicationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("answer failed validation: {0}")]
    Invalid(#[from] ValidationError),
}

impl AdjudicationError {
    /// Transport failures that a later attempt may not hit.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Server { .. })
    }
}

/// Everything the adjudicator is shown.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AdjudicationRequest<'a> {
    pub source_document: &'a SourceDocument,
    pub track_a: &'a [CandidateReference],
    pub track_b: &'a [CandidateReference],
    pub rule_based_merge: &'a [Reference],
}

#[async_trait]
pub trait Adjudicator: Send + Sync {
    /// Model or service name recorded in `models_used`.
    fn model(&self) -> &str;

    async fn adjudicate(&self, request: AdjudicationRequest<'_>) -> Result<String, AdjudicationError>;
}

#[derive(Serialize)]
struct AdjudicateBody<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: AdjudicationRequest<'a>,
}

/// Posts the request to `<base_url>/adjudicate` and returns the response body verbatim.
pub struct HttpAdjudicator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpAdjudicator {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }
}

#[async_trait]
impl Adjudicator for HttpAdjudicator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn adjudicate(&self, request: AdjudicationRequest<'_>) -> Result<String, AdjudicationError> {
        let url = format!("{}/adjudicate", self.base_url);
        let body = AdjudicateBody {
            model: &self.model,
            request,
        };

        info!(
            url = %url,
            model = %self.model,
            track_a = request.track_a.len(),
            track_b = request.track_b.len(),
            "requesting adjudication"
        );
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AdjudicationError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn only_transport_failures_are_transient() {
        let server = AdjudicationError::Server {
            status: 502,
            body: String::new(),
        };
        assert!(server.is_transient());
        assert!(!AdjudicationError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!AdjudicationError::Invalid(ValidationError::NoPayload).is_transient());
    }

    fn source() -> SourceDocument {
        SourceDocument {
            filename: "circular.pdf".into(),
            circular_title: "Review of Framework".into(),
            sebi_reference_number: Some("SEBI/HO/MIRSD/2024/120".into()),
            date_issued: None,
            total_pages: 1,
            processing_timestamp: "2026-01-21T06:30:00Z".into(),
        }
    }

    #[test]
    fn trims_trailing_slash_and_blank_key() {
        let adj = HttpAdjudicator::new("http://localhost:9000/".into(), "judge-1".into(), Some(String::new()));
        assert_eq!(adj.base_url, "http://localhost:9000");
        assert!(adj.api_key.is_none());
        assert_eq!(adj.model(), "judge-1");
    }

    #[tokio::test]
    async fn sends_bearer_token_and_returns_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/adjudicate")
                    .header("authorization", "Bearer secret");
                then.status(200).body("[]");
            })
            .await;

        let src = source();
        let adj = HttpAdjudicator::new(server.base_url(), "judge-1".into(), Some("secret".into()));
        let text = adj
            .adjudicate(AdjudicationRequest {
                source_document: &src,
                track_a: &[],
                track_b: &[],
                rule_based_merge: &[],
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(text, "[]");
    }

    #[tokio::test]
    async fn server_error_is_typed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/adjudicate");
                then.status(500).body("boom");
            })
            .await;

        let src = source();
        let adj = HttpAdjudicator::new(server.base_url(), "judge-1".into(), None);
        let err = adj
            .adjudicate(AdjudicationRequest {
                source_document: &src,
                track_a: &[],
                track_b: &[],
                rule_based_merge: &[],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AdjudicationError::Server { status: 500, .. }));
    }

    #[test]
    fn request_body_flattens_context() {
        let src = source();
        let body = AdjudicateBody {
            model: "judge-1",
            request: AdjudicationRequest {
                source_document: &src,
                track_a: &[],
                track_b: &[],
                rule_based_merge: &[],
            },
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["model"], "judge-1");
        assert_eq!(v["source_document"]["sebi_reference_number"], "SEBI/HO/MIRSD/2024/120");
        assert!(v["rule_based_merge"].as_array().unwrap().is_empty());
    }
}
