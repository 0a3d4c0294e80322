//! HTTP-01 challenge endpoint
//!
//! Serves `/.well-known/acme-challenge/<token>` from the challenge ledger.
//! Serving a response marks the challenge validated, which is what the
//! issuance run waits for before polling the authority.

use std::sync::Arc;

use bytes::Bytes;
use http::{header, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::storage::ChallengeLedger;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Body and content type to answer a challenge request with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub content_type: String,
    pub body: String,
}

/// Answers challenge requests for an embedding HTTP server.
#[derive(Debug, Clone)]
pub struct ChallengeResponder {
    ledger: Arc<ChallengeLedger>,
}

impl ChallengeResponder {
    pub fn new(ledger: Arc<ChallengeLedger>) -> Self {
        Self { ledger }
    }

    /// Returns `Some(token)` if the path is under the challenge prefix.
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
    }

    /// Look up the challenge for `request_path` and mark it validated.
    ///
    /// Returns `None` when no stored challenge has this resource path.
    pub async fn respond(
        &self,
        request_path: &str,
    ) -> Result<Option<ChallengeResponse>, StorageError> {
        info!(path = %request_path, "Received challenge request");

        let Some(challenge) = self.ledger.find_by_request_path(request_path).await? else {
            debug!(path = %request_path, "No challenge for request path");
            return Ok(None);
        };

        self.ledger.complete_validation(&challenge.id).await?;

        let content_type = if challenge.http_resource.content_type.is_empty() {
            DEFAULT_CONTENT_TYPE.to_string()
        } else {
            challenge.http_resource.content_type
        };

        Ok(Some(ChallengeResponse {
            content_type,
            body: challenge.http_resource.value,
        }))
    }

    /// Full HTTP handling: 200 with the key authorization, or 404.
    ///
    /// Paths outside the challenge prefix are answered 404 without touching
    /// the ledger.
    pub async fn handle(&self, path: &str) -> Response<Bytes> {
        if Self::extract_token(path).is_none() {
            return not_found();
        }

        match self.respond(path).await {
            Ok(Some(response)) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, response.content_type)
                .body(Bytes::from(response.body))
                .unwrap_or_else(|_| not_found()),
            Ok(None) => not_found(),
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to answer challenge request");
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Bytes::new())
                    .unwrap_or_else(|_| not_found())
            }
        }
    }
}

fn not_found() -> Response<Bytes> {
    let mut response = Response::new(Bytes::from_static(b"NotFound"));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
