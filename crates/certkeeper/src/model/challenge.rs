//! ACME challenges and their local validation state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Problem;
use crate::error::AcmeError;

/// Whether the local challenge endpoint has presented the response yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    #[default]
    None,
    Validated,
}

/// Challenge status as reported by the authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    #[default]
    None,
    Pending,
    Processing,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeType {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    /// Any type this crate cannot answer, e.g. `tls-alpn-01`
    #[serde(untagged)]
    Other(String),
}

impl ChallengeType {
    pub fn as_str(&self) -> &str {
        match self {
            ChallengeType::None => "none",
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::Other(s) => s,
        }
    }
}

impl FromStr for ChallengeType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "http-01" => ChallengeType::Http01,
            "dns-01" => ChallengeType::Dns01,
            "" | "none" => ChallengeType::None,
            other => ChallengeType::Other(other.to_string()),
        })
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resource an http-01 challenge expects to be served.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResource {
    /// Full URL the authority will fetch
    #[serde(default)]
    pub url: String,
    /// Request path, `/.well-known/acme-challenge/<token>`
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub content_type: String,
    /// Key authorization to return
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Ledger id; assigned on first save
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub status: ChallengeStatus,
    #[serde(rename = "type", default)]
    pub challenge_type: ChallengeType,
    #[serde(default)]
    pub error: Option<Problem>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub http_resource: HttpResource,
    /// Epoch milliseconds; inherited from the owning order
    #[serde(default)]
    pub expires: i64,
}

impl Challenge {
    pub fn ensure_ok(&self) -> Result<(), AcmeError> {
        if let Some(ref problem) = self.error {
            return Err(AcmeError::Protocol(format!("challenge error {}", problem)));
        }
        if self.status == ChallengeStatus::Invalid {
            return Err(AcmeError::Protocol(format!(
                "challenge {} status invalid",
                self.url
            )));
        }
        Ok(())
    }

    /// Whether `request_path` addresses this challenge's resource.
    ///
    /// Leading and trailing slashes are ignored on both sides.
    pub fn matches_path(&self, request_path: &str) -> bool {
        self.http_resource.path.trim_matches('/') == request_path.trim_matches('/')
    }
}
