//! Error types for certificate issuance, storage and selection.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by an issuance run.
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Invalid or unsupported configuration. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// The authority reported an error payload or an invalid challenge/authorization
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The order resolved to the invalid state and has been discarded
    #[error("order is invalid: {0}")]
    InvalidOrder(String),

    /// A bounded wait ran out
    #[error("timed out after {waited:?} waiting for {stage}")]
    Timeout { stage: &'static str, waited: Duration },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl AcmeError {
    /// Whether re-running issuance later could succeed.
    ///
    /// Configuration errors need operator action first.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AcmeError::Config(_))
    }
}

/// Errors from the certificate, key, account and challenge stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid time range: from {from} is after to {to}")]
    InvalidRange { from: i64, to: i64 },

    #[error("challenge not found: {0}")]
    ChallengeNotFound(String),
}

/// Errors from key generation and certificate decoding.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("unsupported {algorithm} key size: {size}")]
    UnsupportedKeySize { algorithm: &'static str, size: u32 },

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("CSR generation failed: {0}")]
    Csr(String),

    #[error("invalid PEM: {0}")]
    Pem(String),

    #[error("invalid X.509 certificate: {0}")]
    Certificate(String),

    #[error("TLS key error: {0}")]
    Tls(#[from] rustls::Error),
}

/// A failed refresh of the selected certificate.
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("certificate lookup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("stored certificate is unusable: {0}")]
    Crypto(#[from] CryptoError),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for AcmeError {
    fn from(err: ConfigError) -> Self {
        AcmeError::Config(err.to_string())
    }
}
