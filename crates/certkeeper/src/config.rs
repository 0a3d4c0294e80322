//! Configuration for issuance, storage and certificate selection.
//!
//! ```toml
//! [acme]
//! contact_emails = ["admin@example.com"]
//! domains = ["example.com", "www.example.com"]
//! accept_terms_of_service = true
//! key_algorithm = "ec"
//!
//! [storage]
//! directory = "/var/lib/certkeeper"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::KeyAlgorithm;
use crate::error::ConfigError;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertkeeperConfig {
    pub acme: AcmeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub selector: SelectorConfig,
}

impl CertkeeperConfig {
    /// Load and validate a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or
    /// fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), domains = ?config.acme.domains, "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.acme.validate()?;
        self.selector.validate()
    }
}

/// Issuance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// Account contact addresses, without the `mailto:` scheme
    pub contact_emails: Vec<String>,

    /// Domain names the certificate covers
    pub domains: Vec<String>,

    #[serde(default)]
    pub accept_terms_of_service: bool,

    /// `rsa` or `ec`
    #[serde(default = "default_key_algorithm")]
    pub key_algorithm: String,

    /// Key size in bits; algorithm default when absent
    #[serde(default)]
    pub key_size: Option<u32>,

    /// Seconds to wait for the authority to confirm authorizations
    #[serde(default = "default_wait_for_authorizations")]
    pub wait_for_authorizations: u64,

    /// Seconds to wait for the certificate URL after finalization
    #[serde(default = "default_wait_for_certificate")]
    pub wait_for_certificate: u64,

    /// Seconds of validity a stored certificate must still have for a run to skip issuance
    #[serde(default = "default_renew_before")]
    pub renew_before: u64,
}

fn default_key_algorithm() -> String { "ec".to_string() }
fn default_wait_for_authorizations() -> u64 { 60 }
fn default_wait_for_certificate() -> u64 { 360 }
fn default_renew_before() -> u64 { 3600 }

impl AcmeConfig {
    /// Minimal configuration for the given domains and contacts.
    pub fn new(domains: Vec<String>, contact_emails: Vec<String>) -> Self {
        Self {
            contact_emails,
            domains,
            accept_terms_of_service: true,
            key_algorithm: default_key_algorithm(),
            key_size: None,
            wait_for_authorizations: default_wait_for_authorizations(),
            wait_for_certificate: default_wait_for_certificate(),
            renew_before: default_renew_before(),
        }
    }

    /// Reject empty domain or contact lists, an unknown key algorithm and
    /// zero wait budgets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domains.is_empty() {
            return Err(ConfigError::Invalid("acme.domains must not be empty".to_string()));
        }
        if self.contact_emails.is_empty() {
            return Err(ConfigError::Invalid(
                "acme.contact_emails must not be empty".to_string(),
            ));
        }
        self.key_algorithm()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.wait_for_authorizations == 0 || self.wait_for_certificate == 0 {
            return Err(ConfigError::Invalid("acme wait budgets must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn key_algorithm(&self) -> Result<KeyAlgorithm, crate::error::CryptoError> {
        self.key_algorithm.parse()
    }

    /// Contacts as `mailto:` URIs.
    pub fn contact_uris(&self) -> Vec<String> {
        self.contact_emails
            .iter()
            .map(|email| format!("mailto:{}", email))
            .collect()
    }

    pub fn wait_for_authorizations(&self) -> Duration {
        Duration::from_secs(self.wait_for_authorizations)
    }

    pub fn wait_for_certificate(&self) -> Duration {
        Duration::from_secs(self.wait_for_certificate)
    }

    pub fn renew_before(&self) -> Duration {
        Duration::from_secs(self.renew_before)
    }
}

/// Where the store documents live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
}

fn default_storage_directory() -> PathBuf { PathBuf::from("certkeeper") }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_storage_directory(),
        }
    }
}

/// Refresh cadence of the certificate selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Seconds of remaining validity below which the cached certificate is refreshed
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold: u64,

    /// Seconds to wait after a failed refresh or while nothing is cached
    #[serde(default = "default_error_backoff")]
    pub error_backoff: u64,
}

fn default_refresh_threshold() -> u64 { 3600 }
fn default_error_backoff() -> u64 { 600 }

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            refresh_threshold: default_refresh_threshold(),
            error_backoff: default_error_backoff(),
        }
    }
}

impl SelectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_threshold == 0 || self.error_backoff == 0 {
            return Err(ConfigError::Invalid(
                "selector durations must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff)
    }
}
