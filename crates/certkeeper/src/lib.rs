//! Certkeeper
//!
//! Keeps a TLS server supplied with an ACME-issued certificate.
//!
//! - **Issuance**: [`IssuanceOrchestrator`] resumes account, order,
//!   challenge and finalization state from storage and drives it to a
//!   stored certificate. The wire protocol is plugged in through
//!   [`AcmeProtocol`].
//! - **Storage**: certificates and private keys are kept per order URL in
//!   bounded, time-indexed collections ([`CertStore`]); answered challenges
//!   live in the [`ChallengeLedger`].
//! - **Challenges**: [`ChallengeResponder`] serves
//!   `/.well-known/acme-challenge/` requests from the ledger.
//! - **Selection**: [`CertificateSelector`] keeps the best stored
//!   certificate loaded for rustls and swaps in renewals.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use certkeeper::{
//!     AccountStore, AcmeConfig, CertStore, CertificateSelector, ChallengeLedger,
//!     IssuanceOrchestrator, LocalDirectory, SelectorConfig,
//! };
//!
//! let blob = Arc::new(LocalDirectory::new("certkeeper".as_ref())?);
//! let certs = Arc::new(CertStore::new(blob.clone()));
//! let ledger = Arc::new(ChallengeLedger::new(blob.clone()));
//!
//! let selector = CertificateSelector::spawn(certs.clone(), SelectorConfig::default());
//! let mut orchestrator = IssuanceOrchestrator::new(
//!     AcmeConfig::new(vec!["example.com".into()], vec!["admin@example.com".into()]),
//!     protocol,
//!     Arc::new(AccountStore::new(blob)),
//!     certs,
//!     ledger,
//! )?;
//! orchestrator.run().await?;
//! ```

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod protocol;
pub mod responder;
pub mod selector;
pub mod storage;

pub use clock::{Clock, SystemClock};
pub use config::{AcmeConfig, CertkeeperConfig, SelectorConfig, StorageConfig};
pub use crypto::{IssuedCertificate, KeyAlgorithm};
pub use error::{AcmeError, ConfigError, CryptoError, SelectorError, StorageError};
pub use orchestrator::{IssuanceOrchestrator, RunOutcome};
pub use protocol::AcmeProtocol;
pub use responder::{ChallengeResponder, ChallengeResponse, ACME_CHALLENGE_PREFIX};
pub use selector::{CertificateSelector, SelectedCertificate, SelectorResolver};
pub use storage::{
    AccountStore, ActiveCertificate, BlobStore, CertStore, CertificateSource, ChallengeLedger,
    LocalDirectory, MemoryBlobStore,
};
