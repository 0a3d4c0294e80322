//! Time-windowed certificate and private key store.
//!
//! Certificates and keys live in two parallel collections keyed by order
//! URL. They are culled independently, so a certificate may outlive its key
//! (or the reverse); lookups skip such records instead of failing.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use super::{cull_oldest, read_document, write_document, BlobStore};
use crate::crypto::IssuedCertificate;
use crate::error::StorageError;

const CERTS_DOCUMENT: &str = "certs.json";
const KEYS_DOCUMENT: &str = "keys.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CertCollection {
    #[serde(default)]
    certs: BTreeMap<String, CertRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertRecord {
    /// Base64 of the PEM certificate chain
    val: String,
    not_before: i64,
    not_after: i64,
}

impl CertRecord {
    /// Overlap with the window, where `from` excludes `not_after`.
    fn overlaps(&self, from: i64, to: i64) -> bool {
        self.not_after > from && self.not_before <= to
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyCollection {
    #[serde(default)]
    keys: BTreeMap<String, KeyRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyRecord {
    /// Base64 of the PEM private key
    val: String,
    expires: i64,
}

/// A stored certificate together with its private key.
#[derive(Clone, PartialEq, Eq)]
pub struct ActiveCertificate {
    pub order_url: String,
    /// PEM certificate chain
    pub certificate_pem: Vec<u8>,
    /// PEM private key
    pub private_key_pem: Vec<u8>,
    /// Epoch milliseconds
    pub not_before: i64,
    /// Epoch milliseconds
    pub not_after: i64,
}

impl std::fmt::Debug for ActiveCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCertificate")
            .field("order_url", &self.order_url)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Read side of the certificate store, as consumed by the selector.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// The longest-lived certificate with a key that is active somewhere in
    /// `[from, to)`.
    async fn get_active(&self, from: i64, to: i64) -> Result<Option<ActiveCertificate>, StorageError>;
}

/// Certificate and key collections on a blob store.
///
/// Each collection's read-modify-write cycle runs under its own mutex, so
/// the issuance run and the selector can share one store.
pub struct CertStore {
    blob: Arc<dyn BlobStore>,
    certs_lock: Mutex<()>,
    keys_lock: Mutex<()>,
}

impl CertStore {
    /// Create a store keeping its key and certificate collections in `blob`.
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self {
            blob,
            certs_lock: Mutex::new(()),
            keys_lock: Mutex::new(()),
        }
    }

    /// Find the certificate active in `[from, to)` with the greatest
    /// `not_after`. Certificates without a stored key are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidRange`] when `to < from`, and an error
    /// if either collection cannot be read or decoded.
    pub async fn get_active(
        &self,
        from: i64,
        to: i64,
    ) -> Result<Option<ActiveCertificate>, StorageError> {
        if to < from {
            return Err(StorageError::InvalidRange { from, to });
        }

        let certs: CertCollection = read_document(self.blob.as_ref(), CERTS_DOCUMENT).await?;
        let keys: KeyCollection = read_document(self.blob.as_ref(), KEYS_DOCUMENT).await?;

        let mut best: Option<(&String, &CertRecord, &KeyRecord)> = None;
        for (order_url, cert) in &certs.certs {
            let Some(key) = keys.keys.get(order_url) else {
                trace!(order_url = %order_url, "Skipping certificate without private key");
                continue;
            };
            if !cert.overlaps(from, to) {
                continue;
            }
            if best.map_or(true, |(_, current, _)| current.not_after < cert.not_after) {
                best = Some((order_url, cert, key));
            }
        }

        let Some((order_url, cert, key)) = best else {
            debug!(from = from, to = to, "No active certificate in window");
            return Ok(None);
        };

        debug!(
            order_url = %order_url,
            not_after = cert.not_after,
            "Found active certificate"
        );

        Ok(Some(ActiveCertificate {
            order_url: order_url.clone(),
            certificate_pem: STANDARD.decode(&cert.val)?,
            private_key_pem: STANDARD.decode(&key.val)?,
            not_before: cert.not_before,
            not_after: cert.not_after,
        }))
    }

    /// Store the private key generated for an order.
    ///
    /// A full collection first drops its [`CULL_COUNT`](super::CULL_COUNT)
    /// soonest-expiring keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the key collection cannot be read or written.
    pub async fn save_key(
        &self,
        order_url: &str,
        private_key_pem: &[u8],
        expires: i64,
    ) -> Result<(), StorageError> {
        let _guard = self.keys_lock.lock().await;

        let mut keys: KeyCollection = read_document(self.blob.as_ref(), KEYS_DOCUMENT).await?;
        let culled = cull_oldest(&mut keys.keys, |record| record.expires);
        if !culled.is_empty() {
            info!(culled = culled.len(), "Too many saved private keys, culled oldest records");
            for order_url in &culled {
                debug!(order_url = %order_url, "Removed private key");
            }
        }

        keys.keys.insert(
            order_url.to_string(),
            KeyRecord {
                val: STANDARD.encode(private_key_pem),
                expires,
            },
        );
        write_document(self.blob.as_ref(), KEYS_DOCUMENT, &keys).await?;

        info!(order_url = %order_url, expires = expires, "Saved private key");
        Ok(())
    }

    /// Store an issued certificate for an order, culling like
    /// [`save_key`](Self::save_key).
    pub async fn save_certificate(
        &self,
        order_url: &str,
        certificate: &IssuedCertificate,
    ) -> Result<(), StorageError> {
        let _guard = self.certs_lock.lock().await;

        let mut certs: CertCollection = read_document(self.blob.as_ref(), CERTS_DOCUMENT).await?;
        let culled = cull_oldest(&mut certs.certs, |record| record.not_after);
        if !culled.is_empty() {
            info!(culled = culled.len(), "Too many saved certificates, culled oldest records");
            for order_url in &culled {
                debug!(order_url = %order_url, "Removed certificate");
            }
        }

        certs.certs.insert(
            order_url.to_string(),
            CertRecord {
                val: STANDARD.encode(&certificate.pem),
                not_before: certificate.not_before,
                not_after: certificate.not_after,
            },
        );
        write_document(self.blob.as_ref(), CERTS_DOCUMENT, &certs).await?;

        info!(
            order_url = %order_url,
            not_before = certificate.not_before,
            not_after = certificate.not_after,
            "Saved certificate"
        );
        Ok(())
    }
}

#[async_trait]
impl CertificateSource for CertStore {
    async fn get_active(&self, from: i64, to: i64) -> Result<Option<ActiveCertificate>, StorageError> {
        CertStore::get_active(self, from, to).await
    }
}

impl std::fmt::Debug for CertStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertStore").finish_non_exhaustive()
    }
}
