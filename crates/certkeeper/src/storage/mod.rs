//! Persistent state for issuance.
//!
//! Every store keeps one JSON document per collection on a [`BlobStore`]:
//!
//! ```text
//! account.json      # registered account and exported account key
//! order.json        # the order currently being worked on
//! certs.json        # {"certs": {<order url>: {val, notBefore, notAfter}}}
//! keys.json         # {"keys": {<order url>: {val, expires}}}
//! challenges.json   # {"challenges": {<challenge id>: {...}}}
//! ```
//!
//! Documents are rewritten whole on every change. Collections are bounded:
//! once a collection holds [`MAX_RECORDS`] entries, the next save first
//! drops the [`CULL_COUNT`] entries that expire soonest.

mod account;
mod blob;
mod certs;
mod challenges;

pub use account::AccountStore;
pub use blob::{BlobStore, LocalDirectory, MemoryBlobStore};
pub use certs::{ActiveCertificate, CertStore, CertificateSource};
pub use challenges::ChallengeLedger;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

/// Collection size at which a save culls old records first
pub const MAX_RECORDS: usize = 64;

/// Number of records removed by one cull
pub const CULL_COUNT: usize = 32;

/// Read a document, treating a missing or blank document as the default value.
async fn read_document<T>(blob: &dyn BlobStore, name: &str) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    match blob.read_text(name).await? {
        Some(json) if !json.trim().is_empty() => Ok(serde_json::from_str(&json)?),
        _ => Ok(T::default()),
    }
}

async fn write_document<T: Serialize>(
    blob: &dyn BlobStore,
    name: &str,
    document: &T,
) -> Result<(), StorageError> {
    let json = serde_json::to_string(document)?;
    blob.write_text(name, &json).await?;
    Ok(())
}

/// Remove the [`CULL_COUNT`] soonest-expiring records once the collection
/// is full. Returns the removed keys.
///
/// Ties on expiry are broken by key so culling is deterministic.
fn cull_oldest<T>(records: &mut BTreeMap<String, T>, expiry: impl Fn(&T) -> i64) -> Vec<String> {
    if records.len() < MAX_RECORDS {
        return Vec::new();
    }

    let mut by_expiry: Vec<(i64, &String)> =
        records.iter().map(|(key, record)| (expiry(record), key)).collect();
    by_expiry.sort();

    let victims: Vec<String> = by_expiry
        .into_iter()
        .take(CULL_COUNT)
        .map(|(_, key)| key.clone())
        .collect();

    for key in &victims {
        records.remove(key);
    }
    victims
}
