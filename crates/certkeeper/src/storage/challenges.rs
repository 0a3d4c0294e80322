//! Challenge ledger.
//!
//! Issuance records every http-01 challenge it answers here; the challenge
//! endpoint looks challenges up by request path and marks them validated
//! once it has served the response. Issuance polls that validation status.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::{cull_oldest, read_document, write_document, BlobStore};
use crate::error::StorageError;
use crate::model::{Challenge, ValidationStatus};

const CHALLENGES_DOCUMENT: &str = "challenges.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChallengeCollection {
    #[serde(default)]
    challenges: BTreeMap<String, Challenge>,
}

/// Persistent challenge records keyed by challenge id.
pub struct ChallengeLedger {
    blob: Arc<dyn BlobStore>,
    lock: Mutex<()>,
}

impl ChallengeLedger {
    /// Create a ledger keeping its collection in `blob`.
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self {
            blob,
            lock: Mutex::new(()),
        }
    }

    /// Save a challenge and return its id.
    ///
    /// A challenge keeps the id it already carries. Otherwise it is keyed by
    /// its http resource URL, or a fresh random id when it has none. The
    /// assigned id is written back into `challenge`.
    pub async fn save(&self, challenge: &mut Challenge) -> Result<String, StorageError> {
        if challenge.id.is_empty() {
            challenge.id = if challenge.http_resource.url.is_empty() {
                Uuid::new_v4().simple().to_string()
            } else {
                challenge.http_resource.url.clone()
            };
        }

        let _guard = self.lock.lock().await;
        let mut collection = self.load().await?;

        let culled = cull_oldest(&mut collection.challenges, |record| record.expires);
        if !culled.is_empty() {
            info!(culled = culled.len(), "Too many saved challenges, culled oldest records");
        }

        collection
            .challenges
            .insert(challenge.id.clone(), challenge.clone());
        self.store(&collection).await?;

        debug!(
            challenge_id = %challenge.id,
            path = %challenge.http_resource.path,
            "Saved challenge"
        );
        Ok(challenge.id.clone())
    }

    /// Local validation status; unknown ids report [`ValidationStatus::None`].
    pub async fn validation_status(&self, id: &str) -> Result<ValidationStatus, StorageError> {
        let collection = self.load().await?;
        Ok(collection
            .challenges
            .get(id)
            .map(|challenge| challenge.validation_status)
            .unwrap_or_default())
    }

    /// Find the challenge whose resource path matches an inbound request
    /// path, ignoring leading and trailing slashes.
    pub async fn find_by_request_path(
        &self,
        request_path: &str,
    ) -> Result<Option<Challenge>, StorageError> {
        let collection = self.load().await?;
        let found = collection
            .challenges
            .into_values()
            .find(|challenge| challenge.matches_path(request_path));

        match found {
            Some(ref challenge) => {
                trace!(path = %request_path, challenge_id = %challenge.id, "Challenge found")
            }
            None => trace!(path = %request_path, "Challenge not found"),
        }
        Ok(found)
    }

    /// Mark a challenge as presented by the challenge endpoint.
    pub async fn complete_validation(&self, id: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut collection = self.load().await?;

        let challenge = collection
            .challenges
            .get_mut(id)
            .ok_or_else(|| StorageError::ChallengeNotFound(id.to_string()))?;
        challenge.validation_status = ValidationStatus::Validated;
        self.store(&collection).await?;

        info!(challenge_id = %id, "Challenge validation completed");
        Ok(())
    }

    /// All stored challenges, ordered by id.
    pub async fn list(&self) -> Result<Vec<Challenge>, StorageError> {
        Ok(self.load().await?.challenges.into_values().collect())
    }

    async fn load(&self) -> Result<ChallengeCollection, StorageError> {
        read_document(self.blob.as_ref(), CHALLENGES_DOCUMENT).await
    }

    async fn store(&self, collection: &ChallengeCollection) -> Result<(), StorageError> {
        write_document(self.blob.as_ref(), CHALLENGES_DOCUMENT, collection).await
    }
}

impl std::fmt::Debug for ChallengeLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeLedger").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChallengeType, HttpResource};
    use crate::storage::{MemoryBlobStore, CULL_COUNT, MAX_RECORDS};

    fn setup_ledger() -> ChallengeLedger {
        ChallengeLedger::new(Arc::new(MemoryBlobStore::new()))
    }

    fn http_challenge(token: &str) -> Challenge {
        Challenge {
            challenge_type: ChallengeType::Http01,
            url: format!("https://ca/chall/{}", token),
            http_resource: HttpResource {
                url: format!("http://example.com/.well-known/acme-challenge/{}", token),
                path: format!("/.well-known/acme-challenge/{}", token),
                content_type: "application/octet-stream".to_string(),
                value: format!("{}.thumbprint", token),
            },
            expires: 1000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_id_from_resource_url() {
        let ledger = setup_ledger();
        let mut challenge = Challenge {
            http_resource: HttpResource {
                url: "https://x/1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let id = ledger.save(&mut challenge).await.unwrap();
        assert_eq!(id, "https://x/1");
        assert_eq!(challenge.id, "https://x/1");
    }

    #[tokio::test]
    async fn test_generated_ids_are_distinct() {
        let ledger = setup_ledger();

        let first = ledger.save(&mut Challenge::default()).await.unwrap();
        let second = ledger.save(&mut Challenge::default()).await.unwrap();

        assert!(!first.is_empty());
        assert_ne!(first, second);
        assert_eq!(ledger.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_id_is_kept() {
        let ledger = setup_ledger();
        let mut challenge = http_challenge("abc");
        challenge.id = "fixed".to_string();

        assert_eq!(ledger.save(&mut challenge).await.unwrap(), "fixed");
        // Saving again never reassigns
        assert_eq!(ledger.save(&mut challenge).await.unwrap(), "fixed");
        assert_eq!(ledger.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_lifecycle() {
        let ledger = setup_ledger();
        let mut challenge = http_challenge("abc");
        let id = ledger.save(&mut challenge).await.unwrap();

        assert_eq!(ledger.validation_status(&id).await.unwrap(), ValidationStatus::None);
        ledger.complete_validation(&id).await.unwrap();
        assert_eq!(
            ledger.validation_status(&id).await.unwrap(),
            ValidationStatus::Validated
        );
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let ledger = setup_ledger();
        assert_eq!(
            ledger.validation_status("missing").await.unwrap(),
            ValidationStatus::None
        );
        assert!(matches!(
            ledger.complete_validation("missing").await,
            Err(StorageError::ChallengeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_by_request_path() {
        let ledger = setup_ledger();
        ledger.save(&mut http_challenge("abc")).await.unwrap();
        ledger.save(&mut http_challenge("def")).await.unwrap();

        let found = ledger
            .find_by_request_path(".well-known/acme-challenge/def/")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.http_resource.value, "def.thumbprint");

        assert!(ledger
            .find_by_request_path("/.well-known/acme-challenge/zzz")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_culls_by_expiry() {
        let ledger = setup_ledger();
        for i in 0..MAX_RECORDS as i64 {
            let mut challenge = http_challenge(&format!("t{}", i));
            challenge.expires = i;
            ledger.save(&mut challenge).await.unwrap();
        }

        ledger.save(&mut http_challenge("latest")).await.unwrap();

        let remaining = ledger.list().await.unwrap();
        assert_eq!(remaining.len(), MAX_RECORDS - CULL_COUNT + 1);
        assert!(remaining.iter().all(|c| c.expires >= CULL_COUNT as i64));
    }
}
