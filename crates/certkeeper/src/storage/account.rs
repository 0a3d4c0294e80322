//! Account and current-order documents.

use std::sync::Arc;

use tracing::{debug, info, trace};

use super::{read_document, write_document, BlobStore};
use crate::error::StorageError;
use crate::model::{Account, Order};

const ACCOUNT_DOCUMENT: &str = "account.json";
const ORDER_DOCUMENT: &str = "order.json";

/// Persists the registered account and the order in progress.
pub struct AccountStore {
    blob: Arc<dyn BlobStore>,
}

impl AccountStore {
    /// Create a store writing `account.json` and `order.json` to `blob`.
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self { blob }
    }

    /// Load the registered account, if one was saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read or is not valid JSON.
    pub async fn load_account(&self) -> Result<Option<Account>, StorageError> {
        let account: Option<Account> = read_document(self.blob.as_ref(), ACCOUNT_DOCUMENT).await?;
        match account {
            Some(ref account) => debug!(account_id = %account.id, "Loaded ACME account"),
            None => trace!("No stored ACME account found"),
        }
        Ok(account)
    }

    /// Save the registered account, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub async fn save_account(&self, account: &Account) -> Result<(), StorageError> {
        write_document(self.blob.as_ref(), ACCOUNT_DOCUMENT, account).await?;
        info!(account_id = %account.id, contact = ?account.contact, "Saved ACME account");
        Ok(())
    }

    /// Load the order in progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read or is not valid JSON.
    pub async fn load_order(&self) -> Result<Option<Order>, StorageError> {
        let order: Option<Order> = read_document(self.blob.as_ref(), ORDER_DOCUMENT).await?;
        if let Some(ref order) = order {
            debug!(order_url = %order.url, status = ?order.status, "Loaded order");
        }
        Ok(order)
    }

    /// Save the order in progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub async fn save_order(&self, order: &Order) -> Result<(), StorageError> {
        write_document(self.blob.as_ref(), ORDER_DOCUMENT, order).await?;
        debug!(order_url = %order.url, status = ?order.status, "Saved order");
        Ok(())
    }

    /// Forget the order in progress so the next run creates a new one.
    ///
    /// Deleting when no order is stored succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be removed.
    pub async fn delete_order(&self) -> Result<(), StorageError> {
        self.blob.delete(ORDER_DOCUMENT).await?;
        info!("Deleted stored order");
        Ok(())
    }
}

impl std::fmt::Debug for AccountStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountStore").finish_non_exhaustive()
    }
}
