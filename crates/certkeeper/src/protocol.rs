//! Port to the wire-level ACME client.
//!
//! Implementations own the directory, nonces and JWS signing, and hand back
//! decoded objects. Responses carrying a problem document should be
//! reported as [`AcmeError::Protocol`]; the issuance run additionally checks
//! every order and challenge it receives.

use async_trait::async_trait;

use crate::error::AcmeError;
use crate::model::{Account, Authorization, Order};

#[async_trait]
pub trait AcmeProtocol: Send + Sync {
    /// Register a new account. `contacts` are URIs such as `mailto:admin@example.com`.
    async fn create_account(
        &self,
        contacts: &[String],
        terms_of_service_agreed: bool,
    ) -> Result<Account, AcmeError>;

    /// Sign all following requests as `account`.
    async fn use_account(&self, account: &Account) -> Result<(), AcmeError>;

    /// Create an order for the given DNS identifiers.
    async fn create_order(&self, domains: &[String]) -> Result<Order, AcmeError>;

    /// Fetch the current state of `order` from its URL.
    async fn get_order(&self, order: &Order) -> Result<Order, AcmeError>;

    /// Fetch an authorization. Its challenges inherit `order_expires`.
    async fn get_authorization(
        &self,
        url: &str,
        order_expires: i64,
    ) -> Result<Authorization, AcmeError>;

    /// Tell the authority a challenge is ready to be validated.
    async fn answer_challenge(&self, url: &str) -> Result<(), AcmeError>;

    /// Submit the DER-encoded CSR to the order's finalize URL.
    async fn finalize_order(&self, order: &Order, csr_der: &[u8]) -> Result<Order, AcmeError>;

    /// Download the PEM certificate chain of a valid order.
    async fn get_certificate(&self, order: &Order) -> Result<Vec<u8>, AcmeError>;
}
