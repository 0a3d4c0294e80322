//! ACME account details.

use serde::{Deserialize, Serialize};

/// Account status as reported by the authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    None,
    Valid,
    Deactivated,
    Revoked,
}

/// A registered account, including the exported signing key the protocol
/// client needs to sign requests on its behalf.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Key identifier URL used in JWS headers
    pub kid: String,
    #[serde(default)]
    pub tos_link: Option<String>,
    pub id: String,
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default)]
    pub terms_of_service_agreed: bool,
    #[serde(default)]
    pub orders_url: Option<String>,
    #[serde(default)]
    pub initial_ip: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub agreement: Option<String>,
    /// JWS algorithm of the account key, e.g. `ES256`
    pub key_type: String,
    /// Account key as exported by the protocol client
    pub key_export: String,
}

impl Account {
    pub fn is_valid(&self) -> bool {
        self.status == AccountStatus::Valid
    }
}
