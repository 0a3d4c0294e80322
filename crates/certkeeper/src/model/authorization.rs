//! ACME authorizations: one proof obligation per identifier.

use serde::{Deserialize, Serialize};

use super::{Challenge, ChallengeType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    #[default]
    None,
    Pending,
    Processing,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(name: impl Into<String>) -> Self {
        Self {
            kind: "dns".to_string(),
            value: name.into(),
        }
    }
}

/// Authorization details, rebuilt from the authority on every fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    #[serde(default)]
    pub status: AuthorizationStatus,
    /// Epoch milliseconds
    #[serde(default)]
    pub expires: i64,
    #[serde(default)]
    pub wildcard: bool,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    pub fn is_pending(&self) -> bool {
        self.status == AuthorizationStatus::Pending
    }

    pub fn is_valid(&self) -> bool {
        self.status == AuthorizationStatus::Valid
    }

    /// Challenges of the given type, in the order the authority listed them.
    pub fn challenges_of<'a>(
        &'a self,
        challenge_type: &'a ChallengeType,
    ) -> impl Iterator<Item = &'a Challenge> + 'a {
        self.challenges
            .iter()
            .filter(move |c| &c.challenge_type == challenge_type)
    }
}
