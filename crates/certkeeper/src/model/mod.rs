//! Decoded ACME protocol objects and their persisted forms.

mod account;
mod authorization;
mod challenge;
mod order;

pub use account::{Account, AccountStatus};
pub use authorization::{Authorization, AuthorizationStatus, Identifier};
pub use challenge::{Challenge, ChallengeStatus, ChallengeType, HttpResource, ValidationStatus};
pub use order::{Order, OrderStatus, Problem};
