//! ACME orders and the field-wise merge of a refreshed order with its
//! prior snapshot.

use serde::{Deserialize, Serialize};

use crate::error::AcmeError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    None,
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// Problem document returned by the authority (RFC 8555 section 6.7).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub status: Option<u16>,
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default)]
    pub status: OrderStatus,
    /// Expiry in epoch milliseconds, 0 when unknown
    #[serde(default)]
    pub expires: i64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub finalize_url: String,
    #[serde(default)]
    pub certificate_url: String,
    #[serde(default)]
    pub authorization_urls: Option<Vec<String>>,
    #[serde(default)]
    pub error: Option<Problem>,
}

impl Order {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires
    }

    pub fn has_certificate_url(&self) -> bool {
        !self.certificate_url.is_empty()
    }

    pub fn authorization_urls(&self) -> &[String] {
        self.authorization_urls.as_deref().unwrap_or_default()
    }

    /// Reject responses carrying a problem document or the invalid status.
    pub fn ensure_ok(&self) -> Result<(), AcmeError> {
        if let Some(ref problem) = self.error {
            return Err(AcmeError::Protocol(format!("order error {}", problem)));
        }
        if self.status == OrderStatus::Invalid {
            return Err(AcmeError::InvalidOrder(self.url.clone()));
        }
        Ok(())
    }

    /// Fill fields that are still empty from `prior`.
    ///
    /// Populated fields are never overwritten, so URLs known locally survive
    /// partial responses from the authority.
    pub fn merge(&mut self, prior: &Order) {
        if self.status == OrderStatus::None {
            self.status = prior.status;
        }
        if self.url.is_empty() {
            self.url = prior.url.clone();
        }
        if self.finalize_url.is_empty() {
            self.finalize_url = prior.finalize_url.clone();
        }
        if self.certificate_url.is_empty() {
            self.certificate_url = prior.certificate_url.clone();
        }
        if self.expires == 0 {
            self.expires = prior.expires;
        }
        if self.authorization_urls.is_none() {
            self.authorization_urls = prior.authorization_urls.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_order() -> Order {
        Order {
            status: OrderStatus::Pending,
            expires: 5000,
            url: "https://ca/order/1".to_string(),
            finalize_url: "https://ca/order/1/finalize".to_string(),
            certificate_url: "https://ca/cert/1".to_string(),
            authorization_urls: Some(vec!["https://ca/authz/1".to_string()]),
            error: None,
        }
    }

    #[test]
    fn test_merge_fills_empty_fields() {
        let prior = full_order();
        let mut refreshed = Order::default();

        refreshed.merge(&prior);

        assert_eq!(refreshed.status, OrderStatus::Pending);
        assert_eq!(refreshed.expires, 5000);
        assert_eq!(refreshed.url, prior.url);
        assert_eq!(refreshed.finalize_url, prior.finalize_url);
        assert_eq!(refreshed.certificate_url, prior.certificate_url);
        assert_eq!(refreshed.authorization_urls, prior.authorization_urls);
    }

    #[test]
    fn test_merge_never_overwrites_populated_fields() {
        let prior = full_order();
        let mut refreshed = Order {
            status: OrderStatus::Ready,
            expires: 9000,
            url: "https://ca/order/2".to_string(),
            finalize_url: "https://ca/order/2/finalize".to_string(),
            certificate_url: String::new(),
            authorization_urls: Some(Vec::new()),
            error: None,
        };

        refreshed.merge(&prior);

        assert_eq!(refreshed.status, OrderStatus::Ready);
        assert_eq!(refreshed.expires, 9000);
        assert_eq!(refreshed.url, "https://ca/order/2");
        assert_eq!(refreshed.finalize_url, "https://ca/order/2/finalize");
        // Only the empty certificate URL is taken over
        assert_eq!(refreshed.certificate_url, "https://ca/cert/1");
        // An empty but present list counts as populated
        assert_eq!(refreshed.authorization_urls, Some(Vec::new()));
    }

    #[test]
    fn test_is_expired_boundary() {
        let order = full_order();
        assert!(!order.is_expired(4999));
        assert!(order.is_expired(5000));
        assert!(order.is_expired(5001));
    }

    #[test]
    fn test_ensure_ok() {
        let mut order = full_order();
        assert!(order.ensure_ok().is_ok());

        order.status = OrderStatus::Invalid;
        assert!(matches!(order.ensure_ok(), Err(AcmeError::InvalidOrder(_))));

        order.status = OrderStatus::Pending;
        order.error = Some(Problem {
            kind: "urn:ietf:params:acme:error:malformed".to_string(),
            detail: "bad".to_string(),
            status: Some(400),
        });
        assert!(matches!(order.ensure_ok(), Err(AcmeError::Protocol(_))));
    }

    #[test]
    fn test_persisted_form() {
        let json = serde_json::to_value(full_order()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["finalizeUrl"], "https://ca/order/1/finalize");
        assert_eq!(json["authorizationUrls"][0], "https://ca/authz/1");
    }
}
