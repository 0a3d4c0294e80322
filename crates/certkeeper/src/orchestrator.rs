//! Issuance orchestration
//!
//! One [`IssuanceOrchestrator::run`] drives the certificate lifecycle from
//! whatever state was persisted last time: account, order, challenges,
//! authorizations, finalization and download. Every step is resumable, so a
//! run that fails or is interrupted can simply be started again.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::AcmeConfig;
use crate::crypto::{generate_key_and_csr, IssuedCertificate};
use crate::error::{AcmeError, CryptoError};
use crate::model::{
    Authorization, AuthorizationStatus, ChallengeType, Order, OrderStatus, ValidationStatus,
};
use crate::protocol::AcmeProtocol;
use crate::storage::{AccountStore, CertStore, ChallengeLedger};

/// Delay between polls of the ledger and the authority
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Ledger polls before local validation gives up
pub const DEFAULT_VALIDATION_ATTEMPTS: u32 = 60;

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A stored certificate already covers the renewal lead time; nothing
    /// was requested from the authority.
    AlreadyValid { order_url: String, not_after: i64 },
    /// A new certificate was issued and stored.
    Issued { order_url: String, not_after: i64 },
}

impl RunOutcome {
    /// Order that owns the certificate now stored.
    pub fn order_url(&self) -> &str {
        match self {
            RunOutcome::AlreadyValid { order_url, .. } | RunOutcome::Issued { order_url, .. } => {
                order_url
            }
        }
    }

    /// Expiry of that certificate, epoch milliseconds.
    pub fn not_after(&self) -> i64 {
        match self {
            RunOutcome::AlreadyValid { not_after, .. } | RunOutcome::Issued { not_after, .. } => {
                *not_after
            }
        }
    }
}

/// An authorization being watched, with the URL it is re-fetched from.
#[derive(Debug)]
struct TrackedAuthorization {
    url: String,
    authorization: Authorization,
}

/// Drives ACME issuance against the stores it shares with the challenge
/// responder and the certificate selector.
pub struct IssuanceOrchestrator {
    config: AcmeConfig,
    protocol: Arc<dyn AcmeProtocol>,
    accounts: Arc<AccountStore>,
    certs: Arc<CertStore>,
    ledger: Arc<ChallengeLedger>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    max_validation_attempts: u32,
}

impl IssuanceOrchestrator {
    /// Create an orchestrator, rejecting invalid configuration up front.
    ///
    /// # Errors
    ///
    /// Returns [`AcmeError::Config`] if `config` fails validation.
    pub fn new(
        config: AcmeConfig,
        protocol: Arc<dyn AcmeProtocol>,
        accounts: Arc<AccountStore>,
        certs: Arc<CertStore>,
        ledger: Arc<ChallengeLedger>,
    ) -> Result<Self, AcmeError> {
        config.validate()?;
        Ok(Self {
            config,
            protocol,
            accounts,
            certs,
            ledger,
            clock: Arc::new(SystemClock),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_validation_attempts: DEFAULT_VALIDATION_ATTEMPTS,
        })
    }

    /// Use `clock` instead of the system clock for expiry decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Change how often the authority is polled while waiting. Defaults
    /// to five seconds.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Get the validated configuration
    pub fn config(&self) -> &AcmeConfig {
        &self.config
    }

    /// Bring the stored certificate up to date.
    ///
    /// Returns immediately when a stored certificate is still valid
    /// `renew_before` from now. Otherwise resumes issuance from the persisted
    /// account and order. Taking `&mut self` keeps one instance from running
    /// twice at once.
    ///
    /// # Errors
    ///
    /// Protocol, storage and crypto failures are returned as they occur, as
    /// is a timeout while waiting on local validation, authorizations or the
    /// certificate. [`AcmeError::is_retryable`] tells whether a later run may
    /// succeed.
    pub async fn run(&mut self) -> Result<RunOutcome, AcmeError> {
        let result = self.run_once().await;
        if let Err(ref e) = result {
            error!(
                domains = ?self.config.domains,
                error = %e,
                retryable = e.is_retryable(),
                "Certificate issuance failed"
            );
        }
        result
    }

    async fn run_once(&self) -> Result<RunOutcome, AcmeError> {
        let start = Instant::now();
        let now = self.clock.now_millis();
        let renewal_point = now.saturating_add(duration_millis(self.config.renew_before()));

        if let Some(active) = self.certs.get_active(renewal_point, renewal_point).await? {
            info!(
                order_url = %active.order_url,
                not_after = active.not_after,
                "Stored certificate is still valid, skipping issuance"
            );
            return Ok(RunOutcome::AlreadyValid {
                order_url: active.order_url,
                not_after: active.not_after,
            });
        }

        info!(domains = ?self.config.domains, "Starting certificate issuance");

        self.resolve_account().await?;
        let order = self.resolve_order().await?;

        let mut authorizations = Vec::new();
        let mut challenge_ids = Vec::new();
        if order.status == OrderStatus::Pending {
            (authorizations, challenge_ids) = self.resolve_challenges(&order).await?;
        }

        self.wait_for_local_validation(challenge_ids).await?;
        self.wait_for_authorizations(&order, authorizations).await?;
        let outcome = self.resolve_certificate(order).await?;

        info!(
            order_url = %outcome.order_url(),
            not_after = outcome.not_after(),
            duration_secs = start.elapsed().as_secs(),
            "Certificate issued"
        );
        Ok(outcome)
    }

    async fn resolve_account(&self) -> Result<(), AcmeError> {
        let account = match self.accounts.load_account().await? {
            Some(account) => account,
            None => {
                let contacts = self.config.contact_uris();
                info!(contact = ?contacts, "Creating ACME account");
                let account = self
                    .protocol
                    .create_account(&contacts, self.config.accept_terms_of_service)
                    .await?;
                self.accounts.save_account(&account).await?;
                account
            }
        };

        if !account.is_valid() {
            warn!(account_id = %account.id, status = ?account.status, "ACME account is not valid");
        }
        self.protocol.use_account(&account).await
    }

    async fn resolve_order(&self) -> Result<Order, AcmeError> {
        let now = self.clock.now_millis();

        match self.accounts.load_order().await? {
            Some(order) if !order.is_expired(now) => {
                let order = self.refresh_order(&order).await?;
                self.accounts.save_order(&order).await?;
                Ok(order)
            }
            stored => {
                if let Some(expired) = stored {
                    info!(order_url = %expired.url, expires = expired.expires, "Stored order expired");
                    self.accounts.delete_order().await?;
                }

                let order = self.protocol.create_order(&self.config.domains).await?;
                self.check_order(&order).await?;
                self.accounts.save_order(&order).await?;
                info!(
                    order_url = %order.url,
                    expires = order.expires,
                    authorizations = order.authorization_urls().len(),
                    "Created order"
                );
                Ok(order)
            }
        }
    }

    /// Fetch the current state of `prior`, keeping locally known fields.
    async fn refresh_order(&self, prior: &Order) -> Result<Order, AcmeError> {
        let mut order = self.protocol.get_order(prior).await?;
        order.merge(prior);
        self.check_order(&order).await?;
        debug!(order_url = %order.url, status = ?order.status, "Refreshed order");
        Ok(order)
    }

    /// Fail on error payloads. An invalid order is discarded so the next run
    /// starts over.
    async fn check_order(&self, order: &Order) -> Result<(), AcmeError> {
        match order.ensure_ok() {
            Err(AcmeError::InvalidOrder(url)) => {
                warn!(order_url = %url, "Order is invalid, discarding it");
                self.accounts.delete_order().await?;
                Err(AcmeError::InvalidOrder(url))
            }
            result => result,
        }
    }

    /// Record and answer the http-01 challenges of every pending
    /// authorization.
    async fn resolve_challenges(
        &self,
        order: &Order,
    ) -> Result<(Vec<TrackedAuthorization>, Vec<String>), AcmeError> {
        let mut tracked = Vec::new();
        let mut challenge_ids = Vec::new();

        for url in order.authorization_urls() {
            let mut authorization = self.protocol.get_authorization(url, order.expires).await?;

            if authorization.is_pending() {
                let challenges: Vec<_> = authorization
                    .challenges_of(&ChallengeType::Http01)
                    .cloned()
                    .collect();

                for mut challenge in challenges {
                    challenge.ensure_ok()?;
                    if challenge.expires == 0 {
                        challenge.expires = order.expires;
                    }

                    let id = self.ledger.save(&mut challenge).await?;
                    challenge_ids.push(id);

                    self.protocol.answer_challenge(&challenge.url).await?;
                    info!(
                        domain = %authorization.identifier.value,
                        challenge_url = %challenge.url,
                        "Answered http-01 challenge"
                    );

                    authorization = self.protocol.get_authorization(url, order.expires).await?;
                    debug!(
                        authorization_url = %url,
                        status = ?authorization.status,
                        "Authorization after answering challenge"
                    );
                }
            } else {
                debug!(
                    authorization_url = %url,
                    status = ?authorization.status,
                    "Authorization needs no challenge"
                );
            }

            tracked.push(TrackedAuthorization {
                url: url.clone(),
                authorization,
            });
        }

        Ok((tracked, challenge_ids))
    }

    /// Wait until the challenge responder has served every saved challenge.
    async fn wait_for_local_validation(&self, mut pending: Vec<String>) -> Result<(), AcmeError> {
        for attempt in 0..self.max_validation_attempts {
            if pending.is_empty() {
                return Ok(());
            }
            if attempt > 0 {
                sleep(self.poll_interval).await;
            }

            let mut waiting = Vec::with_capacity(pending.len());
            for id in pending {
                match self.ledger.validation_status(&id).await? {
                    ValidationStatus::Validated => {
                        debug!(challenge_id = %id, "Challenge served");
                    }
                    ValidationStatus::None => waiting.push(id),
                }
            }
            pending = waiting;
        }

        if pending.is_empty() {
            return Ok(());
        }

        warn!(remaining = pending.len(), "Challenges were never requested by the authority");
        Err(AcmeError::Timeout {
            stage: "challenge validation",
            waited: self.poll_interval * self.max_validation_attempts.saturating_sub(1),
        })
    }

    /// Wait until the authority reports every tracked authorization valid.
    ///
    /// Authorizations arrive freshly fetched, so each round checks first and
    /// only re-fetches the ones not yet valid after a poll interval.
    async fn wait_for_authorizations(
        &self,
        order: &Order,
        mut tracked: Vec<TrackedAuthorization>,
    ) -> Result<(), AcmeError> {
        let budget = self.config.wait_for_authorizations();
        let deadline = Instant::now() + budget;

        loop {
            if let Some(entry) = tracked
                .iter()
                .find(|entry| entry.authorization.status == AuthorizationStatus::Invalid)
            {
                return Err(AcmeError::Protocol(format!(
                    "authorization {} for {} is invalid",
                    entry.url, entry.authorization.identifier.value
                )));
            }

            if tracked.iter().all(|entry| entry.authorization.is_valid()) {
                debug!(count = tracked.len(), "All authorizations valid");
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AcmeError::Timeout {
                    stage: "authorizations",
                    waited: budget,
                });
            }
            sleep(self.poll_interval.min(remaining)).await;

            for entry in tracked.iter_mut() {
                if !entry.authorization.is_valid() {
                    entry.authorization = self
                        .protocol
                        .get_authorization(&entry.url, order.expires)
                        .await?;
                    trace!(
                        authorization_url = %entry.url,
                        status = ?entry.authorization.status,
                        "Polled authorization"
                    );
                }
            }
        }
    }

    /// Finalize the order once ready, wait for the certificate URL, then
    /// download and store the certificate.
    async fn resolve_certificate(&self, order: Order) -> Result<RunOutcome, AcmeError> {
        let budget = self.config.wait_for_certificate();
        let deadline = Instant::now() + budget;
        let mut order = self.refresh_order(&order).await?;

        loop {
            if order.status == OrderStatus::Ready && !order.has_certificate_url() {
                order = self.finalize(order).await?;
            }
            if order.has_certificate_url() {
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AcmeError::Timeout {
                    stage: "certificate",
                    waited: budget,
                });
            }
            debug!(order_url = %order.url, status = ?order.status, "Waiting for certificate URL");
            sleep(self.poll_interval.min(remaining)).await;
            order = self.refresh_order(&order).await?;
        }

        self.accounts.save_order(&order).await?;

        let pem = self.protocol.get_certificate(&order).await?;
        let issued = IssuedCertificate::from_pem(pem)?;
        self.certs.save_certificate(&order.url, &issued).await?;

        Ok(RunOutcome::Issued {
            order_url: order.url,
            not_after: issued.not_after,
        })
    }

    async fn finalize(&self, order: Order) -> Result<Order, AcmeError> {
        let algorithm = self.config.key_algorithm().map_err(key_error)?;
        let generated = generate_key_and_csr(algorithm, self.config.key_size, &self.config.domains)
            .map_err(key_error)?;

        self.certs
            .save_key(&order.url, generated.private_key_pem.as_bytes(), order.expires)
            .await?;

        let mut finalized = self.protocol.finalize_order(&order, &generated.csr_der).await?;
        finalized.merge(&order);
        self.check_order(&finalized).await?;

        info!(order_url = %finalized.url, status = ?finalized.status, "Finalized order");
        Ok(finalized)
    }
}

impl std::fmt::Debug for IssuanceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuanceOrchestrator")
            .field("domains", &self.config.domains)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Unsupported key settings can only be fixed by the operator.
fn key_error(e: CryptoError) -> AcmeError {
    match e {
        CryptoError::UnsupportedAlgorithm(_) | CryptoError::UnsupportedKeySize { .. } => {
            AcmeError::Config(e.to_string())
        }
        other => AcmeError::Crypto(other),
    }
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
