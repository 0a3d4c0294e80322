//! Auto-refreshing TLS certificate selection
//!
//! A background task keeps the best stored certificate loaded as rustls
//! signing material. Handshakes read the current selection lock-free; the
//! task is the only writer and never clears a selection once made.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SelectorConfig;
use crate::crypto::certified_key;
use crate::error::SelectorError;
use crate::storage::CertificateSource;

/// The certificate currently served.
#[derive(Debug)]
pub struct SelectedCertificate {
    pub key: Arc<CertifiedKey>,
    pub order_url: String,
    /// Epoch milliseconds
    pub not_after: i64,
}

type Selection = Arc<ArcSwapOption<SelectedCertificate>>;

/// Handle to a running selector.
///
/// Dropping the handle stops the background task.
pub struct CertificateSelector {
    current: Selection,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CertificateSelector {
    /// Start selecting from `source` using the system clock.
    pub fn spawn(source: Arc<dyn CertificateSource>, config: SelectorConfig) -> Self {
        Self::spawn_with_clock(source, config, Arc::new(SystemClock))
    }

    pub fn spawn_with_clock(
        source: Arc<dyn CertificateSource>,
        config: SelectorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let current: Selection = Arc::new(ArcSwapOption::empty());
        let cancel = CancellationToken::new();

        let refresher = Refresher {
            source,
            clock,
            threshold: config.refresh_threshold(),
            backoff: config.error_backoff(),
            current: current.clone(),
        };
        let task = tokio::spawn(refresher.run(cancel.clone()));

        Self {
            current,
            cancel,
            task: Some(task),
        }
    }

    /// The certificate to present to `host`. All hosts share one certificate.
    pub fn select(&self, _host: Option<&str>) -> Option<Arc<CertifiedKey>> {
        (*self.current.load()).as_ref().map(|selected| selected.key.clone())
    }

    /// Details of the current selection.
    pub fn selected(&self) -> Option<Arc<SelectedCertificate>> {
        self.current.load_full()
    }

    /// A resolver for a rustls `ServerConfig` that follows this selector.
    pub fn resolver(&self) -> Arc<SelectorResolver> {
        Arc::new(SelectorResolver {
            current: self.current.clone(),
        })
    }

    /// Stop the background task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Certificate selector task failed");
            }
        }
    }
}

impl Drop for CertificateSelector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for CertificateSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateSelector")
            .field("selected", &self.current.load_full().map(|s| s.order_url.clone()))
            .finish_non_exhaustive()
    }
}

/// Serves the selector's current certificate for every handshake.
pub struct SelectorResolver {
    current: Selection,
}

impl SelectorResolver {
    /// The signing material handed to every handshake, if any is selected.
    pub fn certificate(&self) -> Option<Arc<CertifiedKey>> {
        (*self.current.load()).as_ref().map(|s| s.key.clone())
    }
}

impl ResolvesServerCert for SelectorResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let selected = self.certificate();
        if selected.is_none() {
            debug!(server_name = ?client_hello.server_name(), "No certificate selected yet");
        }
        selected
    }
}

impl std::fmt::Debug for SelectorResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorResolver").finish_non_exhaustive()
    }
}

struct Refresher {
    source: Arc<dyn CertificateSource>,
    clock: Arc<dyn Clock>,
    threshold: Duration,
    backoff: Duration,
    current: Selection,
}

impl Refresher {
    async fn run(self, cancel: CancellationToken) {
        debug!(
            threshold_secs = self.threshold.as_secs(),
            backoff_secs = self.backoff.as_secs(),
            "Starting certificate selector"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let now = self.clock.now_millis();
            let had_error = match self.refresh(now).await {
                Ok(()) => false,
                Err(e) => {
                    warn!(error = %e, "Failed to refresh selected certificate");
                    true
                }
            };

            let cached_not_after = self.current.load_full().map(|s| s.not_after);
            let wait = next_wait(now, cached_not_after, had_error, self.threshold, self.backoff);
            trace!(wait_secs = wait.as_secs(), "Next certificate refresh");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        debug!("Certificate selector stopped");
    }

    /// Reload when nothing is cached or the cached certificate expires
    /// within the threshold.
    async fn refresh(&self, now: i64) -> Result<(), SelectorError> {
        let horizon = now.saturating_add(millis(self.threshold));

        if let Some(cached) = self.current.load_full() {
            if cached.not_after > horizon {
                return Ok(());
            }
        }

        let found = match self.source.get_active(now, horizon).await? {
            Some(active) => Some(active),
            None => self.source.get_active(0, now).await?,
        };
        let Some(active) = found else {
            debug!("No stored certificate to select");
            return Ok(());
        };

        let key = certified_key(&active.certificate_pem, &active.private_key_pem)?;

        let changed = self.current.load_full().map_or(true, |cached| {
            cached.order_url != active.order_url || cached.not_after != active.not_after
        });
        if changed {
            info!(
                order_url = %active.order_url,
                not_after = active.not_after,
                "Selected certificate"
            );
        }

        self.current.store(Some(Arc::new(SelectedCertificate {
            key,
            order_url: active.order_url,
            not_after: active.not_after,
        })));
        Ok(())
    }
}

/// Delay before the next refresh.
///
/// Backs off after errors and while nothing is cached. Otherwise sleeps
/// until four thresholds before expiry, then polls every half threshold.
pub fn next_wait(
    now: i64,
    cached_not_after: Option<i64>,
    had_error: bool,
    threshold: Duration,
    backoff: Duration,
) -> Duration {
    let Some(not_after) = cached_not_after else {
        return backoff;
    };
    if had_error {
        return backoff;
    }

    let remaining = not_after.saturating_sub(now);
    let early = millis(threshold).saturating_mul(4);
    if remaining > early {
        Duration::from_millis((remaining - early) as u64)
    } else {
        threshold / 2
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
