//! Background token renewal

use std::{error::Error as StdError, sync::Arc, time::Duration};

use aliri_clock::{Clock, UnixTime};
use hubsas::SasToken;
use tokio::sync::watch;

use crate::{
    error::{renewal_stopped, transport_error, ProviderError, RenewalStopped},
    tls::TlsContextBuilder,
    CredentialProvider, SigningStrategy,
};

// The timer does not advance while the host is suspended, so long waits are broken
// into heartbeats and the clock is consulted again after each one.
const HEARTBEAT: Duration = Duration::from_secs(30);

/// Keeps a provider's token current in the background
///
/// The watcher publishes the latest token of its provider and renews it whenever it
/// reaches its proactive renewal point. Renewal stops once the token can no longer be
/// renewed or once every clone of the watcher has been dropped.
#[derive(Clone, Debug)]
pub struct RenewalWatcher {
    watcher: watch::Receiver<Arc<SasToken>>,
}

impl RenewalWatcher {
    /// Obtains a token from `provider` and spawns a task to keep it current
    ///
    /// # Errors
    ///
    /// The initial token could not be obtained.
    pub async fn spawn<B, C>(provider: Arc<CredentialProvider<B, C>>) -> Result<Self, ProviderError>
    where
        B: TlsContextBuilder + Send + Sync + 'static,
        B::Context: Send + Sync + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let initial = get_token_blocking(&provider, false, false).await?;
        let (tx, rx) = watch::channel(initial);

        let join = tokio::spawn(forever_renew(provider, tx));

        tokio::spawn(async move {
            if let Err(err) = join.await {
                if err.is_panic() {
                    tracing::error!("token renewal panicked");
                } else if err.is_cancelled() {
                    tracing::info!("token renewal was cancelled");
                }
            }
        });

        Ok(Self { watcher: rx })
    }

    /// The most recently published token
    #[must_use]
    pub fn token(&self) -> Arc<SasToken> {
        Arc::clone(&self.watcher.borrow())
    }

    /// Waits until a new token is published
    ///
    /// # Errors
    ///
    /// Renewal has stopped, so no new token will ever be published.
    pub async fn changed(&mut self) -> Result<(), RenewalStopped> {
        self.watcher.changed().await.map_err(|_| renewal_stopped())
    }
}

enum Delay {
    UntilTime(UnixTime),
    ForDuration(Duration),
}

async fn get_token_blocking<B, C>(
    provider: &Arc<CredentialProvider<B, C>>,
    proactive: bool,
    force: bool,
) -> Result<Arc<SasToken>, ProviderError>
where
    B: TlsContextBuilder + Send + Sync + 'static,
    B::Context: Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    let provider = Arc::clone(provider);
    tokio::task::spawn_blocking(move || provider.get_token(proactive, force))
        .await
        .map_err(|err| ProviderError::from(transport_error(err)))?
}

fn next_renewal<B, C>(provider: &CredentialProvider<B, C>, token: &SasToken) -> Delay
where
    B: TlsContextBuilder,
    C: Clock,
{
    let renewal = provider.renewal_config();
    match provider.strategy() {
        SigningStrategy::Callback(_) => {
            Delay::ForDuration(Duration::from_millis(renewal.millis_before_proactive_renewal()))
        }
        SigningStrategy::ExternalToken(_) => Delay::UntilTime(token.expiry()),
        SigningStrategy::SymmetricKey(_) | SigningStrategy::Hsm(_) => {
            Delay::UntilTime(renewal.proactive_renewal_at(token))
        }
    }
}

async fn forever_renew<B, C>(
    provider: Arc<CredentialProvider<B, C>>,
    tx: watch::Sender<Arc<SasToken>>,
) where
    B: TlsContextBuilder + Send + Sync + 'static,
    B::Context: Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    loop {
        let current = Arc::clone(&tx.borrow());

        match next_renewal(&provider, &current) {
            Delay::ForDuration(d) => {
                tracing::trace!(delay_ms = d.as_millis() as u64, "waiting to renew token");
                tokio::time::sleep(d).await;
            }
            Delay::UntilTime(t) => loop {
                if tx.is_closed() {
                    tracing::info!("no one is listening for token renewals anymore, halting renewal");
                    return;
                }

                let now = provider.clock().now();
                if now >= t {
                    tracing::trace!(renew_at = t.0, now = now.0, "token due for renewal");
                    break;
                }

                let until_due = Duration::from_secs(t.0 - now.0);
                let delay = until_due.min(HEARTBEAT);
                tracing::trace!(
                    delay = delay.as_secs(),
                    until_due = until_due.as_secs(),
                    "token not yet due, sleeping"
                );
                tokio::time::sleep(delay).await;
            },
        }

        tracing::debug!("renewing token");
        match get_token_blocking(&provider, true, false).await {
            Ok(token) => {
                if Arc::ptr_eq(&token, &current) {
                    continue;
                }

                let expiry = token.expiry();
                if tx.send(token).is_err() {
                    tracing::info!("no one is listening for token renewals anymore, halting renewal");
                    return;
                }

                tracing::debug!(expiry = expiry.0, "published renewed token");
            }
            Err(err) if err.is_unrecoverable() => {
                let error: &(dyn StdError + 'static) = &err;
                tracing::error!(
                    error,
                    "token can no longer be renewed, halting renewal"
                );
                return;
            }
            Err(err) => {
                {
                    let error: &(dyn StdError + 'static) = &err;
                    tracing::warn!(
                        error,
                        retry_in = HEARTBEAT.as_secs(),
                        "error renewing token, will retry"
                    );
                }
                tokio::time::sleep(HEARTBEAT).await;
            }
        }
    }
}
