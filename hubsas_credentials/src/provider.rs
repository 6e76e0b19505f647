//! The credential provider state machine

use std::{
    convert::TryFrom,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use aliri_clock::{Clock, System, UnixTime};
use hubsas::{ResourceScope, SasToken};

use crate::{
    error::{config_error, tls_config_error, token_expired, ConfigError, ProviderError},
    tls::{DefaultTlsBuilder, TlsContextBuilder, TlsSlot},
    ConnectionString, DeviceIdentity, RenewalConfig, SigningStrategy, TrustedCertificate,
};

/// A credential's lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialState {
    /// The token is valid and not yet due for renewal
    Fresh,

    /// The token is expired or due for renewal, or no token has been obtained yet
    Stale,

    /// The token has expired and cannot be renewed
    Unrecoverable,
}

struct TlsState<C> {
    trusted: Option<TrustedCertificate>,
    slot: TlsSlot<C>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Provides current shared access signatures and TLS contexts for one identity
///
/// The current token is only ever replaced, never modified, so concurrent callers
/// always observe a complete token.
pub struct CredentialProvider<B: TlsContextBuilder = DefaultTlsBuilder, C = System> {
    identity: DeviceIdentity,
    scope: ResourceScope,
    strategy: SigningStrategy,
    renewal: Mutex<RenewalConfig>,
    current: Mutex<Option<Arc<SasToken>>>,
    tls: Mutex<TlsState<B::Context>>,
    tls_builder: B,
    clock: C,
}

impl<B: TlsContextBuilder, C> fmt::Debug for CredentialProvider<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tls = lock(&self.tls);
        f.debug_struct("CredentialProvider")
            .field("identity", &self.identity)
            .field("strategy", &self.strategy)
            .field("renewal", &*lock(&self.renewal))
            .field("current", &*lock(&self.current))
            .field("trusted", &tls.trusted)
            .field("tls", &tls.slot)
            .finish()
    }
}

impl CredentialProvider {
    /// Starts building a provider for `identity`
    pub fn builder(identity: DeviceIdentity) -> CredentialProviderBuilder {
        CredentialProviderBuilder::new(identity)
    }

    /// Builds a provider from a device connection string
    ///
    /// # Errors
    ///
    /// The connection string is invalid or names an X.509 identity, or the initial
    /// token could not be obtained.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, ProviderError> {
        let (identity, credential) = connection_string.parse::<ConnectionString>()?.into_parts();
        let strategy = SigningStrategy::try_from(credential)?;
        Self::builder(identity).build(strategy)
    }
}

impl<B, C> CredentialProvider<B, C>
where
    B: TlsContextBuilder,
    C: Clock,
{
    /// The identity this provider authenticates
    #[inline]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The resource scope tokens are signed for
    #[inline]
    pub fn scope(&self) -> &ResourceScope {
        &self.scope
    }

    /// The bound signing strategy
    #[inline]
    pub fn strategy(&self) -> &SigningStrategy {
        &self.strategy
    }

    /// The current renewal configuration
    pub fn renewal_config(&self) -> RenewalConfig {
        *lock(&self.renewal)
    }

    /// The clock used to decide when tokens expire
    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The most recently obtained token, without checking whether it is still valid
    pub fn current_token(&self) -> Option<Arc<SasToken>> {
        lock(&self.current).clone()
    }

    /// Whether the bound strategy is able to renew tokens
    #[inline]
    pub fn can_refresh_token(&self) -> bool {
        self.strategy.can_refresh()
    }

    /// Whether the caller must supply a new credential before connecting again
    pub fn is_manual_renewal_necessary(&self) -> bool {
        let now = self.clock.now();
        lock(&self.current)
            .as_deref()
            .map_or(false, |token| self.strategy.needs_manual_renewal(token, now))
    }

    /// The lifecycle state of the current token
    pub fn state(&self) -> CredentialState {
        let now = self.clock.now();
        let renewal = self.renewal_config();
        let current = lock(&self.current);

        let token = match current.as_deref() {
            Some(token) => token,
            None => return CredentialState::Stale,
        };

        if self.strategy.needs_manual_renewal(token, now) {
            CredentialState::Unrecoverable
        } else if token.is_expired_at(now)
            || (self.strategy.can_refresh()
                && self.strategy.owns_token_lifetime()
                && renewal.should_refresh(token, now, true))
        {
            CredentialState::Stale
        } else {
            CredentialState::Fresh
        }
    }

    /// Gets a current token
    ///
    /// A new token is minted when `force` is set, when the current token has expired,
    /// or, with `proactive` set, when the current token has reached its renewal point.
    /// Otherwise the current token is returned as is. Callback tokens are obtained
    /// anew on every call.
    ///
    /// # Errors
    ///
    /// A new token could not be obtained, or an externally supplied token has
    /// expired. In the latter case the error is
    /// [`Unrecoverable`][ProviderError::Unrecoverable] and the caller must supply
    /// a new credential.
    pub fn get_token(&self, proactive: bool, force: bool) -> Result<Arc<SasToken>, ProviderError> {
        let now = self.clock.now();

        match &self.strategy {
            SigningStrategy::Callback(_) => self.token_from_callback(now),
            SigningStrategy::ExternalToken(token) => self.external_token(token, now),
            SigningStrategy::SymmetricKey(_) | SigningStrategy::Hsm(_) => {
                self.minted_token(now, proactive, force)
            }
        }
    }

    fn token_from_callback(&self, now: UnixTime) -> Result<Arc<SasToken>, ProviderError> {
        let token = Arc::new(self.strategy.mint(&self.scope, now)?);

        if token.is_expired_at(now) {
            tracing::warn!(
                expiry = token.expiry().0,
                now = now.0,
                "token callback returned an expired token"
            );
        } else {
            tracing::trace!(expiry = token.expiry().0, "obtained token from callback");
        }

        *lock(&self.current) = Some(Arc::clone(&token));
        Ok(token)
    }

    fn external_token(
        &self,
        supplied: &SasToken,
        now: UnixTime,
    ) -> Result<Arc<SasToken>, ProviderError> {
        let token = Arc::clone(
            lock(&self.current).get_or_insert_with(|| Arc::new(supplied.clone())),
        );

        if token.is_expired_at(now) {
            tracing::error!(
                expiry = token.expiry().0,
                now = now.0,
                "supplied token has expired and cannot be renewed"
            );
            return Err(token_expired(token.expiry()).into());
        }

        tracing::trace!(expiry = token.expiry().0, "supplied token is still valid");
        Ok(token)
    }

    fn minted_token(
        &self,
        now: UnixTime,
        proactive: bool,
        force: bool,
    ) -> Result<Arc<SasToken>, ProviderError> {
        let renewal = self.renewal_config();
        let mut current = lock(&self.current);

        if let Some(token) = current.as_ref() {
            if !force && !renewal.should_refresh(token, now, proactive) {
                tracing::trace!(
                    expiry = token.expiry().0,
                    now = now.0,
                    "token is fresh"
                );
                return Ok(Arc::clone(token));
            }
        }

        let expiry = renewal.next_expiry(now);
        let token = Arc::new(self.strategy.mint(&self.scope, expiry)?);

        tracing::debug!(
            expiry = expiry.0,
            now = now.0,
            forced = force,
            scope = %self.scope,
            "minted new token"
        );

        *current = Some(Arc::clone(&token));
        Ok(token)
    }

    /// Sets the lifetime of tokens minted from now on
    ///
    /// # Errors
    ///
    /// The value is zero, or the lifetime of tokens is owned by a callback.
    pub fn set_token_valid_secs(&self, token_valid_secs: u64) -> Result<(), ConfigError> {
        self.ensure_owns_token_lifetime()?;
        let mut renewal = lock(&self.renewal);
        *renewal = renewal.with_token_valid_secs(token_valid_secs)?;
        tracing::debug!(token_valid_secs, "updated token lifetime");
        Ok(())
    }

    /// Sets the percentage of a token's lifetime after which it is renewed proactively
    ///
    /// # Errors
    ///
    /// The value is outside `1..=100`, or the lifetime of tokens is owned by a callback.
    pub fn set_time_buffer_percent(&self, time_buffer_percent: u8) -> Result<(), ConfigError> {
        self.ensure_owns_token_lifetime()?;
        let mut renewal = lock(&self.renewal);
        *renewal = renewal.with_time_buffer_percent(time_buffer_percent)?;
        tracing::debug!(time_buffer_percent, "updated time buffer");
        Ok(())
    }

    fn ensure_owns_token_lifetime(&self) -> Result<(), ConfigError> {
        if self.strategy.owns_token_lifetime() {
            Ok(())
        } else {
            Err(config_error(
                "the lifetime of callback tokens is controlled by the callback",
            ))
        }
    }

    /// The currently configured trusted certificate
    pub fn trusted_certificate(&self) -> Option<TrustedCertificate> {
        lock(&self.tls).trusted.clone()
    }

    /// Trusts `trusted` in TLS contexts built from now on
    ///
    /// The cached context is invalidated only when the value differs from the one
    /// currently configured. The context is not rebuilt until it is next requested.
    pub fn set_trusted_certificate(&self, trusted: TrustedCertificate) {
        self.replace_trusted_certificate(Some(trusted));
    }

    /// Stops trusting any additional certificate
    pub fn clear_trusted_certificate(&self) {
        self.replace_trusted_certificate(None);
    }

    fn replace_trusted_certificate(&self, trusted: Option<TrustedCertificate>) {
        let mut tls = lock(&self.tls);
        if tls.trusted != trusted {
            tracing::debug!("trusted certificate changed, invalidating TLS context");
            tls.trusted = trusted;
            tls.slot = TlsSlot::Dirty;
        }
    }

    /// Gets the TLS context, building it if the cached one is out of date
    ///
    /// # Errors
    ///
    /// The context could not be built. The cache stays invalid, so the next call
    /// tries again.
    pub fn get_ssl_context(&self) -> Result<Arc<B::Context>, ProviderError> {
        let mut tls = lock(&self.tls);

        if let TlsSlot::Clean(context) = &tls.slot {
            return Ok(Arc::clone(context));
        }

        let context = self
            .tls_builder
            .build(tls.trusted.as_ref())
            .map_err(tls_config_error)?;
        let context = Arc::new(context);

        tracing::info!(
            custom_trust = tls.trusted.is_some(),
            "built TLS context"
        );

        tls.slot = TlsSlot::Clean(Arc::clone(&context));
        Ok(context)
    }
}

/// Builds a [`CredentialProvider`]
pub struct CredentialProviderBuilder<B = DefaultTlsBuilder, C = System> {
    identity: DeviceIdentity,
    renewal: RenewalConfig,
    trusted: Option<TrustedCertificate>,
    tls_builder: B,
    clock: C,
}

impl<B, C> fmt::Debug for CredentialProviderBuilder<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredentialProviderBuilder")
            .field("identity", &self.identity)
            .field("renewal", &self.renewal)
            .field("trusted", &self.trusted)
            .finish()
    }
}

impl CredentialProviderBuilder {
    /// Starts building a provider for `identity` with the default configuration
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            renewal: RenewalConfig::default(),
            trusted: None,
            tls_builder: DefaultTlsBuilder::default(),
            clock: System,
        }
    }
}

impl<B, C> CredentialProviderBuilder<B, C> {
    /// Sets the lifetime and renewal point of minted tokens
    #[must_use]
    pub fn with_renewal_config(mut self, renewal: RenewalConfig) -> Self {
        self.renewal = renewal;
        self
    }

    /// Sets an additional certificate to trust in TLS contexts
    #[must_use]
    pub fn with_trusted_certificate(mut self, trusted: TrustedCertificate) -> Self {
        self.trusted = Some(trusted);
        self
    }

    /// Sets the builder of TLS contexts
    pub fn with_tls_builder<B2>(self, tls_builder: B2) -> CredentialProviderBuilder<B2, C> {
        CredentialProviderBuilder {
            identity: self.identity,
            renewal: self.renewal,
            trusted: self.trusted,
            tls_builder,
            clock: self.clock,
        }
    }

    /// Sets the clock used to decide when tokens expire
    pub fn with_clock<C2>(self, clock: C2) -> CredentialProviderBuilder<B, C2> {
        CredentialProviderBuilder {
            identity: self.identity,
            renewal: self.renewal,
            trusted: self.trusted,
            tls_builder: self.tls_builder,
            clock,
        }
    }

    /// Builds the provider, bound to `strategy`
    ///
    /// Strategies that sign tokens mint the initial token immediately.
    ///
    /// # Errors
    ///
    /// The initial token could not be minted.
    pub fn build(self, strategy: SigningStrategy) -> Result<CredentialProvider<B, C>, ProviderError>
    where
        B: TlsContextBuilder,
        C: Clock,
    {
        let scope = self.identity.scope();

        let initial = match &strategy {
            SigningStrategy::SymmetricKey(_) | SigningStrategy::Hsm(_) => {
                let expiry = self.renewal.next_expiry(self.clock.now());
                Some(Arc::new(strategy.mint(&scope, expiry)?))
            }
            SigningStrategy::ExternalToken(token) => Some(Arc::new(token.clone())),
            SigningStrategy::Callback(_) => None,
        };

        tracing::debug!(
            scope = %scope,
            strategy = ?strategy,
            expiry = initial.as_ref().map(|t| t.expiry().0),
            "built credential provider"
        );

        Ok(CredentialProvider {
            identity: self.identity,
            scope,
            strategy,
            renewal: Mutex::new(self.renewal),
            current: Mutex::new(initial),
            tls: Mutex::new(TlsState {
                trusted: self.trusted,
                slot: TlsSlot::Dirty,
            }),
            tls_builder: self.tls_builder,
            clock: self.clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Barrier,
        },
        thread,
        time::Duration,
    };

    use color_eyre::Result;
    use hubsas::{DeviceId, SharedAccessKey, Signer, SymmetricKey};
    use tracing_test::traced_test;

    use super::*;
    use crate::{test::ManualClock, NoTls};

    const NOW: UnixTime = UnixTime(1_700_000_000);

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("h", DeviceId::from_static("d")).unwrap()
    }

    fn builder(clock: &ManualClock) -> CredentialProviderBuilder<NoTls, ManualClock> {
        CredentialProvider::builder(identity())
            .with_tls_builder(NoTls)
            .with_clock(clock.clone())
    }

    #[derive(Clone, Debug, Default)]
    struct CountingSigner {
        calls: Arc<AtomicUsize>,
        latency: Duration,
    }

    impl Signer for CountingSigner {
        type Error = Infallible;

        fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, Infallible> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.latency);
            SymmetricKey::from_raw(&b"secret"[..]).sign(key_id, data)
        }
    }

    #[test]
    #[traced_test]
    fn symmetric_key_tokens_are_reused_until_due() -> Result<()> {
        let clock = ManualClock::new(NOW);
        let provider = builder(&clock).build(SigningStrategy::symmetric_key(
            SharedAccessKey::from_static("c2VjcmV0"),
        )?)?;

        let first = provider.get_token(false, false)?;
        let parsed = SasToken::parse(first.as_str())?;
        assert_eq!(parsed.expiry(), UnixTime(NOW.0 + 3601));
        assert_eq!(parsed.resource_uri(), "h%2Fdevices%2Fd");

        let second = provider.get_token(false, false)?;
        assert_eq!(first.as_str(), second.as_str());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(logs_contain("token is fresh"));

        clock.advance(1);
        let forced = provider.get_token(false, true)?;
        assert_eq!(forced.expiry(), UnixTime(NOW.0 + 3602));
        assert_ne!(forced.signature(), first.signature());
        assert!(logs_contain("minted new token"));

        Ok(())
    }

    #[test]
    fn force_always_invokes_the_signer() -> Result<()> {
        let clock = ManualClock::new(NOW);
        let signer = CountingSigner::default();
        let provider = builder(&clock).build(SigningStrategy::hsm(signer.clone(), "primary"))?;
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);

        provider.get_token(true, false)?;
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);

        provider.get_token(false, true)?;
        provider.get_token(false, true)?;
        assert_eq!(signer.calls.load(Ordering::SeqCst), 3);

        Ok(())
    }

    #[test]
    fn proactive_renewal_at_buffer_point() -> Result<()> {
        let clock = ManualClock::new(NOW);
        let provider = builder(&clock).build(SigningStrategy::symmetric_key(
            SharedAccessKey::from_static("c2VjcmV0"),
        )?)?;
        let initial = provider.get_token(false, false)?;

        // minted with a lifetime of 3601s, so the 85% point is at +3061
        clock.set(UnixTime(NOW.0 + 3060));
        assert_eq!(provider.state(), CredentialState::Fresh);
        assert!(Arc::ptr_eq(&initial, &provider.get_token(true, false)?));

        clock.set(UnixTime(NOW.0 + 3061));
        assert_eq!(provider.state(), CredentialState::Stale);
        assert!(Arc::ptr_eq(&initial, &provider.get_token(false, false)?));

        let renewed = provider.get_token(true, false)?;
        assert_eq!(renewed.expiry(), UnixTime(NOW.0 + 3061 + 3601));
        assert_eq!(provider.state(), CredentialState::Fresh);

        Ok(())
    }

    #[test]
    fn concurrent_callers_share_one_renewal() -> Result<()> {
        const CALLERS: usize = 16;

        let clock = ManualClock::new(NOW);
        let signer = CountingSigner {
            latency: Duration::from_millis(5),
            ..CountingSigner::default()
        };
        let provider = Arc::new(
            builder(&clock).build(SigningStrategy::hsm(signer.clone(), "primary"))?,
        );
        let initial = provider.get_token(false, false)?;
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);

        clock.set(UnixTime(NOW.0 + 3061));

        let barrier = Arc::new(Barrier::new(CALLERS));
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let provider = Arc::clone(&provider);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    provider.get_token(true, false)
                })
            })
            .collect();

        let tokens = handles
            .into_iter()
            .map(|h| h.join().expect("caller panicked"))
            .collect::<Result<Vec<_>, _>>()?;

        assert_eq!(signer.calls.load(Ordering::SeqCst), 2);

        let renewed = &tokens[0];
        assert!(!Arc::ptr_eq(renewed, &initial));
        assert_eq!(renewed.expiry(), UnixTime(NOW.0 + 3061 + 3601));
        for token in &tokens {
            assert!(Arc::ptr_eq(token, renewed));
            assert_eq!(SasToken::parse(token.as_str())?, **renewed);
        }

        Ok(())
    }

    #[test]
    fn expired_tokens_are_renewed_without_proactive() -> Result<()> {
        let clock = ManualClock::new(NOW);
        let provider = builder(&clock).build(SigningStrategy::symmetric_key(
            SharedAccessKey::from_static("c2VjcmV0"),
        )?)?;

        clock.advance(3601);
        assert!(!provider.is_manual_renewal_necessary());
        let renewed = provider.get_token(false, false)?;
        assert_eq!(renewed.expiry(), UnixTime(NOW.0 + 3601 + 3601));
        Ok(())
    }

    #[test]
    fn configured_lifetime_applies_to_next_mint() -> Result<()> {
        let clock = ManualClock::new(NOW);
        let provider = builder(&clock).build(SigningStrategy::symmetric_key(
            SharedAccessKey::from_static("c2VjcmV0"),
        )?)?;

        provider.set_token_valid_secs(60)?;
        provider.set_time_buffer_percent(50)?;
        assert!(provider.set_token_valid_secs(0).is_err());
        assert!(provider.set_time_buffer_percent(101).is_err());

        let token = provider.get_token(false, true)?;
        assert_eq!(token.expiry(), UnixTime(NOW.0 + 61));
        assert_eq!(provider.renewal_config(), RenewalConfig::new(60, 50)?);
        Ok(())
    }

    #[test]
    #[traced_test]
    fn expired_external_token_is_unrecoverable() -> Result<()> {
        let clock = ManualClock::new(NOW);
        let token = SasToken::parse("SharedAccessSignature sig=s&se=1000&sr=h%2Fdevices%2Fd")?;
        let provider = builder(&clock).build(SigningStrategy::external_token(token))?;

        assert!(!provider.can_refresh_token());
        assert!(provider.is_manual_renewal_necessary());
        assert_eq!(provider.state(), CredentialState::Unrecoverable);

        for (proactive, force) in [(false, false), (true, false), (false, true)] {
            let err = provider.get_token(proactive, force).unwrap_err();
            assert!(err.is_unrecoverable());
        }
        assert!(logs_contain("cannot be renewed"));

        Ok(())
    }

    #[test]
    fn valid_external_token_is_echoed() -> Result<()> {
        let clock = ManualClock::new(UnixTime(10));
        let raw = "SharedAccessSignature sr=h%2Fdevices%2Fd&se=20&sig=s";
        let provider = builder(&clock).build(SigningStrategy::external_token(raw.parse()?))?;

        assert_eq!(provider.get_token(true, true)?.as_str(), raw);
        assert!(!provider.is_manual_renewal_necessary());

        clock.set(UnixTime(20));
        assert!(provider.get_token(false, false).unwrap_err().is_unrecoverable());
        Ok(())
    }

    #[test]
    fn external_token_stays_fresh_until_it_expires() -> Result<()> {
        let clock = ManualClock::new(NOW);
        let token = SasToken::parse(format!(
            "SharedAccessSignature sig=s&se={}&sr=h%2Fdevices%2Fd",
            NOW.0 + 100
        ))?;
        let provider = builder(&clock).build(SigningStrategy::external_token(token))?;

        // well past the proactive point of a 3600s window, but nothing could renew it
        assert_eq!(provider.state(), CredentialState::Fresh);
        let echoed = provider.get_token(true, false)?;
        assert_eq!(echoed.expiry(), UnixTime(NOW.0 + 100));

        clock.set(UnixTime(NOW.0 + 99));
        assert_eq!(provider.state(), CredentialState::Fresh);

        clock.set(UnixTime(NOW.0 + 100));
        assert_eq!(provider.state(), CredentialState::Unrecoverable);
        Ok(())
    }

    #[test]
    fn hsm_never_needs_manual_renewal() -> Result<()> {
        let clock = ManualClock::new(NOW);
        let provider = builder(&clock).build(SigningStrategy::hsm(
            CountingSigner::default(),
            "primary",
        ))?;

        clock.advance(10 * 3600);
        let expired = provider.current_token().unwrap();
        assert!(expired.is_expired_at(clock.now()));
        assert!(!provider.is_manual_renewal_necessary());
        assert_eq!(provider.state(), CredentialState::Stale);
        Ok(())
    }

    #[test]
    #[traced_test]
    fn callback_is_invoked_on_every_call() -> Result<()> {
        let clock = ManualClock::new(UnixTime(50));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provider = builder(&clock).build(SigningStrategy::callback(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(format!("SharedAccessSignature sig=s{}&se=40&sr=x", n))
        }))?;

        assert_eq!(provider.state(), CredentialState::Stale);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        provider.get_token(false, false)?;
        let token = provider.get_token(false, false)?;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(token.signature().as_str(), "s1");
        assert!(logs_contain("expired token"));

        assert!(provider.can_refresh_token());
        assert!(provider.set_token_valid_secs(60).is_err());
        assert!(provider.set_time_buffer_percent(50).is_err());
        Ok(())
    }

    #[derive(Clone, Debug, Default)]
    struct CountingTls {
        builds: Arc<AtomicUsize>,
    }

    impl TlsContextBuilder for CountingTls {
        type Context = Option<TrustedCertificate>;
        type Error = Infallible;

        fn build(
            &self,
            trusted: Option<&TrustedCertificate>,
        ) -> Result<Self::Context, Self::Error> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(trusted.cloned())
        }
    }

    #[test]
    fn tls_context_rebuilt_only_after_trust_changes() -> Result<()> {
        let tls = CountingTls::default();
        let ca = TrustedCertificate::Pem("ca".to_owned());
        let provider = CredentialProvider::builder(identity())
            .with_tls_builder(tls.clone())
            .with_trusted_certificate(ca.clone())
            .build(SigningStrategy::hsm(CountingSigner::default(), "primary"))?;

        assert_eq!(tls.builds.load(Ordering::SeqCst), 0);
        assert_eq!(*provider.get_ssl_context()?, Some(ca.clone()));
        provider.get_ssl_context()?;
        assert_eq!(tls.builds.load(Ordering::SeqCst), 1);

        provider.set_trusted_certificate(ca.clone());
        provider.get_ssl_context()?;
        assert_eq!(tls.builds.load(Ordering::SeqCst), 1);

        let other = TrustedCertificate::Path("/etc/ca.pem".into());
        provider.set_trusted_certificate(other.clone());
        assert_eq!(tls.builds.load(Ordering::SeqCst), 1);
        assert_eq!(*provider.get_ssl_context()?, Some(other));
        assert_eq!(tls.builds.load(Ordering::SeqCst), 2);

        provider.clear_trusted_certificate();
        assert_eq!(*provider.get_ssl_context()?, None);
        assert_eq!(tls.builds.load(Ordering::SeqCst), 3);

        Ok(())
    }

    #[test]
    fn tls_failures_are_reported_and_retried() -> Result<()> {
        let clock = ManualClock::new(NOW);
        let provider = builder(&clock).build(SigningStrategy::hsm(
            CountingSigner::default(),
            "primary",
        ))?;

        assert!(matches!(
            provider.get_ssl_context(),
            Err(ProviderError::TlsConfig(_))
        ));
        assert!(matches!(
            provider.get_ssl_context(),
            Err(ProviderError::TlsConfig(_))
        ));
        Ok(())
    }

    #[test]
    fn from_connection_string() -> Result<()> {
        let provider = CredentialProvider::from_connection_string(
            "HostName=my-hub.azure-devices.net;DeviceId=dev1;ModuleId=mod1;SharedAccessKey=c2VjcmV0",
        )?;
        assert!(provider.can_refresh_token());
        assert_eq!(
            provider.scope().encoded(),
            "my-hub.azure-devices.net%2Fdevices%2Fdev1%2Fmodules%2Fmod1"
        );
        assert_eq!(provider.state(), CredentialState::Fresh);

        let err = CredentialProvider::from_connection_string(
            "HostName=my-hub.azure-devices.net;DeviceId=dev1;x509=true",
        )
        .unwrap_err();
        assert!(err.is_config());

        Ok(())
    }
}
