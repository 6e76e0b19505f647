//! Signing strategies
//!
//! A provider is bound to exactly one strategy for its whole lifetime. The strategy
//! decides whether tokens can be renewed at all and, if so, how a new one is minted.

use std::{convert::TryFrom, error::Error as StdError, fmt, sync::Arc};

use aliri_clock::UnixTime;
use hubsas::{
    error::CryptoError, signature, ResourceScope, SasToken, SharedAccessKeyRef, Signer,
    SymmetricKey,
};

use crate::{
    error::{config_error, transport_error, BoxError, ProviderError},
    policy, ConnectionCredential,
};

/// A caller-supplied source of ready-made tokens
///
/// The callback is invoked on every token request and owns the lifetime of the
/// tokens it returns. Closures returning `Result<String, E>` implement this trait.
pub trait SasTokenCallback: Send + Sync {
    /// Produces the current token string
    fn token(&self) -> Result<String, Box<dyn StdError + Send + Sync + 'static>>;
}

impl<F, E> SasTokenCallback for F
where
    F: Fn() -> Result<String, E> + Send + Sync,
    E: Into<Box<dyn StdError + Send + Sync + 'static>>,
{
    fn token(&self) -> Result<String, Box<dyn StdError + Send + Sync + 'static>> {
        (self)().map_err(Into::into)
    }
}

trait ErasedSigner: Send + Sync {
    fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, BoxError>;
}

impl<S> ErasedSigner for S
where
    S: Signer + Send + Sync,
{
    fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, BoxError> {
        Signer::sign(self, key_id, data).map_err(Into::into)
    }
}

impl Signer for dyn ErasedSigner {
    type Error = BoxedSignerError;

    fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, Self::Error> {
        ErasedSigner::sign(self, key_id, data).map_err(BoxedSignerError)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct BoxedSignerError(BoxError);

/// A signer that holds key material outside of this process
///
/// Every token minted through this signer performs a synchronous call to the signer,
/// which may block for as long as the signer's transport does.
#[derive(Clone)]
pub struct HsmSigner {
    signer: Arc<dyn ErasedSigner>,
    key_id: String,
}

impl HsmSigner {
    /// Wraps a signer, signing with the key named `key_id`
    pub fn new<S>(signer: S, key_id: impl Into<String>) -> Self
    where
        S: Signer + Send + Sync + 'static,
    {
        Self {
            signer: Arc::new(signer),
            key_id: key_id.into(),
        }
    }

    /// The name of the key used for signing
    #[inline]
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl fmt::Debug for HsmSigner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HsmSigner")
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// The means by which a provider obtains its tokens
#[derive(Clone)]
pub enum SigningStrategy {
    /// Tokens are signed in process with a shared access key
    SymmetricKey(SymmetricKey),

    /// A single pre-formed token, which cannot be renewed
    ExternalToken(SasToken),

    /// Tokens are obtained from a callback on every request
    Callback(Arc<dyn SasTokenCallback>),

    /// Tokens are signed by a hardware or remote security module
    Hsm(HsmSigner),
}

impl fmt::Debug for SigningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SymmetricKey(key) => f.debug_tuple("SymmetricKey").field(key).finish(),
            Self::ExternalToken(token) => f.debug_tuple("ExternalToken").field(token).finish(),
            Self::Callback(_) => f.write_str("Callback"),
            Self::Hsm(signer) => f.debug_tuple("Hsm").field(signer).finish(),
        }
    }
}

impl SigningStrategy {
    /// Signs tokens with a Base64 shared access key
    ///
    /// # Errors
    ///
    /// The key is not valid Base64 data.
    pub fn symmetric_key(key: impl AsRef<SharedAccessKeyRef>) -> Result<Self, ProviderError> {
        let key = SymmetricKey::from_encoded(key.as_ref()).map_err(CryptoError::from)?;
        Ok(Self::SymmetricKey(key))
    }

    /// Uses a pre-formed token until it expires
    #[must_use]
    pub fn external_token(token: SasToken) -> Self {
        Self::ExternalToken(token)
    }

    /// Obtains tokens from a callback
    #[must_use]
    pub fn callback(callback: impl SasTokenCallback + 'static) -> Self {
        Self::Callback(Arc::new(callback))
    }

    /// Delegates signing to a security module
    #[must_use]
    pub fn hsm<S>(signer: S, key_id: impl Into<String>) -> Self
    where
        S: Signer + Send + Sync + 'static,
    {
        Self::Hsm(HsmSigner::new(signer, key_id))
    }

    /// Whether the strategy is able to produce new tokens
    #[must_use]
    pub fn can_refresh(&self) -> bool {
        !matches!(self, Self::ExternalToken(_))
    }

    /// Whether `token` must be replaced by the caller as of `now`
    ///
    /// A security module always holds current key material, so it never requires
    /// manual renewal.
    #[must_use]
    pub fn needs_manual_renewal(&self, token: &SasToken, now: UnixTime) -> bool {
        match self {
            Self::Hsm(_) => false,
            _ => policy::is_manual_renewal_necessary(token, now, self.can_refresh()),
        }
    }

    /// Whether the lifetime of tokens is configured by this crate
    ///
    /// Callback tokens carry whatever lifetime the callback gave them.
    #[must_use]
    pub fn owns_token_lifetime(&self) -> bool {
        !matches!(self, Self::Callback(_))
    }

    /// Produces a new token for `scope`, expiring at `expiry`
    ///
    /// An external token cannot be minted again, so it is returned as is. A callback
    /// ignores both the scope and the expiry.
    ///
    /// # Errors
    ///
    /// The signer or the callback failed, or the callback returned a malformed token.
    pub fn mint(&self, scope: &ResourceScope, expiry: UnixTime) -> Result<SasToken, ProviderError> {
        match self {
            Self::SymmetricKey(key) => {
                let sig = signature::compute_with_signer(scope.encoded(), expiry, key, "")
                    .map_err(|err| match err {
                        signature::SignerError::Signer(never) => match never {},
                        signature::SignerError::Crypto(err) => err,
                    })?;
                Ok(SasToken::from_parts(scope.encoded(), expiry, sig))
            }
            Self::ExternalToken(token) => Ok(token.clone()),
            Self::Callback(callback) => {
                let raw = callback.token().map_err(transport_error)?;
                Ok(SasToken::parse(raw)?)
            }
            Self::Hsm(hsm) => {
                let sig = signature::compute_with_signer(
                    scope.encoded(),
                    expiry,
                    &*hsm.signer,
                    &hsm.key_id,
                )
                .map_err(|err| match err {
                    signature::SignerError::Signer(err) => {
                        ProviderError::from(transport_error(err.0))
                    }
                    signature::SignerError::Crypto(err) => ProviderError::from(err),
                })?;
                Ok(SasToken::from_parts(scope.encoded(), expiry, sig))
            }
        }
    }
}

impl TryFrom<ConnectionCredential> for SigningStrategy {
    type Error = ProviderError;

    fn try_from(credential: ConnectionCredential) -> Result<Self, Self::Error> {
        match credential {
            ConnectionCredential::SharedAccessKey(key) => Self::symmetric_key(key),
            ConnectionCredential::SharedAccessSignature(token) => Ok(Self::external_token(token)),
            ConnectionCredential::X509 => Err(config_error(
                "x509 identities authenticate with a client certificate, not a shared access signature",
            )
            .into()),
        }
    }
}
