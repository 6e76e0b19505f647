//! Errors surfaced by credential providers

use std::{borrow::Cow, error::Error as StdError};

use aliri_clock::UnixTime;
use hubsas::error::{CryptoError, MalformedToken};
use thiserror::Error;

pub(crate) type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// An invalid configuration value
///
/// Always raised by the call that introduced the value.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid configuration: {message}")]
pub struct ConfigError {
    message: Cow<'static, str>,
}

pub(crate) fn config_error(message: impl Into<Cow<'static, str>>) -> ConfigError {
    ConfigError {
        message: message.into(),
    }
}

/// A remote signer or token callback failed
#[derive(Debug, Error)]
#[error("token source failed")]
pub struct TransportError {
    #[from]
    source: BoxError,
}

pub(crate) fn transport_error(source: impl Into<BoxError>) -> TransportError {
    TransportError {
        source: source.into(),
    }
}

/// The TLS context could not be built
#[derive(Debug, Error)]
#[error("unable to build TLS context")]
pub struct TlsConfigError {
    #[from]
    source: BoxError,
}

pub(crate) fn tls_config_error(source: impl Into<BoxError>) -> TlsConfigError {
    TlsConfigError {
        source: source.into(),
    }
}

/// The token has expired and the credential has no means of renewing it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("shared access signature expired at {} and cannot be renewed", .expiry.0)]
pub struct TokenExpired {
    expiry: UnixTime,
}

impl TokenExpired {
    /// The time at which the token expired
    #[must_use]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }
}

pub(crate) const fn token_expired(expiry: UnixTime) -> TokenExpired {
    TokenExpired { expiry }
}

/// An error occurring while providing a credential
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A configuration value was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A token did not match the shared access signature grammar
    #[error(transparent)]
    MalformedToken(#[from] MalformedToken),

    /// A signature could not be computed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A remote signer or token callback failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The TLS context could not be built
    #[error(transparent)]
    TlsConfig(#[from] TlsConfigError),

    /// The token expired and cannot be renewed; the connection attempt must fail
    #[error(transparent)]
    Unrecoverable(#[from] TokenExpired),
}

impl ProviderError {
    /// Whether the credential expired without any means of renewal
    #[must_use]
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }

    /// Whether the error is due to a rejected configuration value
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Whether the error is due to a malformed token
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedToken(_))
    }
}

/// The renewal task has stopped and no further tokens will be published
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("token renewal has stopped")]
pub struct RenewalStopped {
    _p: (),
}

pub(crate) const fn renewal_stopped() -> RenewalStopped {
    RenewalStopped { _p: () }
}
