//! Credential management for IoT hub connections
//!
//! A [`CredentialProvider`] owns the shared access signature of one device or module
//! identity and hands out a current token whenever a connection needs one. It decides
//! when a token must be renewed, mints the replacement through its bound
//! [`SigningStrategy`] and caches the TLS context used for the connection.
//!
//! Four strategies are available:
//!
//! * [`SymmetricKey`][SigningStrategy::SymmetricKey] signs tokens in process with a
//!   shared access key,
//! * [`Hsm`][SigningStrategy::Hsm] delegates signing to a security module that never
//!   reveals its key,
//! * [`Callback`][SigningStrategy::Callback] asks a caller-supplied function for a
//!   ready-made token on every request,
//! * [`ExternalToken`][SigningStrategy::ExternalToken] uses a single pre-formed token
//!   that cannot be renewed. Once it expires, every token request fails with
//!   [`ProviderError::Unrecoverable`].
//!
//! Tokens are renewed _mandatorily_ once they expire and _proactively_ once a
//! configurable percentage of their lifetime has elapsed (see [`policy`]). A
//! [`RenewalWatcher`] can keep a token current in the background.
//!
//! # Example
//!
//! ```
//! use hubsas_credentials::{CredentialProvider, CredentialState};
//!
//! # fn main() -> Result<(), hubsas_credentials::ProviderError> {
//! let provider = CredentialProvider::from_connection_string(
//!     "HostName=my-hub.azure-devices.net;DeviceId=thermostat;SharedAccessKey=c2VjcmV0",
//! )?;
//!
//! let token = provider.get_token(true, false)?;
//! assert!(token.as_str().starts_with("SharedAccessSignature sig="));
//! assert_eq!(provider.state(), CredentialState::Fresh);
//!
//! // Asking again returns the same token until it is due for renewal
//! assert_eq!(provider.get_token(true, false)?.as_str(), token.as_str());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod connection_string;
pub mod error;
mod identity;
pub mod policy;
mod provider;
mod renewal;
mod strategy;
pub mod tls;

#[doc(inline)]
pub use connection_string::{ConnectionCredential, ConnectionString};
#[doc(inline)]
pub use error::{ConfigError, ProviderError};
#[doc(inline)]
pub use identity::DeviceIdentity;
#[doc(inline)]
pub use policy::RenewalConfig;
#[doc(inline)]
pub use provider::{CredentialProvider, CredentialProviderBuilder, CredentialState};
#[doc(inline)]
pub use renewal::RenewalWatcher;
#[doc(inline)]
pub use strategy::{HsmSigner, SasTokenCallback, SigningStrategy};
#[doc(inline)]
pub use tls::{NoTls, TlsContextBuilder, TrustedCertificate};
