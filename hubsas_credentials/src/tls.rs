//! TLS context construction
//!
//! The provider treats TLS contexts as opaque values produced by a
//! [`TlsContextBuilder`] from the configured trusted certificate, if any. Contexts are
//! cached by the provider and rebuilt only after the trusted certificate changes.

use std::{error::Error as StdError, fmt, path::PathBuf, sync::Arc};

/// Additional certificate material to trust when connecting
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrustedCertificate {
    /// One or more PEM-encoded certificates
    Pem(String),

    /// A path to a file of PEM-encoded certificates
    Path(PathBuf),
}

/// A builder of TLS contexts
pub trait TlsContextBuilder {
    /// The context produced
    type Context;

    /// The error returned when a context cannot be built
    type Error: StdError + Send + Sync + 'static;

    /// Builds a context trusting `trusted` in addition to the builder's own roots
    fn build(&self, trusted: Option<&TrustedCertificate>) -> Result<Self::Context, Self::Error>;
}

/// A builder for transports that do not use TLS
///
/// Every attempt to build a context fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoTls;

/// TLS support is not available
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("no TLS implementation is configured")]
pub struct TlsUnavailable {
    _p: (),
}

impl TlsContextBuilder for NoTls {
    type Context = ();
    type Error = TlsUnavailable;

    fn build(&self, _trusted: Option<&TrustedCertificate>) -> Result<(), TlsUnavailable> {
        Err(TlsUnavailable { _p: () })
    }
}

/// The state of a provider's cached TLS context
pub(crate) enum TlsSlot<C> {
    /// The context must be built before it can be used
    Dirty,

    /// The context is current
    Clean(Arc<C>),
}

impl<C> fmt::Debug for TlsSlot<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Dirty => f.write_str("Dirty"),
            Self::Clean(_) => f.write_str("Clean"),
        }
    }
}

#[cfg(feature = "rustls")]
pub use self::rustls_builder::{RustlsContextBuilder, RustlsContextError};

/// The TLS context builder used unless another is configured
#[cfg(feature = "rustls")]
pub type DefaultTlsBuilder = RustlsContextBuilder;

/// The TLS context builder used unless another is configured
#[cfg(not(feature = "rustls"))]
pub type DefaultTlsBuilder = NoTls;

#[cfg(feature = "rustls")]
mod rustls_builder {
    use std::sync::Arc;

    use rustls::{
        crypto::ring::default_provider,
        pki_types::{pem::PemObject, CertificateDer},
        ClientConfig, RootCertStore,
    };
    use webpki_roots::TLS_SERVER_ROOTS;

    use super::{TlsContextBuilder, TrustedCertificate};

    /// Builds `rustls` client configurations trusting the web PKI roots
    #[cfg_attr(docsrs, doc(cfg(feature = "rustls")))]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RustlsContextBuilder;

    /// An error building a `rustls` client configuration
    #[cfg_attr(docsrs, doc(cfg(feature = "rustls")))]
    #[derive(Debug, thiserror::Error)]
    pub enum RustlsContextError {
        /// The certificate file could not be read
        #[error("unable to read trusted certificate file")]
        Io(#[from] std::io::Error),

        /// The certificate material is not valid PEM
        #[error("trusted certificate is not valid PEM")]
        Pem(#[from] rustls::pki_types::pem::Error),

        /// The certificate material contains no certificates
        #[error("trusted certificate contains no certificates")]
        NoCertificates,

        /// A certificate or the configuration was rejected
        #[error(transparent)]
        Rustls(#[from] rustls::Error),
    }

    impl TlsContextBuilder for RustlsContextBuilder {
        type Context = ClientConfig;
        type Error = RustlsContextError;

        fn build(&self, trusted: Option<&TrustedCertificate>) -> Result<ClientConfig, Self::Error> {
            let mut root_store = RootCertStore::empty();
            root_store.extend(TLS_SERVER_ROOTS.iter().cloned());

            if let Some(trusted) = trusted {
                let pem = match trusted {
                    TrustedCertificate::Pem(pem) => pem.as_bytes().to_vec(),
                    TrustedCertificate::Path(path) => std::fs::read(path)?,
                };

                let certs = CertificateDer::pem_slice_iter(&pem).collect::<Result<Vec<_>, _>>()?;
                if certs.is_empty() {
                    return Err(RustlsContextError::NoCertificates);
                }

                for cert in certs {
                    root_store.add(cert)?;
                }
            }

            let config = ClientConfig::builder_with_provider(Arc::new(default_provider()))
                .with_safe_default_protocol_versions()?
                .with_root_certificates(root_store)
                .with_no_client_auth();

            Ok(config)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn builds_with_web_pki_roots() {
            assert!(RustlsContextBuilder.build(None).is_ok());
        }

        #[test]
        fn rejects_pem_without_certificates() {
            let err = RustlsContextBuilder
                .build(Some(&TrustedCertificate::Pem("not a certificate".to_owned())))
                .unwrap_err();
            assert!(matches!(err, RustlsContextError::NoCertificates));
        }

        #[test]
        fn rejects_missing_file() {
            let err = RustlsContextBuilder
                .build(Some(&TrustedCertificate::Path(
                    "/nonexistent/hubsas/ca.pem".into(),
                )))
                .unwrap_err();
            assert!(matches!(err, RustlsContextError::Io(_)));
        }
    }
}
