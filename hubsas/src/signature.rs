//! The signature pipeline
//!
//! A signature is computed in a fixed sequence of steps:
//!
//! 1. the payload `<resource uri>\n<expiry>` is assembled,
//! 2. the Base64 symmetric key is decoded,
//! 3. the payload is signed with HMAC-SHA256,
//! 4. the MAC is Base64-encoded,
//! 5. and the result is URL-encoded so that it can be embedded as the `sig` field.
//!
//! Steps 2 and 3 can be delegated to any [`Signer`], such as a hardware security
//! module that never exposes its key material to this process.

use std::{error::Error as StdError, fmt};

use aliri_base64::Base64;
use aliri_clock::UnixTime;

use crate::{
    error::{self, CryptoError},
    grammar, Signature, SharedAccessKeyRef,
};

/// A signing primitive
pub trait Signer {
    /// The error returned on failure to sign
    type Error: StdError + Send + Sync + 'static;

    /// Signs `data` with the key identified by `key_id`, returning the raw MAC bytes
    fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, Self::Error>;
}

/// A symmetric key held in process memory
#[derive(Clone, PartialEq, Eq)]
#[must_use]
pub struct SymmetricKey {
    key: Base64,
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SymmetricKey { key }")
    }
}

impl SymmetricKey {
    /// Decodes a Base64 shared access key
    ///
    /// # Errors
    ///
    /// The key is not valid Base64 data.
    pub fn from_encoded(key: &SharedAccessKeyRef) -> Result<Self, error::InvalidKey> {
        let key = Base64::from_encoded(key.as_str()).map_err(error::invalid_key)?;
        Ok(Self { key })
    }

    /// Wraps raw key bytes
    pub fn from_raw(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Base64::from_raw(key),
        }
    }
}

impl Signer for SymmetricKey {
    type Error = std::convert::Infallible;

    fn sign(&self, _key_id: &str, data: &[u8]) -> Result<Vec<u8>, Self::Error> {
        let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, self.key.as_slice());
        let digest = ring::hmac::sign(&key, data);
        Ok(digest.as_ref().to_owned())
    }
}

/// Builds the payload that gets signed
#[must_use]
pub fn payload(resource_uri: &str, expiry: UnixTime) -> Vec<u8> {
    format!("{}{}{}", resource_uri, grammar::PAYLOAD_SEPARATOR, expiry.0).into_bytes()
}

/// Turns raw MAC bytes into the wire form of a signature
///
/// # Errors
///
/// The MAC is empty.
pub fn encode(mac: &[u8]) -> Result<Signature, CryptoError> {
    if mac.is_empty() {
        return Err(error::empty_signature().into());
    }

    let printable = Base64::from_raw(mac).to_string();
    Ok(Signature::from(grammar::url_encode(&printable)))
}

/// Computes the signature of `resource_uri` valid until `expiry` with a Base64 key
///
/// # Errors
///
/// The key is not valid Base64 data.
pub fn compute(
    resource_uri: &str,
    expiry: UnixTime,
    key: impl AsRef<SharedAccessKeyRef>,
) -> Result<Signature, CryptoError> {
    let key = SymmetricKey::from_encoded(key.as_ref())?;
    let mac = key.sign("", &payload(resource_uri, expiry))?;
    encode(&mac)
}

/// Computes a signature, delegating the signing step to `signer`
///
/// # Errors
///
/// The signer failed, or it returned no signature bytes.
pub fn compute_with_signer<S>(
    resource_uri: &str,
    expiry: UnixTime,
    signer: &S,
    key_id: &str,
) -> Result<Signature, SignerError<S::Error>>
where
    S: Signer + ?Sized,
{
    let mac = signer
        .sign(key_id, &payload(resource_uri, expiry))
        .map_err(SignerError::Signer)?;

    tracing::trace!(key_id, mac_len = mac.len(), "signer produced a MAC");

    encode(&mac).map_err(SignerError::Crypto)
}

/// An error from signing through a [`Signer`]
#[derive(Debug, thiserror::Error)]
pub enum SignerError<E: StdError + 'static> {
    /// The signer itself failed
    #[error("signer failed")]
    Signer(#[source] E),

    /// The signer output could not be encoded
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
