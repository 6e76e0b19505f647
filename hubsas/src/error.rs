//! Common errors

use thiserror::Error;

/// The token does not match the shared access signature grammar
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[error("malformed shared access signature: {reason}")]
pub struct MalformedToken {
    reason: &'static str,
}

impl MalformedToken {
    /// A description of the grammar rule that was violated
    #[must_use]
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

pub(crate) const fn malformed_token(reason: &'static str) -> MalformedToken {
    MalformedToken { reason }
}

/// The symmetric key is not valid Base64 data
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("symmetric key is not valid base64")]
pub struct InvalidKey {
    #[source]
    source: aliri_base64::InvalidBase64Data,
}

pub(crate) fn invalid_key(source: aliri_base64::InvalidBase64Data) -> InvalidKey {
    InvalidKey { source }
}

/// The signer produced no signature bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[error("signer returned an empty signature")]
pub struct EmptySignature {
    _p: (),
}

pub(crate) const fn empty_signature() -> EmptySignature {
    EmptySignature { _p: () }
}

/// An error occurring while computing a signature
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum CryptoError {
    /// The key could not be decoded
    #[error(transparent)]
    InvalidKey(#[from] InvalidKey),

    /// The signing primitive returned nothing to encode
    #[error(transparent)]
    EmptySignature(#[from] EmptySignature),
}

impl From<std::convert::Infallible> for CryptoError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl CryptoError {
    /// Whether the error is due to a key that could not be decoded
    #[must_use]
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, Self::InvalidKey(_))
    }
}
