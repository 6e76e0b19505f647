//! Shared access signature (SAS) tokens for IoT hub identities
//!
//! A SAS token is a time-boxed credential proving that its bearer holds the key of a
//! device or module identity. This crate implements the pieces of that credential
//! which are pure computation:
//!
//! * the canonical token grammar ([`grammar`]), shared by token emission and parsing,
//! * resource scopes ([`ResourceScope`]), the URL-encoded path naming the identity,
//! * the signature pipeline ([`signature`]), turning a scope, an expiry and a key into
//!   a URL-safe signature,
//! * the immutable [`SasToken`] value, built from parts or parsed from its wire form.
//!
//! Refreshing tokens over time is the business of the `hubsas_credentials` crate.
//!
//! # Example
//!
//! ```
//! use aliri_clock::UnixTime;
//! use hubsas::{signature, ResourceScope, SasToken, SharedAccessKey};
//!
//! let scope = ResourceScope::for_device("my-hub.azure-devices.net", "thermostat");
//! let expiry = UnixTime(1_700_000_000);
//!
//! let key = SharedAccessKey::from_static("c2VjcmV0");
//! let sig = signature::compute(scope.encoded(), expiry, &key).unwrap();
//! let token = SasToken::from_parts(scope.encoded(), expiry, sig);
//!
//! let parsed = SasToken::parse(token.as_str()).unwrap();
//! assert_eq!(parsed.expiry(), expiry);
//! assert_eq!(parsed.resource_uri(), "my-hub.azure-devices.net%2Fdevices%2Fthermostat");
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

mod braids;
pub mod error;
pub mod grammar;
mod scope;
pub mod signature;
mod token;

pub use braids::*;
#[doc(inline)]
pub use scope::ResourceScope;
#[doc(inline)]
pub use signature::{Signer, SymmetricKey};
#[doc(inline)]
pub use token::SasToken;
