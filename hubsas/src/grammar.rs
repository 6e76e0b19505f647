//! The shared access signature wire grammar
//!
//! ```text
//! SharedAccessSignature sig=<urlencoded-signature>&se=<integer-unix-seconds>&sr=<urlencoded-resource-uri>
//! ```
//!
//! Tokens are emitted with their fields in `sig`, `se`, `sr` order. Any order is
//! accepted when parsing, and fields other than these three are ignored.
//!
//! Both the token builder and the token parser go through this module so that the
//! two can never disagree on the format.

use std::borrow::Cow;

use aliri_clock::UnixTime;

use crate::error::{malformed_token, MalformedToken};

/// The literal that opens every token
pub const TOKEN_PREFIX: &str = "SharedAccessSignature";

/// The field holding the signature
pub const SIGNATURE_FIELD: &str = "sig";

/// The field holding the expiry, in whole seconds since the Unix epoch
pub const EXPIRY_FIELD: &str = "se";

/// The field holding the URL-encoded resource URI
pub const RESOURCE_URI_FIELD: &str = "sr";

const PREFIX_SEPARATOR: char = ' ';
const FIELD_SEPARATOR: char = '&';
const KEY_VALUE_SEPARATOR: char = '=';

/// Separates the resource URI from the expiry in the payload that gets signed
pub(crate) const PAYLOAD_SEPARATOR: char = '\n';

/// URL-encodes a value with `application/x-www-form-urlencoded` rules
///
/// Spaces become `+`. Alphanumerics and `*`, `-`, `.`, `_` are left as is;
/// all other bytes are percent-encoded with upper-case hex digits.
#[must_use]
pub fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Reverses [`url_encode()`]
///
/// Invalid percent escapes are passed through untouched.
#[must_use]
pub fn url_decode(value: &str) -> Cow<'_, str> {
    if !value.contains(|c: char| c == '%' || c == '+') {
        return Cow::Borrowed(value);
    }

    let plus_decoded = value.replace('+', " ");
    let decoded = percent_encoding::percent_decode_str(&plus_decoded).decode_utf8_lossy();
    Cow::Owned(decoded.into_owned())
}

/// Writes the canonical token string from wire-form fields
pub(crate) fn emit(signature: &str, expiry: UnixTime, resource_uri: &str) -> String {
    format!(
        "{TOKEN_PREFIX}{PREFIX_SEPARATOR}{SIGNATURE_FIELD}{KEY_VALUE_SEPARATOR}{signature}\
         {FIELD_SEPARATOR}{EXPIRY_FIELD}{KEY_VALUE_SEPARATOR}{}\
         {FIELD_SEPARATOR}{RESOURCE_URI_FIELD}{KEY_VALUE_SEPARATOR}{resource_uri}",
        expiry.0,
    )
}

/// The three required fields of a token, borrowed from the raw string
#[derive(Debug)]
pub(crate) struct Fields<'a> {
    pub(crate) signature: &'a str,
    pub(crate) expiry: UnixTime,
    pub(crate) resource_uri: &'a str,
}

/// Splits a raw token into its required fields
pub(crate) fn parse(raw: &str) -> Result<Fields<'_>, MalformedToken> {
    let rest = raw
        .strip_prefix(TOKEN_PREFIX)
        .ok_or(malformed_token("missing SharedAccessSignature prefix"))?;

    let rest = rest
        .strip_prefix(PREFIX_SEPARATOR)
        .ok_or(malformed_token("prefix must be followed by a single space"))?;

    if rest.starts_with(PREFIX_SEPARATOR) {
        return Err(malformed_token("prefix must be followed by a single space"));
    }

    let mut signature = None;
    let mut expiry = None;
    let mut resource_uri = None;

    for segment in rest.split(FIELD_SEPARATOR) {
        let (key, value) = segment
            .split_once(KEY_VALUE_SEPARATOR)
            .ok_or(malformed_token("field is not a key=value pair"))?;

        let slot = match key {
            SIGNATURE_FIELD => &mut signature,
            EXPIRY_FIELD => &mut expiry,
            RESOURCE_URI_FIELD => &mut resource_uri,
            _ => continue,
        };

        if value.is_empty() {
            return Err(malformed_token("required field has an empty value"));
        }

        if slot.replace(value).is_some() {
            return Err(malformed_token("required field appears more than once"));
        }
    }

    let signature = signature.ok_or(malformed_token("missing sig field"))?;
    let expiry = expiry.ok_or(malformed_token("missing se field"))?;
    let resource_uri = resource_uri.ok_or(malformed_token("missing sr field"))?;

    let expiry = parse_expiry(expiry)?;

    Ok(Fields {
        signature,
        expiry,
        resource_uri,
    })
}

fn parse_expiry(value: &str) -> Result<UnixTime, MalformedToken> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed_token("se field must be whole seconds"));
    }

    value
        .parse()
        .map(UnixTime)
        .map_err(|_| malformed_token("se field is out of range"))
}
