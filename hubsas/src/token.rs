use std::{convert::TryFrom, fmt, str::FromStr};

use aliri_clock::{Clock, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{error::MalformedToken, grammar, Signature, SignatureRef};

/// A signed, time-boxed shared access signature
///
/// A token is either built from its parts, in which case its wire string is the
/// canonical `sig`, `se`, `sr` ordering, or it is supplied from the outside as a
/// pre-formed string, which is then echoed verbatim. Either way the string is
/// validated against the [grammar][crate::grammar] and never changes afterwards:
/// renewing a credential means replacing its token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SasToken {
    encoded: String,
    signature: Signature,
    expiry: UnixTime,
    resource_uri: String,
    supplied: bool,
}

impl SasToken {
    /// Builds a token from a URL-encoded resource URI, its expiry and its signature
    pub fn from_parts(
        resource_uri: impl Into<String>,
        expiry: UnixTime,
        signature: Signature,
    ) -> Self {
        let resource_uri = resource_uri.into();
        Self {
            encoded: grammar::emit(signature.as_str(), expiry, &resource_uri),
            signature,
            expiry,
            resource_uri,
            supplied: false,
        }
    }

    /// Parses a pre-formed token string
    ///
    /// # Errors
    ///
    /// The string does not match the shared access signature grammar.
    pub fn parse(raw: impl Into<String>) -> Result<Self, MalformedToken> {
        let encoded = raw.into();
        let fields = grammar::parse(&encoded)?;

        let signature = Signature::from(fields.signature);
        let expiry = fields.expiry;
        let resource_uri = fields.resource_uri.to_owned();

        Ok(Self {
            encoded,
            signature,
            expiry,
            resource_uri,
            supplied: true,
        })
    }

    /// The wire form of the token
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// The signature, as carried in the `sig` field
    #[inline]
    #[must_use]
    pub fn signature(&self) -> &SignatureRef {
        &self.signature
    }

    /// The time at which the token stops being valid
    #[inline]
    #[must_use]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// The URL-encoded resource URI, as carried in the `sr` field
    #[inline]
    #[must_use]
    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    /// Whether the token was supplied as a string rather than built from its parts
    #[inline]
    #[must_use]
    pub fn is_externally_supplied(&self) -> bool {
        self.supplied
    }

    /// Whether the token has expired as of `now`
    ///
    /// A token is expired from its expiry second onwards.
    #[inline]
    #[must_use]
    pub fn is_expired_at(&self, now: UnixTime) -> bool {
        now >= self.expiry
    }

    /// Whether the token has expired according to the system clock
    #[inline]
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_with_clock(&System)
    }

    /// Whether the token has expired according to the provided clock
    #[inline]
    #[must_use]
    pub fn is_expired_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_expired_at(clock.now())
    }

    /// Seconds remaining until the token expires as of `now`
    #[inline]
    #[must_use]
    pub fn until_expired_at(&self, now: UnixTime) -> u64 {
        self.expiry.0.saturating_sub(now.0)
    }

    /// Unwraps the wire form of the token
    #[inline]
    #[must_use]
    pub fn into_string(self) -> String {
        self.encoded
    }
}

impl fmt::Display for SasToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl fmt::Debug for SasToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SasToken")
            .field("signature", &self.signature)
            .field("expiry", &self.expiry.0)
            .field("resource_uri", &self.resource_uri)
            .field("supplied", &self.supplied)
            .finish()
    }
}

impl FromStr for SasToken {
    type Err = MalformedToken;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SasToken {
    type Error = MalformedToken;

    #[inline]
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<SasToken> for String {
    #[inline]
    fn from(token: SasToken) -> Self {
        token.encoded
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::TestClock;
    use color_eyre::Result;

    use super::*;
    use crate::{signature, ResourceScope, SharedAccessKey};

    const SAMPLE: &str = "SharedAccessSignature sr=sample-iothub-hostname.net%2fdevices%2fsample-device-ID&sig=S3%2flPidfBF48B7%2fOFAxMOYH8rpOneq68nu61D%2fBP6fo%3d&se=1469813873";

    #[test]
    fn round_trip_through_signature_engine() -> Result<()> {
        let key = SharedAccessKey::from_static("c2VjcmV0");
        let cases = [
            (ResourceScope::for_device("h", "d"), UnixTime(1700003601)),
            (
                ResourceScope::for_module("hub.azure-devices.net", "thermostat", "sensor"),
                UnixTime(1700003601),
            ),
            (
                ResourceScope::for_device("edge-gateway.local", "thermostat"),
                UnixTime(1),
            ),
            (
                ResourceScope::for_device("hub.azure-devices.net", "floor 2+east/a"),
                UnixTime(0),
            ),
            (
                ResourceScope::for_module("hub.azure-devices.net", "a b", "c+d/e"),
                UnixTime(u64::from(u32::MAX) * 4),
            ),
        ];

        for (scope, expiry) in cases {
            let sig = signature::compute(scope.encoded(), expiry, &key)?;

            let built = SasToken::from_parts(scope.encoded(), expiry, sig);
            assert!(!built.is_externally_supplied());

            let parsed = SasToken::parse(built.to_string())?;
            assert_eq!(parsed.expiry(), expiry, "{}", scope);
            assert_eq!(parsed.resource_uri(), scope.encoded(), "{}", scope);
            assert_eq!(parsed.signature(), built.signature(), "{}", scope);
            assert!(!parsed.resource_uri().contains(['/', ' ', '+']));
        }

        Ok(())
    }

    #[test]
    fn built_tokens_use_canonical_order() {
        let token = SasToken::from_parts("x", UnixTime(7), Signature::from_static("abc"));
        assert_eq!(token.as_str(), "SharedAccessSignature sig=abc&se=7&sr=x");
    }

    #[test]
    fn supplied_tokens_echo_verbatim() -> Result<()> {
        let token: SasToken = SAMPLE.parse()?;
        assert!(token.is_externally_supplied());
        assert_eq!(token.as_str(), SAMPLE);
        assert_eq!(token.expiry(), UnixTime(1469813873));
        Ok(())
    }

    #[test]
    fn field_order_is_irrelevant() -> Result<()> {
        let a = SasToken::parse("SharedAccessSignature se=10&sr=scope&sig=s1")?;
        let b = SasToken::parse("SharedAccessSignature sr=scope&sig=s1&se=10")?;

        assert_eq!(a.signature(), b.signature());
        assert_eq!(a.expiry(), b.expiry());
        assert_eq!(a.resource_uri(), b.resource_uri());
        Ok(())
    }

    #[test]
    fn expiry_boundary() {
        let token = SasToken::from_parts("x", UnixTime(100), Signature::from_static("s"));

        assert!(!token.is_expired_at(UnixTime(99)));
        assert!(token.is_expired_at(UnixTime(100)));
        assert!(token.is_expired_at(UnixTime(101)));

        let mut clock = TestClock::new(UnixTime(40));
        assert!(!token.is_expired_with_clock(&clock));
        assert_eq!(token.until_expired_at(clock.now()), 60);

        clock.advance(aliri_clock::DurationSecs(60));
        assert!(token.is_expired_with_clock(&clock));
        assert_eq!(token.until_expired_at(clock.now()), 0);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let cases = [
            "SharedAccessSignature sig=s&sr=x",
            "SharedAccessSignature se=1&sr=x",
            "SharedAccessSignature sig=s&se=1",
            "SharedAccessSignature sig=&se=1&sr=x",
            "SharedAccessSignature sig=s&se=&sr=x",
            "SharedAccessSignature sig=s&se=1&sr=",
            "SharedAccessSignature sr =x&sig =s&se =1",
            "SharedAccessSignaturesig=s&se=1&sr=x",
            "SharedAccessSignature  sig=s&se=1&sr=x",
            "sharedaccesssignature sig=s&se=1&sr=x",
            "Bearer sig=s&se=1&sr=x",
            "",
        ];

        for raw in cases {
            assert!(SasToken::parse(raw).is_err(), "accepted {:?}", raw);
        }
    }

    #[test]
    fn serializes_as_wire_string() -> Result<()> {
        let token = SasToken::parse(SAMPLE)?;
        let json = serde_json::to_string(&token)?;
        assert_eq!(json, format!("\"{}\"", SAMPLE));

        let back: SasToken = serde_json::from_str(&json)?;
        assert_eq!(back, token);

        assert!(serde_json::from_str::<SasToken>("\"SharedAccessSignature se=1\"").is_err());
        Ok(())
    }

    #[test]
    fn debug_hides_signature() {
        let token = SasToken::from_parts("x", UnixTime(7), Signature::from_static("secret"));
        let debug = format!("{:?}", token);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<signature redacted>"));
    }
}
