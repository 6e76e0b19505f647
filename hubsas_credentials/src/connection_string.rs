//! Device connection strings
//!
//! A connection string is a `;`-separated list of `Key=value` attributes:
//!
//! ```text
//! HostName=my-hub.azure-devices.net;DeviceId=thermostat;SharedAccessKey=c2VjcmV0
//! ```
//!
//! Recognized keys, matched case-insensitively, are `HostName`, `DeviceId`, `ModuleId`,
//! `GatewayHostName`, `SharedAccessKey`, `SharedAccessSignature` and `x509`. Others are
//! ignored.

use std::{fmt, str::FromStr};

use hubsas::{grammar, DeviceId, ModuleId, SasToken, SharedAccessKey};

use crate::{
    error::{config_error, ProviderError},
    DeviceIdentity,
};

const HOST_NAME: &str = "HostName";
const DEVICE_ID: &str = "DeviceId";
const MODULE_ID: &str = "ModuleId";
const GATEWAY_HOST_NAME: &str = "GatewayHostName";
const SHARED_ACCESS_KEY: &str = "SharedAccessKey";
const SHARED_ACCESS_SIGNATURE: &str = "SharedAccessSignature";
const X509: &str = "x509";

/// The credential carried by a connection string
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionCredential {
    /// A symmetric key from which tokens can be minted
    SharedAccessKey(SharedAccessKey),

    /// A pre-formed token that cannot be renewed
    SharedAccessSignature(SasToken),

    /// The identity authenticates with an X.509 client certificate
    X509,
}

/// A parsed device connection string
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    identity: DeviceIdentity,
    credential: ConnectionCredential,
}

impl ConnectionString {
    /// The identity named by the connection string
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The credential carried by the connection string
    #[inline]
    #[must_use]
    pub fn credential(&self) -> &ConnectionCredential {
        &self.credential
    }

    /// Splits the connection string into its identity and credential
    #[must_use]
    pub fn into_parts(self) -> (DeviceIdentity, ConnectionCredential) {
        (self.identity, self.credential)
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let credential = match &self.credential {
            ConnectionCredential::SharedAccessKey(_) => "SharedAccessKey",
            ConnectionCredential::SharedAccessSignature(_) => "SharedAccessSignature",
            ConnectionCredential::X509 => "X509",
        };

        f.debug_struct("ConnectionString")
            .field("identity", &self.identity)
            .field("credential", &credential)
            .finish()
    }
}

#[derive(Default)]
struct Attributes<'a> {
    host_name: Option<&'a str>,
    device_id: Option<&'a str>,
    module_id: Option<&'a str>,
    gateway_host_name: Option<&'a str>,
    shared_access_key: Option<&'a str>,
    shared_access_signature: Option<&'a str>,
    x509: bool,
}

impl<'a> Attributes<'a> {
    fn collect(s: &'a str) -> Self {
        let mut attrs = Self::default();

        for (key, value) in s.split(';').filter_map(|attr| attr.split_once('=')) {
            let key = key.trim();
            if key.eq_ignore_ascii_case(HOST_NAME) {
                attrs.host_name = Some(value);
            } else if key.eq_ignore_ascii_case(DEVICE_ID) {
                attrs.device_id = Some(value);
            } else if key.eq_ignore_ascii_case(MODULE_ID) {
                attrs.module_id = Some(value);
            } else if key.eq_ignore_ascii_case(GATEWAY_HOST_NAME) {
                attrs.gateway_host_name = Some(value);
            } else if key.eq_ignore_ascii_case(SHARED_ACCESS_KEY) {
                attrs.shared_access_key = Some(value);
            } else if key.eq_ignore_ascii_case(SHARED_ACCESS_SIGNATURE) {
                attrs.shared_access_signature = Some(value);
            } else if key.eq_ignore_ascii_case(X509) {
                attrs.x509 = value.eq_ignore_ascii_case("true");
            } else {
                tracing::trace!(key, "ignoring unrecognized connection string attribute");
            }
        }

        attrs
    }
}

impl FromStr for ConnectionString {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(config_error("connection string cannot be empty").into());
        }

        let attrs = Attributes::collect(s);

        let host_name = attrs
            .host_name
            .ok_or_else(|| config_error("connection string is missing HostName"))?;

        match host_name.split_once('.') {
            Some((hub, rest)) if !hub.is_empty() && !rest.is_empty() => {}
            _ => {
                return Err(config_error(format!(
                    "HostName '{}' is not a fully qualified host name",
                    host_name
                ))
                .into())
            }
        }

        let device_id = attrs
            .device_id
            .ok_or_else(|| config_error("connection string is missing DeviceId"))?;
        let device_id = DeviceId::from(grammar::url_decode(device_id).into_owned());

        let mut identity = DeviceIdentity::new(host_name, device_id)?;

        if let Some(module_id) = attrs.module_id {
            identity = identity.with_module_id(ModuleId::from(module_id))?;
        }

        if let Some(gateway_host_name) = attrs.gateway_host_name {
            identity = identity.with_gateway_host_name(gateway_host_name);
        }

        let credential = match (
            attrs.shared_access_key,
            attrs.shared_access_signature,
            attrs.x509,
        ) {
            (Some(_), Some(_), _) => {
                return Err(config_error(
                    "either SharedAccessKey or SharedAccessSignature may be provided, but not both",
                )
                .into())
            }
            (Some(_), _, true) | (_, Some(_), true) => {
                return Err(config_error(
                    "x509 authentication cannot be combined with a shared access credential",
                )
                .into())
            }
            (Some(""), None, false) => {
                return Err(config_error("SharedAccessKey cannot be empty").into())
            }
            (Some(key), None, false) => {
                ConnectionCredential::SharedAccessKey(SharedAccessKey::from(key))
            }
            (None, Some(token), false) => {
                ConnectionCredential::SharedAccessSignature(SasToken::parse(token)?)
            }
            (None, None, true) => ConnectionCredential::X509,
            (None, None, false) => {
                return Err(config_error(
                    "SharedAccessKey or SharedAccessSignature is required unless using x509 authentication",
                )
                .into())
            }
        };

        Ok(Self {
            identity,
            credential,
        })
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn parses_symmetric_key_connection_string() -> Result<()> {
        let cs: ConnectionString =
            "HostName=my-hub.azure-devices.net;DeviceId=my+device%2F1;SharedAccessKey=c2VjcmV0="
                .parse()?;

        assert_eq!(cs.identity().host_name(), "my-hub.azure-devices.net");
        assert_eq!(cs.identity().hub_name(), "my-hub");
        assert_eq!(cs.identity().device_id().as_str(), "my device/1");
        assert_eq!(
            cs.credential(),
            &ConnectionCredential::SharedAccessKey(SharedAccessKey::from_static("c2VjcmV0="))
        );
        Ok(())
    }

    #[test]
    fn keys_are_case_insensitive() -> Result<()> {
        let cs: ConnectionString =
            "hostname=h.net;deviceid=d;moduleid=m;gatewayhostname=edge.local;X509=TRUE"
                .parse()?;

        assert_eq!(cs.identity().module_id().map(|m| m.as_str()), Some("m"));
        assert_eq!(cs.identity().gateway_host_name(), Some("edge.local"));
        assert_eq!(cs.credential(), &ConnectionCredential::X509);
        Ok(())
    }

    #[test]
    fn embedded_signature_must_be_well_formed() -> Result<()> {
        let cs: ConnectionString = "HostName=h.net;DeviceId=d;SharedAccessSignature=SharedAccessSignature sig=s&se=1&sr=h.net%2Fdevices%2Fd"
            .parse()?;
        match cs.credential() {
            ConnectionCredential::SharedAccessSignature(token) => {
                assert_eq!(token.expiry().0, 1)
            }
            other => panic!("unexpected credential {:?}", other),
        }

        let err = "HostName=h.net;DeviceId=d;SharedAccessSignature=SharedAccessSignature sig=s&se=1"
            .parse::<ConnectionString>()
            .unwrap_err();
        assert!(err.is_malformed());
        Ok(())
    }

    #[test]
    fn rejects_invalid_connection_strings() {
        let cases = [
            "",
            "DeviceId=d;SharedAccessKey=k",
            "HostName=localhost;DeviceId=d;SharedAccessKey=k",
            "HostName=h.net;SharedAccessKey=k",
            "HostName=h.net;DeviceId=;SharedAccessKey=k",
            "HostName=h.net;DeviceId=d",
            "HostName=h.net;DeviceId=d;SharedAccessKey=",
            "HostName=h.net;DeviceId=d;SharedAccessKey=k;SharedAccessSignature=SharedAccessSignature sig=s&se=1&sr=x",
            "HostName=h.net;DeviceId=d;SharedAccessKey=k;x509=true",
        ];

        for case in cases {
            let err = case.parse::<ConnectionString>().unwrap_err();
            assert!(err.is_config(), "unexpected error for {:?}: {}", case, err);
        }
    }

    #[test]
    fn debug_hides_credentials() -> Result<()> {
        let cs: ConnectionString = "HostName=h.net;DeviceId=d;SharedAccessKey=c2VjcmV0".parse()?;
        assert!(!format!("{:?}", cs).contains("c2VjcmV0"));
        Ok(())
    }
}
