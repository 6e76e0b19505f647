use std::fmt;

use crate::{grammar, DeviceIdRef, ModuleIdRef};

/// The resource a token grants access to
///
/// A device scope has the form `<host>/devices/<device>`, and a module scope
/// `<host>/devices/<device>/modules/<module>`. The scope is URL-encoded as a whole
/// before it is signed or embedded in a token as the `sr` field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceScope {
    raw: String,
    encoded: String,
}

impl ResourceScope {
    /// The scope of a device identity
    pub fn for_device(host_name: &str, device_id: impl AsRef<str>) -> Self {
        Self::from_raw(format!("{}/devices/{}", host_name, device_id.as_ref()))
    }

    /// The scope of a module identity
    pub fn for_module(
        host_name: &str,
        device_id: impl AsRef<str>,
        module_id: impl AsRef<str>,
    ) -> Self {
        Self::from_raw(format!(
            "{}/devices/{}/modules/{}",
            host_name,
            device_id.as_ref(),
            module_id.as_ref()
        ))
    }

    /// The scope of either a device or, if a module is given, a module identity
    pub fn for_identity(
        host_name: &str,
        device_id: &DeviceIdRef,
        module_id: Option<&ModuleIdRef>,
    ) -> Self {
        match module_id {
            Some(module_id) => Self::for_module(host_name, device_id, module_id),
            None => Self::for_device(host_name, device_id),
        }
    }

    fn from_raw(raw: String) -> Self {
        let encoded = grammar::url_encode(&raw);
        Self { raw, encoded }
    }

    /// The scope before URL encoding
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The URL-encoded scope, as signed and as carried in the `sr` field
    #[inline]
    #[must_use]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
