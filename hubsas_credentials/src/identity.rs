use hubsas::{DeviceId, DeviceIdRef, ModuleId, ModuleIdRef, ResourceScope};
use serde::Serialize;

use crate::error::{config_error, ConfigError};

/// The device or module a credential authenticates
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    host_name: String,
    gateway_host_name: Option<String>,
    device_id: DeviceId,
    module_id: Option<ModuleId>,
}

impl DeviceIdentity {
    /// Constructs the identity of a device on a hub
    ///
    /// # Errors
    ///
    /// The host name or the device identifier is empty.
    pub fn new(host_name: impl Into<String>, device_id: DeviceId) -> Result<Self, ConfigError> {
        let host_name = host_name.into();
        if host_name.is_empty() {
            return Err(config_error("host name cannot be empty"));
        }

        if device_id.as_str().is_empty() {
            return Err(config_error("device ID cannot be empty"));
        }

        Ok(Self {
            host_name,
            gateway_host_name: None,
            device_id,
            module_id: None,
        })
    }

    /// Narrows the identity to a module of the device
    ///
    /// # Errors
    ///
    /// The module identifier is empty.
    pub fn with_module_id(mut self, module_id: ModuleId) -> Result<Self, ConfigError> {
        if module_id.as_str().is_empty() {
            return Err(config_error("module ID cannot be empty"));
        }

        self.module_id = Some(module_id);
        Ok(self)
    }

    /// Routes the identity through a gateway
    ///
    /// Tokens are then scoped to the gateway rather than the hub. An empty gateway
    /// host name clears the override.
    #[must_use]
    pub fn with_gateway_host_name(mut self, gateway_host_name: impl Into<String>) -> Self {
        let gateway_host_name = gateway_host_name.into();
        self.gateway_host_name = if gateway_host_name.is_empty() {
            None
        } else {
            Some(gateway_host_name)
        };
        self
    }

    /// The hub host name
    #[inline]
    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// The hub name, being the first label of the host name
    #[must_use]
    pub fn hub_name(&self) -> &str {
        self.host_name
            .split('.')
            .next()
            .unwrap_or(&self.host_name)
    }

    /// The gateway host name, if any
    #[inline]
    #[must_use]
    pub fn gateway_host_name(&self) -> Option<&str> {
        self.gateway_host_name.as_deref()
    }

    /// The device identifier
    #[inline]
    #[must_use]
    pub fn device_id(&self) -> &DeviceIdRef {
        &self.device_id
    }

    /// The module identifier, if the identity is a module
    #[inline]
    #[must_use]
    pub fn module_id(&self) -> Option<&ModuleIdRef> {
        self.module_id.as_deref()
    }

    /// The resource scope that tokens for this identity are signed for
    #[must_use]
    pub fn scope(&self) -> ResourceScope {
        let host_name = self.gateway_host_name().unwrap_or(&self.host_name);
        ResourceScope::for_identity(host_name, self.device_id(), self.module_id())
    }
}
