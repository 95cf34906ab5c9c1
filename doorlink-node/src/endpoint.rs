//! Controller address and the user settings the connectivity layer reads

use std::time::Duration;

use doorlink_proto::{COMMAND_PORT, PAIRING_BROADCAST_PORT};
use serde::{Deserialize, Serialize};

use crate::SettingsError;

pub const DEFAULT_CONTROLLER_ADDRESS: &str = "very-smart-controller.local";

/// Command timeouts outside this range are rejected by [`Settings::validate`]
pub const MIN_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the controller lives; one snapshot is used for a whole operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerEndpoint {
    pub address: String,
    pub command_port: u16,
    pub pairing_broadcast_port: u16,
}

impl ControllerEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            command_port: COMMAND_PORT,
            pairing_broadcast_port: PAIRING_BROADCAST_PORT,
        }
    }

    /// Non-standard ports, for mock controllers and tests
    pub fn with_ports(address: impl Into<String>, command_port: u16, pairing_broadcast_port: u16) -> Self {
        Self { address: address.into(), command_port, pairing_broadcast_port }
    }
}

/// Values owned by the configuration store
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub controller_address: String,
    #[serde(default)]
    pub wifi_password: String,
    /// Used instead of the SSID reported by the network when set
    #[serde(default)]
    pub ssid_override: Option<String>,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Port overrides, only needed when talking to a mock controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_broadcast_port: Option<u16>,
}

fn default_command_timeout_secs() -> u64 {
    MIN_COMMAND_TIMEOUT.as_secs()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            controller_address: DEFAULT_CONTROLLER_ADDRESS.to_string(),
            wifi_password: String::new(),
            ssid_override: None,
            command_timeout_secs: default_command_timeout_secs(),
            command_port: None,
            pairing_broadcast_port: None,
        }
    }
}

impl Settings {
    pub fn endpoint(&self) -> ControllerEndpoint {
        ControllerEndpoint::with_ports(
            self.controller_address.trim(),
            self.command_port.unwrap_or(COMMAND_PORT),
            self.pairing_broadcast_port.unwrap_or(PAIRING_BROADCAST_PORT),
        )
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
            .clamp(MIN_COMMAND_TIMEOUT, MAX_COMMAND_TIMEOUT)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.controller_address.trim().is_empty() {
            return Err(SettingsError::BlankAddress);
        }
        let timeout = Duration::from_secs(self.command_timeout_secs);
        if timeout < MIN_COMMAND_TIMEOUT || timeout > MAX_COMMAND_TIMEOUT {
            return Err(SettingsError::CommandTimeout(self.command_timeout_secs));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("controller_address", &self.controller_address)
            .field("wifi_password", &if self.wifi_password.is_empty() { "<not set>" } else { "<set>" })
            .field("ssid_override", &self.ssid_override)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("command_port", &self.command_port)
            .field("pairing_broadcast_port", &self.pairing_broadcast_port)
            .finish()
    }
}
