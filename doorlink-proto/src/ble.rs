//! BLE GATT constants and payload format for controller provisioning
//!
//! The controller advertises a name containing [`CONTROLLER_NAME_MATCH`] and
//! exposes one writable characteristic that accepts the Wi-Fi join payload.

use uuid::Uuid;

/// Provisioning service: 0000abcd-0000-1000-8000-00805f9b34fb
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000abcd_0000_1000_8000_00805f9b34fb);

/// Credentials characteristic (write): 0000dcba-0000-1000-8000-00805f9b34fb
pub const CREDENTIALS_UUID: Uuid = Uuid::from_u128(0x0000dcba_0000_1000_8000_00805f9b34fb);

/// Substring (case-insensitive) of the advertised name of controller modules
pub const CONTROLLER_NAME_MATCH: &str = "ESP32";

/// What some platforms report as SSID when it cannot be read
pub const UNKNOWN_SSID: &str = "<unknown ssid>";

/// Does an advertised name belong to the controller family?
pub fn is_controller_name(name: &str, pattern: &str) -> bool {
    name.to_ascii_lowercase().contains(&pattern.to_ascii_lowercase())
}

/// Strip the quotes platforms wrap around SSIDs
pub fn normalize_ssid(raw: &str) -> String {
    raw.replace('"', "").trim().to_string()
}

/// An SSID that can be handed to the controller
pub fn is_valid_ssid(ssid: &str) -> bool {
    let ssid = ssid.trim();
    !ssid.is_empty() && !ssid.eq_ignore_ascii_case(UNKNOWN_SSID)
}

/// Network join credentials written to the controller, built per attempt
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisioningCredentials {
    pub local_ip: String,
    pub ssid: String,
    pub password: String,
}

impl ProvisioningCredentials {
    /// `IP:<ip>;SSID:<ssid>;PASSWORD:<password>`
    pub fn payload(&self) -> Vec<u8> {
        format!("IP:{};SSID:{};PASSWORD:{}", self.local_ip, self.ssid, self.password).into_bytes()
    }
}

// Keep the password out of logs.
impl std::fmt::Debug for ProvisioningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningCredentials")
            .field("local_ip", &self.local_ip)
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}
