//! Local network state needed to build provisioning credentials

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use doorlink_proto::ble::{ProvisioningCredentials, is_valid_ssid, normalize_ssid};

use crate::{ProvisioningError, Settings};

/// Read-only view of the network this host is on
pub trait NetworkState: Send + Sync {
    /// SSID as reported by the platform (quotes and all)
    fn current_ssid(&self) -> Option<String>;

    fn local_ip(&self) -> Option<IpAddr>;
}

/// Fixed answers, for hosts where the values are known up front
#[derive(Debug, Clone, Default)]
pub struct FixedNetwork {
    pub ssid: Option<String>,
    pub ip: Option<IpAddr>,
}

impl NetworkState for FixedNetwork {
    fn current_ssid(&self) -> Option<String> {
        self.ssid.clone()
    }

    fn local_ip(&self) -> Option<IpAddr> {
        self.ip
    }
}

/// Asks the operating system
#[derive(Debug, Clone, Default)]
pub struct SystemNetwork;

impl NetworkState for SystemNetwork {
    fn current_ssid(&self) -> Option<String> {
        let output = std::process::Command::new("iwgetid").arg("-r").output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Source address the routing table would pick; no packet is sent
    fn local_ip(&self) -> Option<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
        let ip = socket.local_addr().ok()?.ip();
        match ip {
            IpAddr::V4(v4) if v4.is_private() => Some(ip),
            _ => None,
        }
    }
}

/// Build fresh credentials for one provisioning attempt
///
/// The SSID is checked before the password; no I/O happens here.
pub fn credentials(
    network: &dyn NetworkState,
    settings: &Settings,
) -> Result<ProvisioningCredentials, ProvisioningError> {
    let ssid = settings
        .ssid_override
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .or_else(|| network.current_ssid())
        .map(|s| normalize_ssid(&s))
        .unwrap_or_default();

    if !is_valid_ssid(&ssid) {
        return Err(ProvisioningError::SsidUnavailable);
    }
    if settings.wifi_password.is_empty() {
        return Err(ProvisioningError::PasswordNotSet);
    }

    let local_ip = network.local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    Ok(ProvisioningCredentials {
        local_ip: local_ip.to_string(),
        ssid,
        password: settings.wifi_password.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(ssid: Option<&str>) -> FixedNetwork {
        FixedNetwork { ssid: ssid.map(str::to_string), ip: Some("192.168.1.20".parse().unwrap()) }
    }

    fn settings(password: &str) -> Settings {
        Settings { wifi_password: password.to_string(), ..Settings::default() }
    }

    #[test]
    fn builds_from_network_state() {
        let creds = credentials(&network(Some("\"HomeNet\"")), &settings("pw")).unwrap();
        assert_eq!(creds.payload(), b"IP:192.168.1.20;SSID:HomeNet;PASSWORD:pw".to_vec());
    }

    #[test]
    fn override_wins_over_reported_ssid() {
        let settings = Settings { ssid_override: Some("Garage".into()), ..settings("pw") };
        let creds = credentials(&network(Some("<unknown ssid>")), &settings).unwrap();
        assert_eq!(creds.ssid, "Garage");
    }

    #[test]
    fn missing_ip_falls_back_to_unspecified() {
        let net = FixedNetwork { ssid: Some("HomeNet".into()), ip: None };
        assert_eq!(credentials(&net, &settings("pw")).unwrap().local_ip, "0.0.0.0");
    }

    #[test]
    fn preconditions() {
        assert_eq!(
            credentials(&network(Some("<unknown ssid>")), &settings("pw")),
            Err(ProvisioningError::SsidUnavailable)
        );
        assert_eq!(credentials(&network(None), &settings("pw")), Err(ProvisioningError::SsidUnavailable));
        assert_eq!(
            credentials(&network(Some("HomeNet")), &settings("")),
            Err(ProvisioningError::PasswordNotSet)
        );
    }
}
