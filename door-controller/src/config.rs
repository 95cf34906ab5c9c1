//! Settings file and keyring access - settings live in DOORLINK_HOME

use std::fs;
use std::path::{Path, PathBuf};

use doorlink_node::{Settings, SettingsError};

const CONFIG_FILE: &str = "config.json";
const KEYRING_SERVICE: &str = "doorlink";
const KEYRING_USER: &str = "wifi-password";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not determine home directory, set DOORLINK_HOME")]
    NoHome,
    #[error("failed to access {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid config file {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("unknown setting '{0}'")]
    UnknownKey(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error(transparent)]
    Invalid(#[from] SettingsError),
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// DOORLINK_HOME, defaulting to ~/.doorlink
pub fn doorlink_home() -> Result<PathBuf, ConfigError> {
    if let Ok(home) = std::env::var("DOORLINK_HOME") {
        return Ok(PathBuf::from(home));
    }
    Ok(dirs::home_dir().ok_or(ConfigError::NoHome)?.join(".doorlink"))
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn open(home: &Path) -> Self {
        Self { path: home.join(CONFIG_FILE) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file means defaults
    pub fn load(&self) -> Result<Settings, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(source) => return Err(ConfigError::Io { path: self.path.clone(), source }),
        };
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse { path: self.path.clone(), source })
    }

    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io { path: self.path.clone(), source };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(io)?;
        }
        let json = serde_json::to_string_pretty(settings)
            .map_err(|source| ConfigError::Parse { path: self.path.clone(), source })?;
        fs::write(&self.path, json).map_err(io)
    }

    /// Change one key and persist; the result is validated before writing
    ///
    /// Keys: controller_address, wifi_password, keyring_password, ssid,
    /// command_timeout, command_port, pairing_port
    pub fn set(&self, key: &str, value: &str) -> Result<Settings, ConfigError> {
        let mut settings = self.load()?;
        apply(&mut settings, key, value)?;
        settings.validate()?;
        self.save(&settings)?;
        Ok(settings)
    }
}

fn apply(settings: &mut Settings, key: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() };
    let port = |v: &str| -> Result<Option<u16>, ConfigError> {
        if v.is_empty() { Ok(None) } else { v.parse().map(Some).map_err(|_| invalid()) }
    };

    match key {
        "controller_address" => settings.controller_address = value.trim().to_string(),
        "wifi_password" => settings.wifi_password = value.to_string(),
        "keyring_password" => set_keyring_password(value)?,
        "ssid" => settings.ssid_override = Some(value.to_string()).filter(|s| !s.trim().is_empty()),
        "command_timeout" => settings.command_timeout_secs = value.parse().map_err(|_| invalid())?,
        "command_port" => settings.command_port = port(value)?,
        "pairing_port" => settings.pairing_broadcast_port = port(value)?,
        _ => return Err(ConfigError::UnknownKey(key.to_string())),
    }
    Ok(())
}

fn keyring_entry() -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
}

fn set_keyring_password(password: &str) -> Result<(), ConfigError> {
    keyring_entry()?.set_password(password)?;
    Ok(())
}

/// Fill in the Wi-Fi password from the keyring when the file has none
pub fn resolve_password(settings: &mut Settings) {
    if !settings.wifi_password.is_empty() {
        return;
    }
    match keyring_entry().and_then(|entry| entry.get_password()) {
        Ok(password) => settings.wifi_password = password,
        Err(keyring::Error::NoEntry) => {}
        Err(e) => tracing::debug!(error = %e, "keyring lookup failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path());
        assert_eq!(store.load().unwrap(), Settings::default());
    }

    #[test]
    fn set_persists_single_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(&dir.path().join("nested"));

        store.set("controller_address", " 192.168.1.50 ").unwrap();
        store.set("command_timeout", "5").unwrap();
        store.set("command_port", "14211").unwrap();

        let settings = ConfigStore::open(&dir.path().join("nested")).load().unwrap();
        assert_eq!(settings.controller_address, "192.168.1.50");
        assert_eq!(settings.command_timeout_secs, 5);
        assert_eq!(settings.endpoint().command_port, 14211);
        assert_eq!(settings.wifi_password, "");
    }

    #[test]
    fn invalid_values_are_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path());

        assert!(matches!(store.set("command_timeout", "60"), Err(ConfigError::Invalid(_))));
        assert!(matches!(store.set("command_port", "http"), Err(ConfigError::InvalidValue { .. })));
        assert!(matches!(store.set("colour", "blue"), Err(ConfigError::UnknownKey(_))));
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path());
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(ConfigError::Parse { .. })));
    }
}
