//! Error types for connectivity operations
//!
//! The `Display` text of each variant is what the user sees, so every
//! terminal failure carries a short, specific reason.

use std::io;

use doorlink_proto::CodecError;

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("command timeout - controller not responding")]
    Timeout,
    #[error("cannot connect to controller - check IP/network")]
    Unreachable(#[source] io::Error),
    #[error("no response from controller")]
    NoResponse,
    #[error("invalid response format: {0}")]
    InvalidResponse(String),
    #[error("connection to controller lost - controller closed the connection")]
    ConnectionLost(#[source] io::Error),
    #[error("connection error: {0}")]
    Io(#[source] io::Error),
    #[error(transparent)]
    Encode(#[from] CodecError),
}

impl CommandError {
    /// Classify a failure while establishing the connection
    pub fn from_connect(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => CommandError::Timeout,
            _ => CommandError::Unreachable(e),
        }
    }

    /// Classify a failure once the connection is up
    pub fn from_transfer(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => CommandError::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => CommandError::ConnectionLost(e),
            _ => CommandError::Io(e),
        }
    }
}

/// Failures reported by the host radio stack
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("Bluetooth permission denied")]
    PermissionDenied,
    #[error("Bluetooth adapter unavailable - please enable Bluetooth")]
    AdapterUnavailable,
    #[error("timed out")]
    TimedOut,
    #[error("{0}")]
    Stack(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("scan already in progress")]
    ScanInProgress,
    #[error("scan failed: {0}")]
    ScanFailed(RadioError),
    #[error("controller not found")]
    NotFound,
    #[error("connect error: {0}")]
    ConnectFailed(RadioError),
    #[error("controller service not found")]
    ServiceNotFound,
    #[error("service discovery failed: {0}")]
    DiscoveryFailed(RadioError),
    #[error("Wi-Fi SSID unavailable - check location permission")]
    SsidUnavailable,
    #[error("Wi-Fi password not set - update it in settings")]
    PasswordNotSet,
    #[error("failed to send credentials: {0}")]
    WriteFailed(RadioError),
    #[error("provisioning cancelled")]
    Cancelled,
}

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("controller address not set")]
    BlankAddress,
    #[error("command timeout must be between 3 and 10 seconds, got {0}")]
    CommandTimeout(u64),
}
