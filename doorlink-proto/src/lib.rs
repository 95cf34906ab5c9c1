//! Doorlink wire protocol - command/response messages and codec
//!
//! Commands travel to the controller as one line of JSON over TCP; the
//! controller answers with one JSON object.

pub mod ble;

use serde::{Deserialize, Serialize};

/// TCP port the controller accepts commands and liveness probes on
pub const COMMAND_PORT: u16 = 4211;

/// UDP port the controller listens on for pairing requests
pub const PAIRING_BROADCAST_PORT: u16 = 4210;

/// Sent (and immediately closed) to check the controller is alive
pub const LIVENESS_TOKEN: &[u8] = b"ARE_YOU_ALIVE_BRO\n";

/// Broadcast to ask the controller to re-enter provisioning mode
pub const PAIRING_TOKEN: &[u8] = b"PAIRING_MODE_REQUEST";

/// Command name understood by the controller's door relays
pub const PUSH_BUTTON: &str = "PUSH_BUTTON";

/// Actuation time used when the caller does not ask for one
pub const DEFAULT_DURATION_MS: u32 = 5000;

/// Largest response frame we are willing to buffer
pub const MAX_RESPONSE_LEN: u64 = 4096;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("response is not valid UTF-8")]
    NotText,
    #[error("malformed response: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("response reports success together with an error")]
    Inconsistent,
}

/// A single request for the controller to operate an actuator
///
/// Fields are private so a command cannot change once built, and there is
/// no `Deserialize`: [`Command::new`] is the only way to make one.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Command {
    #[serde(rename = "cmd")]
    command: String,
    target: String,
    #[serde(rename = "duration")]
    duration_ms: u32,
}

impl Command {
    /// A zero duration falls back to [`DEFAULT_DURATION_MS`].
    pub fn new(command: impl Into<String>, target: impl Into<String>, duration_ms: u32) -> Self {
        Self {
            command: command.into(),
            target: target.into(),
            duration_ms: if duration_ms == 0 { DEFAULT_DURATION_MS } else { duration_ms },
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }
}

/// Controller's answer to a [`Command`]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>, target: Option<String>) -> Self {
        Self { success: true, message: message.into(), target, error: None }
    }

    pub fn err(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), target: None, error: Some(error.into()) }
    }
}

/// Build a door command; missing or non-positive durations become the default.
pub fn door_command(target: &str, duration_ms: Option<i64>) -> Command {
    let duration_ms = match duration_ms {
        Some(d) if d > 0 => u32::try_from(d).unwrap_or(u32::MAX),
        _ => DEFAULT_DURATION_MS,
    };
    Command::new(PUSH_BUTTON, target, duration_ms)
}

/// Serialize a command to its JSON text (without the line terminator)
pub fn encode(command: &Command) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(command).map_err(CodecError::Encode)
}

/// Parse a controller response
///
/// Surrounding whitespace is ignored, unknown fields are skipped, and
/// `success`/`message` are mandatory.
pub fn decode(data: &[u8]) -> Result<CommandResponse, CodecError> {
    let text = std::str::from_utf8(data).map_err(|_| CodecError::NotText)?;
    let response: CommandResponse =
        serde_json::from_str(text.trim()).map_err(CodecError::Malformed)?;

    if response.success && response.error.is_some() {
        return Err(CodecError::Inconsistent);
    }

    Ok(response)
}
