//! Command channel - one TCP exchange per remote action

use std::future::Future;
use std::io;
use std::time::Duration;

use doorlink_proto::{Command, CommandResponse, MAX_RESPONSE_LEN, decode, door_command, encode};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::{CommandError, ControllerEndpoint, MIN_COMMAND_TIMEOUT, Outcome};

/// Sends commands to one endpoint snapshot
pub struct CommandChannel {
    endpoint: ControllerEndpoint,
    timeout: Duration,
}

impl CommandChannel {
    pub fn new(endpoint: ControllerEndpoint) -> Self {
        Self { endpoint, timeout: MIN_COMMAND_TIMEOUT }
    }

    /// Used for the connect timeout and again for the read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &ControllerEndpoint {
        &self.endpoint
    }

    /// Run one command; never fails, the outcome carries the reason
    pub async fn send_command(&self, command: &Command) -> Outcome {
        let outcome = outcome(command, self.exchange(command).await);
        tracing::info!(
            cmd = command.command(),
            target = command.target(),
            success = outcome.success,
            message = %outcome.message,
            "command finished"
        );
        outcome
    }

    pub async fn send_door_command(&self, target: &str, duration_ms: Option<i64>) -> Outcome {
        self.send_command(&door_command(target, duration_ms)).await
    }

    /// Write the command and read back a single response frame
    ///
    /// The stream is dropped (and the socket closed) on every return path.
    pub async fn exchange(&self, command: &Command) -> Result<CommandResponse, CommandError> {
        let addr = (self.endpoint.address.as_str(), self.endpoint.command_port);
        tracing::debug!(address = %self.endpoint.address, port = self.endpoint.command_port, "connecting");
        self.exchange_over(command, TcpStream::connect(addr)).await
    }

    /// [`exchange`](Self::exchange) over whatever stream `connect` yields
    async fn exchange_over<S, C>(&self, command: &Command, connect: C) -> Result<CommandResponse, CommandError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        C: Future<Output = io::Result<S>>,
    {
        let mut request = encode(command)?;
        request.push(b'\n');

        let mut stream = match timeout(self.timeout, connect).await {
            Err(_) => return Err(CommandError::Timeout),
            Ok(Err(e)) => return Err(CommandError::from_connect(e)),
            Ok(Ok(stream)) => stream,
        };

        match timeout(self.timeout, stream.write_all(&request)).await {
            Err(_) => return Err(CommandError::Timeout),
            Ok(Err(e)) => return Err(CommandError::from_transfer(e)),
            Ok(Ok(())) => {}
        }

        let mut raw = Vec::new();
        let mut reader = BufReader::new(&mut stream).take(MAX_RESPONSE_LEN);
        let read = timeout(self.timeout, reader.read_until(b'\n', &mut raw)).await;
        match read {
            // A partial frame may have arrived before the deadline.
            Err(_) if raw.is_empty() => return Err(CommandError::NoResponse),
            Err(_) => {}
            Ok(Ok(0)) => return Err(CommandError::NoResponse),
            Ok(Ok(_)) => {}
            Ok(Err(e)) if raw.is_empty() => return Err(CommandError::from_transfer(e)),
            Ok(Err(_)) => {}
        }

        decode(&raw).map_err(|e| {
            tracing::debug!(error = %e, "undecodable response");
            CommandError::InvalidResponse(String::from_utf8_lossy(&raw).trim().to_string())
        })
    }
}

fn outcome(command: &Command, result: Result<CommandResponse, CommandError>) -> Outcome {
    match result {
        Ok(response) => {
            let success = response.success;
            Outcome { success, message: describe(command, response) }
        }
        Err(e) => Outcome::failure(e.to_string()),
    }
}

/// Turn a decoded response into what the user sees
///
/// The controller's own message wins; a blank one is synthesized.
pub fn describe(command: &Command, response: CommandResponse) -> String {
    if !response.message.trim().is_empty() {
        return response.message;
    }
    if response.success {
        format!("{} door opened successfully", command.target())
    } else {
        let reason = response
            .error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| "Unknown error".to_string());
        format!("Failed to open {} door: {}", command.target(), reason)
    }
}
