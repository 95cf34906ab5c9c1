//! Outbound status channel
//!
//! Everything the connectivity layer wants the user to know goes through a
//! single [`StatusSink`]; the UI (or CLI) owns the receiving end.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

/// Result of a user-visible operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringCapabilities,
    SendingCredentials,
    Provisioned,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    #[default]
    Idle,
    Provisioning,
    Monitoring,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    ProvisioningState(ProvisioningState),
    Provisioning(Outcome),
    Connectivity(ConnectivityState),
    HeartbeatLost(Outcome),
    Command(Outcome),
}

pub type StatusReceiver = mpsc::UnboundedReceiver<StatusEvent>;

/// Sending half of the status channel; also remembers the connectivity state
#[derive(Clone)]
pub struct StatusSink {
    tx: mpsc::UnboundedSender<StatusEvent>,
    connectivity: Arc<Mutex<ConnectivityState>>,
}

impl StatusSink {
    pub fn channel() -> (StatusSink, StatusReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = StatusSink { tx, connectivity: Arc::new(Mutex::new(ConnectivityState::Idle)) };
        (sink, rx)
    }

    pub fn emit(&self, event: StatusEvent) {
        // A closed receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }

    pub fn provisioning_state(&self, state: ProvisioningState) {
        tracing::debug!(?state, "provisioning state");
        self.emit(StatusEvent::ProvisioningState(state));
    }

    /// Emits only when the state actually changes
    pub fn set_connectivity(&self, state: ConnectivityState) {
        let mut current = self.connectivity.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == state {
            return;
        }
        tracing::info!(from = ?*current, to = ?state, "connectivity changed");
        *current = state;
        self.emit(StatusEvent::Connectivity(state));
    }

    pub fn connectivity(&self) -> ConnectivityState {
        *self.connectivity.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_changes_are_deduplicated() {
        let (sink, mut rx) = StatusSink::channel();
        sink.set_connectivity(ConnectivityState::Monitoring);
        sink.set_connectivity(ConnectivityState::Monitoring);
        sink.set_connectivity(ConnectivityState::Lost);

        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Connectivity(ConnectivityState::Monitoring));
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Connectivity(ConnectivityState::Lost));
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.connectivity(), ConnectivityState::Lost);
    }

    #[test]
    fn emitting_without_listener_is_harmless() {
        let (sink, rx) = StatusSink::channel();
        drop(rx);
        sink.emit(StatusEvent::Command(Outcome::success("ok")));
    }
}
