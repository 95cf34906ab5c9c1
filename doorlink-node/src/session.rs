//! Connectivity session - owns the provisioning job and the heartbeat loop
//!
//! The caller creates one session, keeps the [`crate::StatusReceiver`] end of the
//! status channel, and drives everything through it.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use doorlink_proto::{Command, door_command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::network::NetworkState;
use crate::provisioning::{Coordinator, ProvisioningConfig};
use crate::radio::Radio;
use crate::{
    CommandChannel, ConnectivityState, ControllerEndpoint, Outcome, ProvisioningError, Settings,
    StatusEvent, StatusSink, pairing,
};

pub const PROVISIONED_MESSAGE: &str = "Credentials sent!";

struct ProvisioningJob {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Session<R: Radio> {
    settings: watch::Receiver<Settings>,
    network: Arc<dyn NetworkState>,
    coordinator: Arc<Coordinator<R>>,
    heartbeat_config: HeartbeatConfig,
    status: StatusSink,
    monitor: Arc<HeartbeatMonitor>,
    provisioning: Mutex<Option<ProvisioningJob>>,
}

impl<R: Radio> Session<R> {
    pub fn new(
        radio: R,
        settings: watch::Receiver<Settings>,
        network: Arc<dyn NetworkState>,
        status: StatusSink,
    ) -> Self {
        Self::with_config(radio, settings, network, status, ProvisioningConfig::default(), HeartbeatConfig::default())
    }

    pub fn with_config(
        radio: R,
        settings: watch::Receiver<Settings>,
        network: Arc<dyn NetworkState>,
        status: StatusSink,
        provisioning: ProvisioningConfig,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        Self {
            settings,
            network,
            coordinator: Arc::new(Coordinator::new(radio, provisioning)),
            heartbeat_config: heartbeat,
            status,
            monitor: Arc::new(HeartbeatMonitor::new()),
            provisioning: Mutex::new(None),
        }
    }

    /// Settings as they are right now; one snapshot per operation
    pub fn settings(&self) -> Settings {
        self.settings.borrow().clone()
    }

    pub fn endpoint(&self) -> ControllerEndpoint {
        self.settings.borrow().endpoint()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.status.connectivity()
    }

    pub fn radio(&self) -> &R {
        self.coordinator.radio()
    }

    /// Start a provisioning attempt in the background
    ///
    /// Progress and the final outcome arrive on the status channel; on
    /// success the heartbeat monitor is (re)started.
    pub fn provision(&self) -> Result<(), ProvisioningError> {
        let mut job = self.provisioning.lock().unwrap_or_else(PoisonError::into_inner);
        if job.as_ref().is_some_and(|j| !j.task.is_finished()) || self.coordinator.is_busy() {
            return Err(ProvisioningError::ScanInProgress);
        }

        let cancel = CancellationToken::new();
        let settings = self.settings();
        let network = self.network.clone();
        let coordinator = self.coordinator.clone();
        let status = self.status.clone();
        let monitor = self.monitor.clone();
        let settings_rx = self.settings.clone();
        let heartbeat = self.heartbeat_config.clone();
        let token = cancel.clone();

        status.set_connectivity(ConnectivityState::Provisioning);
        let task = tokio::spawn(async move {
            let result = coordinator.provision(network.as_ref(), &settings, &status, &token).await;
            match result {
                Ok(()) => {
                    status.emit(StatusEvent::Provisioning(Outcome::success(PROVISIONED_MESSAGE)));
                    // Fresh snapshot: the monitor is a new operation.
                    let endpoint = settings_rx.borrow().endpoint();
                    monitor.start(endpoint, heartbeat, status.clone());
                }
                Err(e) => {
                    status.emit(StatusEvent::Provisioning(Outcome::failure(e.to_string())));
                    status.set_connectivity(if monitor.is_active() {
                        ConnectivityState::Monitoring
                    } else {
                        ConnectivityState::Idle
                    });
                }
            }
        });

        *job = Some(ProvisioningJob { cancel, task });
        Ok(())
    }

    /// Cancel a running provisioning attempt, if any
    pub fn cancel_provisioning(&self) {
        if let Some(job) = self.provisioning.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            job.cancel.cancel();
        }
    }

    /// Start monitoring without provisioning first (controller already on the network)
    pub fn start_heartbeat(&self) {
        self.monitor.start(self.endpoint(), self.heartbeat_config.clone(), self.status.clone());
    }

    pub async fn stop_heartbeat(&self) {
        if let Some(handle) = self.monitor.stop() {
            handle.join().await;
        }
        if self.status.connectivity() == ConnectivityState::Monitoring {
            self.status.set_connectivity(ConnectivityState::Idle);
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_active()
    }

    pub async fn send_command(&self, command: &Command) -> Outcome {
        let settings = self.settings();
        CommandChannel::new(settings.endpoint())
            .with_timeout(settings.command_timeout())
            .send_command(command)
            .await
    }

    pub async fn send_door_command(&self, target: &str, duration_ms: Option<i64>) -> Outcome {
        self.send_command(&door_command(target, duration_ms)).await
    }

    /// Run a door command as its own task; the outcome is also reported
    /// on the status channel
    pub fn spawn_door_command(&self, target: &str, duration_ms: Option<i64>) -> JoinHandle<Outcome> {
        let settings = self.settings();
        let command = door_command(target, duration_ms);
        let status = self.status.clone();

        tokio::spawn(async move {
            let outcome = CommandChannel::new(settings.endpoint())
                .with_timeout(settings.command_timeout())
                .send_command(&command)
                .await;
            status.emit(StatusEvent::Command(outcome.clone()));
            outcome
        })
    }

    /// Ask the controller to re-enter provisioning mode
    pub async fn request_pairing(&self) -> bool {
        let endpoint = self.endpoint();
        let target = SocketAddr::new(self.heartbeat_config.broadcast_address, endpoint.pairing_broadcast_port);
        pairing::request_pairing(target).await
    }

    /// Cancel everything and wait for the background work to wind down
    pub async fn shutdown(&self) {
        let job = self.provisioning.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(job) = job {
            job.cancel.cancel();
            let _ = job.task.await;
        }
        self.stop_heartbeat().await;
    }
}
