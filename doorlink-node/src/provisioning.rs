//! Provisioning coordinator - hands Wi-Fi credentials to the controller over BLE
//!
//! The coordinator is a small actor: it issues one radio request at a time
//! and waits for the matching [`RadioEvent`] on its channel, moving through
//! Scanning -> Connecting -> DiscoveringCapabilities -> SendingCredentials.
//! Every path out of the scan stops it and every path out of a connection
//! disconnects, including cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use doorlink_proto::ble::{CONTROLLER_NAME_MATCH, is_controller_name};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::network::{self, NetworkState};
use crate::radio::{EventSink, FoundDevice, GattTarget, Radio, RadioEvent};
use crate::{ProvisioningError, ProvisioningState, RadioError, Settings, StatusSink};

#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub scan_timeout: Duration,
    /// Upper bound for each of connect, discover and write
    pub step_timeout: Duration,
    pub name_filter: String,
    pub target: GattTarget,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(15),
            step_timeout: Duration::from_secs(30),
            name_filter: CONTROLLER_NAME_MATCH.to_string(),
            target: GattTarget::default(),
        }
    }
}

pub struct Coordinator<R: Radio> {
    radio: Arc<R>,
    config: ProvisioningConfig,
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag however the run ends
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: Radio> Coordinator<R> {
    pub fn new(radio: R, config: ProvisioningConfig) -> Self {
        Self { radio: Arc::new(radio), config, busy: Arc::new(AtomicBool::new(false)) }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// True while a run owns the scanner
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run one provisioning attempt to completion
    ///
    /// Fails with `ScanInProgress` if another attempt is still running.
    pub async fn provision(
        &self,
        network: &dyn NetworkState,
        settings: &Settings,
        status: &StatusSink,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisioningError> {
        if self.busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(ProvisioningError::ScanInProgress);
        }
        let _guard = BusyGuard(self.busy.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let mut run = Run { radio: &*self.radio, config: &self.config, status, cancel, tx, rx };

        let result = run.drive(network, settings).await;
        match &result {
            Ok(()) => {
                tracing::info!("controller provisioned");
                status.provisioning_state(ProvisioningState::Provisioned);
            }
            Err(e) => {
                tracing::warn!(error = %e, "provisioning failed");
                status.provisioning_state(ProvisioningState::Failed);
            }
        }
        result
    }
}

enum Interrupt {
    Cancelled,
    TimedOut,
    Closed,
}

impl Interrupt {
    fn into_error(self, on_timeout: ProvisioningError) -> ProvisioningError {
        match self {
            Interrupt::Cancelled => ProvisioningError::Cancelled,
            Interrupt::TimedOut | Interrupt::Closed => on_timeout,
        }
    }
}

struct Run<'a, R: Radio> {
    radio: &'a R,
    config: &'a ProvisioningConfig,
    status: &'a StatusSink,
    cancel: &'a CancellationToken,
    tx: EventSink<R::Device>,
    rx: mpsc::UnboundedReceiver<RadioEvent<R::Device>>,
}

impl<R: Radio> Run<'_, R> {
    async fn drive(&mut self, network: &dyn NetworkState, settings: &Settings) -> Result<(), ProvisioningError> {
        self.status.provisioning_state(ProvisioningState::Scanning);
        let found = self.scan().await?;
        tracing::info!(name = %found.name, address = %found.address, "controller found");

        self.status.provisioning_state(ProvisioningState::Connecting);
        self.radio.connect(&found.device, self.tx.clone());
        let result = self.connected(&found.device, network, settings).await;

        if let Err(e) = self.radio.disconnect(&found.device).await {
            tracing::debug!(error = %e, "disconnect failed");
        }
        result
    }

    async fn scan(&mut self) -> Result<FoundDevice<R::Device>, ProvisioningError> {
        self.radio
            .start_scan(self.tx.clone())
            .await
            .map_err(ProvisioningError::ScanFailed)?;

        let filter = self.config.name_filter.clone();
        let found = self
            .wait_for(self.config.scan_timeout, |event| match event {
                RadioEvent::Found(found) if is_controller_name(&found.name, &filter) => Some(found),
                RadioEvent::Found(found) => {
                    tracing::trace!(name = %found.name, "ignoring device");
                    None
                }
                _ => None,
            })
            .await;

        if let Err(e) = self.radio.stop_scan().await {
            tracing::warn!(error = %e, "failed to stop scan");
        }
        found.map_err(|i| i.into_error(ProvisioningError::NotFound))
    }

    /// Everything after the connect request; the caller disconnects
    async fn connected(
        &mut self,
        device: &R::Device,
        network: &dyn NetworkState,
        settings: &Settings,
    ) -> Result<(), ProvisioningError> {
        let step = self.config.step_timeout;

        self.wait_for(step, |event| match event {
            RadioEvent::Connected(result) => Some(result),
            _ => None,
        })
        .await
        .map_err(|i| i.into_error(ProvisioningError::ConnectFailed(RadioError::TimedOut)))?
        .map_err(ProvisioningError::ConnectFailed)?;

        self.status.provisioning_state(ProvisioningState::DiscoveringCapabilities);
        self.radio.discover(device, self.config.target, self.tx.clone());
        let present = self
            .wait_for(step, |event| match event {
                RadioEvent::ServicesDiscovered(result) => Some(result),
                _ => None,
            })
            .await
            .map_err(|i| i.into_error(ProvisioningError::DiscoveryFailed(RadioError::TimedOut)))?
            .map_err(ProvisioningError::DiscoveryFailed)?;
        if !present {
            return Err(ProvisioningError::ServiceNotFound);
        }

        self.status.provisioning_state(ProvisioningState::SendingCredentials);
        let credentials = network::credentials(network, settings)?;
        tracing::info!(ssid = %credentials.ssid, local_ip = %credentials.local_ip, "sending credentials");

        self.radio.write(device, self.config.target, credentials.payload(), self.tx.clone());
        self.wait_for(step, |event| match event {
            RadioEvent::WriteCompleted(result) => Some(result),
            _ => None,
        })
        .await
        .map_err(|i| i.into_error(ProvisioningError::WriteFailed(RadioError::TimedOut)))?
        .map_err(ProvisioningError::WriteFailed)
    }

    /// Wait for the event `pick` accepts; anything else is stale and dropped
    async fn wait_for<T>(
        &mut self,
        limit: Duration,
        mut pick: impl FnMut(RadioEvent<R::Device>) -> Option<T>,
    ) -> Result<T, Interrupt> {
        let deadline = sleep(limit);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Interrupt::Cancelled),
                _ = &mut deadline => return Err(Interrupt::TimedOut),
                event = self.rx.recv() => match event {
                    Some(event) => {
                        if let Some(value) = pick(event) {
                            return Ok(value);
                        }
                    }
                    None => return Err(Interrupt::Closed),
                },
            }
        }
    }
}
