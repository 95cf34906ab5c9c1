//! Radio capability used for provisioning
//!
//! Host radio stacks report progress through callbacks. Implementations of
//! [`Radio`] turn each request into a tagged [`RadioEvent`] pushed onto the
//! coordinator's channel; request methods only enqueue work and return.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::RadioError;

/// Service/characteristic pair the credentials are written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl Default for GattTarget {
    fn default() -> Self {
        Self {
            service: doorlink_proto::ble::SERVICE_UUID,
            characteristic: doorlink_proto::ble::CREDENTIALS_UUID,
        }
    }
}

/// A device seen while scanning
#[derive(Debug, Clone)]
pub struct FoundDevice<D> {
    pub device: D,
    pub name: String,
    pub address: String,
}

#[derive(Debug)]
pub enum RadioEvent<D> {
    Found(FoundDevice<D>),
    Connected(Result<(), RadioError>),
    /// `Ok(true)` when both the service and the characteristic exist
    ServicesDiscovered(Result<bool, RadioError>),
    WriteCompleted(Result<(), RadioError>),
}

pub type EventSink<D> = mpsc::UnboundedSender<RadioEvent<D>>;

#[async_trait::async_trait]
pub trait Radio: Send + Sync + 'static {
    type Device: Clone + Send + Sync + 'static;

    /// Begin scanning; every named device seen is reported as `Found`
    async fn start_scan(&self, events: EventSink<Self::Device>) -> Result<(), RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    /// Completion is reported as `Connected`
    fn connect(&self, device: &Self::Device, events: EventSink<Self::Device>);

    /// Completion is reported as `ServicesDiscovered`
    fn discover(&self, device: &Self::Device, target: GattTarget, events: EventSink<Self::Device>);

    /// Completion is reported as `WriteCompleted`
    fn write(
        &self,
        device: &Self::Device,
        target: GattTarget,
        payload: Vec<u8>,
        events: EventSink<Self::Device>,
    );

    /// Close the link, including one whose `connect` has not reported yet;
    /// a late-completing connect must not leave the device connected
    async fn disconnect(&self, device: &Self::Device) -> Result<(), RadioError>;
}
