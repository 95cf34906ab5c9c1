//! btleplug-backed radio
//!
//! Each request spawns a task that reports back on the coordinator's event
//! channel, so the coordinator never blocks on the stack itself.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use doorlink_node::{EventSink, FoundDevice, GattTarget, Radio, RadioError, RadioEvent};
use doorlink_proto::ble::{CONTROLLER_NAME_MATCH, is_controller_name};
use futures::StreamExt;
use tokio::task::JoinHandle;

/// A device seen by [`scan`]
#[derive(Debug, Clone)]
pub struct ControllerDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_controller: bool,
}

/// How the credentials characteristic is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Wait for the peripheral to acknowledge
    #[default]
    WithResponse,
    WithoutResponse,
}

impl From<WriteStrategy> for WriteType {
    fn from(strategy: WriteStrategy) -> Self {
        match strategy {
            WriteStrategy::WithResponse => WriteType::WithResponse,
            WriteStrategy::WithoutResponse => WriteType::WithoutResponse,
        }
    }
}

fn radio_error(e: btleplug::Error) -> RadioError {
    match e {
        btleplug::Error::PermissionDenied => RadioError::PermissionDenied,
        btleplug::Error::TimedOut(_) => RadioError::TimedOut,
        other => RadioError::Stack(other.to_string()),
    }
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, RadioError> {
    let manager = Manager::new().await.map_err(radio_error)?;
    let adapters = manager.adapters().await.map_err(radio_error)?;
    adapters.into_iter().next().ok_or(RadioError::AdapterUnavailable)
}

/// Scan for BLE devices
///
/// Returns every named device; controllers have `is_controller = true`.
pub async fn scan(duration_secs: u64) -> Result<Vec<ControllerDevice>, RadioError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await.map_err(radio_error)?;
    tokio::time::sleep(Duration::from_secs(duration_secs)).await;

    let peripherals = adapter.peripherals().await.map_err(radio_error);
    let stopped = adapter.stop_scan().await.map_err(radio_error);
    let peripherals = peripherals?;
    stopped?;

    let mut devices = Vec::new();
    for peripheral in peripherals {
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };
        let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
        let is_controller = is_controller_name(&name, CONTROLLER_NAME_MATCH);
        devices.push(ControllerDevice {
            name,
            address: peripheral.address().to_string(),
            rssi: props.rssi,
            is_controller,
        });
    }
    Ok(devices)
}

/// Holds at most one background task; replacing or clearing aborts it
#[derive(Default)]
struct TaskSlot(Mutex<Option<JoinHandle<()>>>);

impl TaskSlot {
    fn replace(&self, task: JoinHandle<()>) {
        let previous = self.0.lock().unwrap_or_else(PoisonError::into_inner).replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn abort(&self) {
        let task = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

pub struct BtleplugRadio {
    adapter: Adapter,
    write_type: WriteType,
    scan_task: TaskSlot,
    connect_task: TaskSlot,
}

impl BtleplugRadio {
    /// Use the first adapter the platform reports
    pub async fn new() -> Result<Self, RadioError> {
        Ok(Self::with_adapter(get_adapter().await?))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            write_type: WriteType::WithResponse,
            scan_task: TaskSlot::default(),
            connect_task: TaskSlot::default(),
        }
    }

    pub fn with_write_strategy(mut self, strategy: WriteStrategy) -> Self {
        self.write_type = strategy.into();
        self
    }
}

#[async_trait::async_trait]
impl Radio for BtleplugRadio {
    type Device = Peripheral;

    async fn start_scan(&self, events: EventSink<Peripheral>) -> Result<(), RadioError> {
        let mut stream = self.adapter.events().await.map_err(radio_error)?;
        self.adapter.start_scan(ScanFilter::default()).await.map_err(radio_error)?;
        tracing::debug!("scan started");

        let adapter = self.adapter.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(props)) = peripheral.properties().await else {
                    continue;
                };
                let Some(name) = props.local_name else {
                    continue;
                };

                let found = FoundDevice { address: peripheral.address().to_string(), device: peripheral, name };
                if events.send(RadioEvent::Found(found)).is_err() {
                    break;
                }
            }
        });

        self.scan_task.replace(task);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.scan_task.abort();
        self.adapter.stop_scan().await.map_err(radio_error)
    }

    fn connect(&self, device: &Peripheral, events: EventSink<Peripheral>) {
        let device = device.clone();
        self.connect_task.replace(tokio::spawn(async move {
            let result = device.connect().await.map_err(radio_error);
            let _ = events.send(RadioEvent::Connected(result));
        }));
    }

    fn discover(&self, device: &Peripheral, target: GattTarget, events: EventSink<Peripheral>) {
        let device = device.clone();
        tokio::spawn(async move {
            let result = device.discover_services().await.map_err(radio_error).map(|()| {
                device.services().iter().any(|service| {
                    service.uuid == target.service
                        && service.characteristics.iter().any(|c| c.uuid == target.characteristic)
                })
            });
            let _ = events.send(RadioEvent::ServicesDiscovered(result));
        });
    }

    fn write(&self, device: &Peripheral, target: GattTarget, payload: Vec<u8>, events: EventSink<Peripheral>) {
        let device = device.clone();
        let write_type = self.write_type;
        tokio::spawn(async move {
            let characteristic = device
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == target.characteristic && c.service_uuid == target.service);

            let result = match characteristic {
                Some(characteristic) => {
                    device.write(&characteristic, &payload, write_type).await.map_err(radio_error)
                }
                None => Err(RadioError::Stack("credentials characteristic not found".to_string())),
            };
            let _ = events.send(RadioEvent::WriteCompleted(result));
        });
    }

    /// Also covers a connect still in flight: the link may come up after
    /// the caller stopped waiting, so it is torn down regardless.
    async fn disconnect(&self, device: &Peripheral) -> Result<(), RadioError> {
        self.connect_task.abort();
        match device.disconnect().await {
            Ok(()) | Err(btleplug::Error::NotConnected) => Ok(()),
            Err(e) => Err(radio_error(e)),
        }
    }
}
