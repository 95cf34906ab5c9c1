#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use doorlink_node::{
    EventSink, FoundDevice, GattTarget, Radio, RadioError, RadioEvent, StatusEvent, StatusReceiver,
};

/// What the fake radio answers; `None` means the stack never calls back
#[derive(Debug, Clone)]
pub struct Script {
    pub start_scan: Result<(), RadioError>,
    pub devices: Vec<(&'static str, &'static str)>,
    pub connect: Option<Result<(), RadioError>>,
    /// Link comes up only after this long, like a real stack
    pub connect_delay: Option<Duration>,
    pub discover: Option<Result<bool, RadioError>>,
    pub write: Option<Result<(), RadioError>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            start_scan: Ok(()),
            devices: vec![("Pixel Buds", "11:22:33:44:55:66"), ("ESP32-Door", "AA:BB:CC:DD:EE:FF")],
            connect: Some(Ok(())),
            connect_delay: None,
            discover: Some(Ok(true)),
            write: Some(Ok(())),
        }
    }
}

#[derive(Debug, Default)]
pub struct Log {
    pub scans_started: usize,
    pub scans_stopped: usize,
    pub connects: Vec<String>,
    pub disconnects: Vec<String>,
    /// Whether a link is currently up
    pub connected: bool,
    pub targets: Vec<GattTarget>,
    pub writes: Vec<Vec<u8>>,
}

/// Fake radio stack that answers from a [`Script`] and records every call
#[derive(Clone, Default)]
pub struct ScriptedRadio {
    script: Script,
    log: Arc<Mutex<Log>>,
    pending_connect: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ScriptedRadio {
    pub fn new(script: Script) -> Self {
        Self { script, log: Arc::default(), pending_connect: Arc::default() }
    }

    pub fn log(&self) -> Arc<Mutex<Log>> {
        self.log.clone()
    }
}

#[async_trait::async_trait]
impl Radio for ScriptedRadio {
    type Device = String;

    async fn start_scan(&self, events: EventSink<String>) -> Result<(), RadioError> {
        self.script.start_scan.clone()?;
        self.log.lock().unwrap().scans_started += 1;
        for (name, address) in &self.script.devices {
            let found = FoundDevice {
                device: name.to_string(),
                name: name.to_string(),
                address: address.to_string(),
            };
            let _ = events.send(RadioEvent::Found(found));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.log.lock().unwrap().scans_stopped += 1;
        Ok(())
    }

    fn connect(&self, device: &String, events: EventSink<String>) {
        self.log.lock().unwrap().connects.push(device.clone());
        let Some(result) = self.script.connect.clone() else {
            return;
        };

        let log = self.log.clone();
        let delay = self.script.connect_delay;
        let task = tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if result.is_ok() {
                log.lock().unwrap().connected = true;
            }
            let _ = events.send(RadioEvent::Connected(result));
        });
        *self.pending_connect.lock().unwrap() = Some(task);
    }

    fn discover(&self, _device: &String, target: GattTarget, events: EventSink<String>) {
        self.log.lock().unwrap().targets.push(target);
        if let Some(result) = self.script.discover.clone() {
            let _ = events.send(RadioEvent::ServicesDiscovered(result));
        }
    }

    fn write(&self, _device: &String, _target: GattTarget, payload: Vec<u8>, events: EventSink<String>) {
        self.log.lock().unwrap().writes.push(payload);
        if let Some(result) = self.script.write.clone() {
            let _ = events.send(RadioEvent::WriteCompleted(result));
        }
    }

    async fn disconnect(&self, device: &String) -> Result<(), RadioError> {
        let pending = self.pending_connect.lock().unwrap().take();
        if let Some(task) = pending {
            task.abort();
            let _ = task.await;
        }
        let mut log = self.log.lock().unwrap();
        log.disconnects.push(device.clone());
        log.connected = false;
        Ok(())
    }
}

/// Next status event matching `pick`, skipping the rest
pub async fn wait_for<T>(rx: &mut StatusReceiver, mut pick: impl FnMut(StatusEvent) -> Option<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("status channel closed");
            if let Some(value) = pick(event) {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for status event")
}

pub fn drain(rx: &mut StatusReceiver) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
