//! Doorlink Node - connectivity layer between the app and a door controller
//!
//! Provisioning hands Wi-Fi credentials to the controller over BLE, the
//! heartbeat watches it once it is on the network, and the command channel
//! carries door actions. A [`Session`] ties the three together and reports
//! through a [`StatusSink`].

mod command;
mod endpoint;
mod error;
pub mod heartbeat;
pub mod network;
pub mod pairing;
pub mod provisioning;
pub mod radio;
mod session;
mod status;

pub use command::{CommandChannel, describe};
pub use endpoint::{
    ControllerEndpoint, DEFAULT_CONTROLLER_ADDRESS, MAX_COMMAND_TIMEOUT, MIN_COMMAND_TIMEOUT, Settings,
};
pub use error::{CommandError, ProvisioningError, RadioError, SettingsError};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, LOST_MESSAGE, MonitorExit, MonitorHandle};
pub use network::{FixedNetwork, NetworkState, SystemNetwork};
pub use provisioning::{Coordinator, ProvisioningConfig};
pub use radio::{EventSink, FoundDevice, GattTarget, Radio, RadioEvent};
pub use session::{PROVISIONED_MESSAGE, Session};
pub use status::{
    ConnectivityState, Outcome, ProvisioningState, StatusEvent, StatusReceiver, StatusSink,
};

// Re-export the wire types callers build commands from
pub use doorlink_proto::{Command, CommandResponse, door_command};
