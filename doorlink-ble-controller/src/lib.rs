//! Doorlink BLE Controller
//!
//! [`Radio`](doorlink_node::Radio) implementation on top of btleplug, plus a
//! plain scan for listing nearby controllers.
//!
//! # Example
//!
//! ```ignore
//! use doorlink_ble_controller::ble;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     for device in ble::scan(5).await? {
//!         println!("{} ({})", device.name, device.address);
//!     }
//!
//!     let radio = ble::BtleplugRadio::new().await?;
//!     // hand `radio` to doorlink_node::Session::new(...)
//!     Ok(())
//! }
//! ```

pub mod ble;

pub use ble::{BtleplugRadio, ControllerDevice, WriteStrategy};
