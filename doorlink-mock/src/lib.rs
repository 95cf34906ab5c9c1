//! Doorlink Mock - stands in for a door controller on the local network
//!
//! Answers `PUSH_BUTTON` commands the way the real firmware does, accepts
//! liveness probes, and can be told to misbehave so client failure paths
//! can be exercised.

mod server;

pub use server::{Behavior, MockController, Stats, StatsSnapshot, respond};
