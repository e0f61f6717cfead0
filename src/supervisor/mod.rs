//! Top-level control loop
//!
//! Coordinates broker session health, credential refresh and status
//! publication, and routes inbound config to the actuator.

mod main_loop;

pub use main_loop::{Supervisor, SupervisorConfig};

use std::fmt;

/// Topic family used for periodic status publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MessageType {
    /// Telemetry events at the event interval
    #[default]
    Event,
    /// Full device state at the status interval
    State,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Event => write!(f, "event"),
            MessageType::State => write!(f, "state"),
        }
    }
}
