//! Command execution for the edge device
//!
//! This module handles:
//! - Decoding configuration payloads from the broker
//! - Dispatching the requested pattern to the actuator
//! - Classifying the outcome for status reporting

mod executor;

pub use executor::CommandExecutor;
