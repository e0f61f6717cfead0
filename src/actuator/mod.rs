//! Light actuator
//!
//! - `strip`: pixel output and revocable leases on it
//! - `patterns` / `registry`: the built-in renderers and their lookup table
//! - `runner`: the single actuator slot
//! - `controller`: validated, serialized pattern changes
//! - `remote`: the same interface over HTTP to a separate actuator process

mod controller;
mod patterns;
mod registry;
mod remote;
mod runner;
mod strip;
mod traits;

pub use controller::PatternController;
pub use registry::RendererRegistry;
pub use remote::RemoteActuator;
pub use runner::{AnimationRunner, RunnerConfig};
pub use strip::ConsoleSink;
pub use traits::PatternSink;

#[cfg(test)]
pub(crate) use controller::tests::controller as test_controller;
