//! The seam between command handling and whatever drives the lights

use async_trait::async_trait;
use light_edge_shared::{DeviceIdentity, StatusMessage};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("unknown pattern: {0:?}")]
    UnknownPattern(String),
    #[error("pattern name is empty")]
    EmptyPattern,
    #[error("actuator unavailable: {0}")]
    Actuator(String),
}

/// Outcome of the most recent pattern request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastResult {
    pub success: bool,
    pub message: String,
}

impl LastResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Snapshot of the device as reported upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub device_id: String,
    pub registry_id: String,
    pub pattern: Option<String>,
    pub led_on: Option<bool>,
    pub last_result: Option<LastResult>,
}

impl DeviceStatus {
    /// Status of a device that has not applied anything yet
    pub fn new(identity: &DeviceIdentity) -> Self {
        Self {
            device_id: identity.device_id.clone(),
            registry_id: identity.registry_id.clone(),
            pattern: None,
            led_on: None,
            last_result: None,
        }
    }

    pub fn to_message(&self) -> StatusMessage {
        StatusMessage {
            device_id: self.device_id.clone(),
            registry_id: self.registry_id.clone(),
            last_result_status: self.last_result.as_ref().map(|r| r.success),
            pattern: self.pattern.clone(),
            led_on: self.led_on,
        }
    }
}

/// Something that can apply a named pattern and report status
#[async_trait]
pub trait PatternSink: Send + Sync {
    /// Apply `name` (normalized first). Re-applying the current pattern is a no-op.
    async fn apply_pattern(&self, name: &str) -> Result<(), PatternError>;

    /// Best-known device status
    async fn status(&self) -> DeviceStatus;

    /// Stop driving the lights
    async fn shutdown(&self);

    /// Human-readable name for logs
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message_mapping() {
        let identity = DeviceIdentity::new("p", "r", "lights", "porch");
        let mut status = DeviceStatus::new(&identity);
        assert_eq!(status.to_message().last_result_status, None);

        status.pattern = Some("christmas".into());
        status.led_on = Some(true);
        status.last_result = Some(LastResult::failed("unknown pattern"));

        let message = status.to_message();
        assert_eq!(message.device_id, "porch");
        assert_eq!(message.registry_id, "lights");
        assert_eq!(message.pattern.as_deref(), Some("christmas"));
        assert_eq!(message.led_on, Some(true));
        assert_eq!(message.last_result_status, Some(false));
    }
}
