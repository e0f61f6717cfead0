//! Device identity and broker topic naming

use std::fmt;

/// Identifies one device registered with the cloud bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub project_id: String,
    pub region: String,
    pub registry_id: String,
    pub device_id: String,
}

impl DeviceIdentity {
    pub fn new(
        project_id: impl Into<String>,
        region: impl Into<String>,
        registry_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            region: region.into(),
            registry_id: registry_id.into(),
            device_id: device_id.into(),
        }
    }

    /// Client identifier presented to the broker
    pub fn client_id(&self) -> String {
        format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            self.project_id, self.region, self.registry_id, self.device_id
        )
    }

    /// Inbound configuration topic
    pub fn config_topic(&self) -> String {
        format!("/devices/{}/config", self.device_id)
    }

    /// Outbound device state topic
    pub fn state_topic(&self) -> String {
        format!("/devices/{}/state", self.device_id)
    }

    /// Outbound telemetry event topic
    pub fn events_topic(&self) -> String {
        format!("/devices/{}/events", self.device_id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.client_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_format() {
        let id = DeviceIdentity::new("proj", "us-central1", "lights", "porch");
        assert_eq!(
            id.client_id(),
            "projects/proj/locations/us-central1/registries/lights/devices/porch"
        );
    }

    #[test]
    fn test_topics() {
        let id = DeviceIdentity::new("proj", "us-central1", "lights", "porch");
        assert_eq!(id.config_topic(), "/devices/porch/config");
        assert_eq!(id.state_topic(), "/devices/porch/state");
        assert_eq!(id.events_topic(), "/devices/porch/events");
    }
}
