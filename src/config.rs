//! Command-line and environment configuration

use clap::{Parser, ValueEnum};
use light_edge_shared::{defaults, DeviceIdentity};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::actuator::RunnerConfig;
use crate::broker::SessionConfig;
use crate::credentials::{CredentialManager, SigningAlgorithm};
use crate::supervisor::{MessageType, SupervisorConfig};
use crate::transport::MqttConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("refresh margin {margin_secs}s exceeds half the {validity_secs}s token validity")]
    RefreshMarginTooLong { margin_secs: u64, validity_secs: u64 },
}

/// Token lifetime presets for different deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Profile {
    /// Four-hour tokens
    #[default]
    Standard,
    /// Day-long tokens
    Extended,
}

impl Profile {
    pub fn token_validity_minutes(self) -> u64 {
        match self {
            Profile::Standard => defaults::TOKEN_VALIDITY_STANDARD_MINUTES,
            Profile::Extended => defaults::TOKEN_VALIDITY_EXTENDED_MINUTES,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "light-edge", about = "Cloud-connected light strip agent")]
pub struct Cli {
    /// Cloud project id
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    pub project_id: String,

    /// Device registry id
    #[arg(long, env = "REGISTRY_ID")]
    pub registry_id: String,

    /// Device id
    #[arg(long, env = "DEVICE_ID")]
    pub device_id: String,

    /// Cloud region
    #[arg(long, env = "CLOUD_REGION", default_value = "us-central1")]
    pub cloud_region: String,

    /// Private key used to sign session tokens
    #[arg(long, env = "PRIVATE_KEY_FILE", default_value = ".keys/device.key")]
    pub private_key_file: PathBuf,

    /// Token signing algorithm
    #[arg(long, value_enum, default_value_t = SigningAlgorithm::Rs256)]
    pub algorithm: SigningAlgorithm,

    /// CA root bundle for the bridge TLS connection
    #[arg(long, env = "CA_CERTS", default_value = ".keys/roots.pem")]
    pub ca_certs: PathBuf,

    /// MQTT bridge hostname
    #[arg(long, default_value = "mqtt.googleapis.com")]
    pub mqtt_bridge_hostname: String,

    /// MQTT bridge port
    #[arg(long, default_value_t = 8883)]
    pub mqtt_bridge_port: u16,

    /// Topic family for periodic publishes
    #[arg(long, value_enum, default_value_t = MessageType::Event)]
    pub message_type: MessageType,

    /// Token lifetime preset
    #[arg(long, value_enum, default_value_t = Profile::Standard)]
    pub profile: Profile,

    /// Token lifetime in minutes; overrides --profile
    #[arg(long)]
    pub token_validity_minutes: Option<u64>,

    /// Refresh the token this many seconds before it expires
    #[arg(long, default_value_t = defaults::TOKEN_REFRESH_MARGIN_SECS)]
    pub token_refresh_margin_secs: u64,

    /// Give up on a session once the reconnect delay exceeds this
    #[arg(long, default_value_t = defaults::BACKOFF_CEILING_SECS)]
    pub backoff_ceiling_secs: u64,

    /// Reconnect if nothing is acknowledged for this long
    #[arg(long, default_value_t = defaults::WATCHDOG_MAX_SILENCE_SECS)]
    pub watchdog_max_silence_secs: u64,

    /// State publish interval
    #[arg(long, default_value_t = defaults::STATUS_INTERVAL_SECS)]
    pub status_interval_secs: u64,

    /// Event publish interval
    #[arg(long, default_value_t = defaults::EVENT_INTERVAL_SECS)]
    pub event_interval_secs: u64,

    /// Time a renderer gets to stop before it is aborted
    #[arg(long, default_value_t = defaults::STOP_GRACE_MS)]
    pub stop_grace_ms: u64,

    /// Session rebuilds allowed before exiting
    #[arg(long, default_value_t = defaults::MAX_SESSION_REBUILDS)]
    pub max_rebuilds: u32,

    /// Time allowed for the broker to accept a connection
    #[arg(long, default_value_t = defaults::CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,

    /// Pixels on the strip
    #[arg(long, default_value_t = defaults::PIXEL_COUNT)]
    pub pixel_count: usize,

    /// Pattern applied at startup
    #[arg(long, default_value = defaults::INITIAL_PATTERN)]
    pub initial_pattern: String,

    /// Base URL of a separate actuator process; drives the strip locally when unset
    #[arg(long, env = "ACTUATOR_URL")]
    pub actuator_url: Option<String>,
}

impl Cli {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(
            &self.project_id,
            &self.cloud_region,
            &self.registry_id,
            &self.device_id,
        )
    }

    /// Reject combinations that would have the session reconnect for a new
    /// token on every health tick
    pub fn validate(&self) -> Result<(), ConfigError> {
        let validity_secs = self.token_validity_minutes().saturating_mul(60);
        if self.token_refresh_margin_secs.saturating_mul(2) > validity_secs {
            return Err(ConfigError::RefreshMarginTooLong {
                margin_secs: self.token_refresh_margin_secs,
                validity_secs,
            });
        }
        Ok(())
    }

    pub fn token_validity_minutes(&self) -> u64 {
        self.token_validity_minutes
            .unwrap_or_else(|| self.profile.token_validity_minutes())
    }

    /// Tokens are issued for the project
    pub fn credentials(&self) -> CredentialManager {
        CredentialManager::new(
            &self.project_id,
            &self.private_key_file,
            self.algorithm,
            self.token_validity_minutes(),
        )
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.mqtt_bridge_hostname.clone(),
            port: self.mqtt_bridge_port,
            ca_certs: self.ca_certs.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ..Default::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            identity: self.identity(),
            max_silence: Duration::from_secs(self.watchdog_max_silence_secs),
            refresh_margin: Duration::from_secs(self.token_refresh_margin_secs),
            backoff_ceiling: Duration::from_secs(self.backoff_ceiling_secs),
            ..Default::default()
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            grace: Duration::from_millis(self.stop_grace_ms),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            message_type: self.message_type,
            status_interval: Duration::from_secs(self.status_interval_secs),
            event_interval: Duration::from_secs(self.event_interval_secs),
            max_rebuilds: self.max_rebuilds,
            initial_pattern: self.initial_pattern.clone(),
            ..Default::default()
        }
    }
}
