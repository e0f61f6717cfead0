//! Light Edge Shared Types
//!
//! This crate provides the wire schemas, device identity helpers and the
//! broker connection state machine shared by the edge agent and its tests.

pub mod codec;
pub mod identity;
pub mod pattern;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{CodecError, ConfigMessage, StatusMessage};
pub use identity::DeviceIdentity;
pub use pattern::PatternRequest;
pub use state_machine::{ConnectionState, ConnectionStateMachine, SessionEvent, TransitionResult};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Get current timestamp in whole seconds since Unix epoch
pub fn now_secs() -> u64 {
    now_ms() / 1000
}

/// Default operating parameters for the agent
pub mod defaults {
    /// Base reconnect delay in seconds
    pub const BACKOFF_BASE_SECS: u64 = 1;

    /// Reconnect delay ceiling; exceeding it is a terminal session failure
    pub const BACKOFF_CEILING_SECS: u64 = 32;

    /// Upper bound of the random jitter added to every backoff delay
    pub const BACKOFF_JITTER_MS: u64 = 1000;

    /// Maximum time without a broker acknowledgment before the session is stale
    pub const WATCHDOG_MAX_SILENCE_SECS: u64 = 60;

    /// Token validity for the standard deployment profile
    pub const TOKEN_VALIDITY_STANDARD_MINUTES: u64 = 240;

    /// Token validity for the extended deployment profile
    pub const TOKEN_VALIDITY_EXTENDED_MINUTES: u64 = 1440;

    /// Refresh the token this many seconds before it expires
    pub const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;

    /// Full device state publish interval
    pub const STATUS_INTERVAL_SECS: u64 = 30;

    /// Telemetry event publish interval
    pub const EVENT_INTERVAL_SECS: u64 = 5;

    /// Grace period a renderer gets to honour a stop request
    pub const STOP_GRACE_MS: u64 = 1000;

    /// Consecutive session reconstructions allowed before the process gives up
    pub const MAX_SESSION_REBUILDS: u32 = 3;

    /// Time allowed for the broker to acknowledge a connect
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Pixels on the reference light strand
    pub const PIXEL_COUNT: usize = 476;

    /// Pattern applied at startup
    pub const INITIAL_PATTERN: &str = "off";

    /// Username sent with the token; the bridge ignores it
    pub const MQTT_USERNAME: &str = "unused";
}
