//! JSON codec for broker payloads
//!
//! Inbound configuration arrives on the config topic as:
//! ```text
//! {"pattern": "christmas"}
//! {"led_on": true, "pattern": "christmas"}   (legacy)
//! <empty payload>                            (no configuration present)
//! ```
//!
//! Outbound status is published to the state/events topics as:
//! ```text
//! {"deviceId": ..., "registryId": ..., "lastResultStatus": bool|null,
//!  "pattern": string|null, "led_on": bool|null}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum config payload size (64 KB); the bridge caps config far lower
pub const MAX_CONFIG_SIZE: usize = 64 * 1024;

/// Pattern name used when a legacy config switches the lights off
pub const OFF_PATTERN: &str = "off";

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Config payload too large: {0} bytes (max: {MAX_CONFIG_SIZE})")]
    PayloadTooLarge(usize),

    #[error("Config payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Config carries neither a pattern nor led_on=false")]
    MissingPattern,
}

/// Desired device configuration pushed by the cloud
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_on: Option<bool>,
}

impl ConfigMessage {
    /// Resolve the pattern this config asks for.
    ///
    /// Legacy configs with `led_on: false` mean "lights off" regardless of
    /// the pattern field.
    pub fn desired_pattern(&self) -> Result<&str, CodecError> {
        if self.led_on == Some(false) {
            return Ok(OFF_PATTERN);
        }
        self.pattern
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(CodecError::MissingPattern)
    }
}

/// Device status snapshot published upstream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "registryId")]
    pub registry_id: String,
    #[serde(rename = "lastResultStatus")]
    pub last_result_status: Option<bool>,
    pub pattern: Option<String>,
    pub led_on: Option<bool>,
}

/// Decode a config payload.
///
/// Returns:
/// - `Ok(None)` if the payload is empty (no configuration present)
/// - `Ok(Some(config))` if the payload is a config object
/// - `Err(...)` if the payload cannot be decoded
pub fn decode_config(payload: &[u8]) -> Result<Option<ConfigMessage>, CodecError> {
    if payload.len() > MAX_CONFIG_SIZE {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(payload)?))
}

/// Encode a status message for publishing
pub fn encode_status(status: &StatusMessage) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(serde_json::to_vec(status)?))
}
