//! Client for an actuator running in a separate process
//!
//! The actuator process exposes:
//! - `GET /status` -> `{"pattern": ..., "led_on": ...}`
//! - `POST /setpattern {"pattern": ...}` -> `{"result": bool|null, "pattern": ...}`
//!
//! A `result` of `false` means the actuator does not know the pattern.

use async_trait::async_trait;
use light_edge_shared::{codec::OFF_PATTERN, DeviceIdentity, PatternRequest};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::traits::{DeviceStatus, LastResult, PatternError, PatternSink};

#[derive(Serialize)]
struct SetPatternRequest<'a> {
    pattern: &'a str,
}

#[derive(Debug, Deserialize)]
struct SetPatternReply {
    #[serde(default)]
    result: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RemoteStatus {
    pattern: Option<String>,
    led_on: Option<bool>,
}

/// Drives the lights through the actuator's HTTP surface
pub struct RemoteActuator {
    http: Client,
    base_url: String,
    // Held across each request so pattern changes stay serialized
    status: Mutex<DeviceStatus>,
}

impl RemoteActuator {
    pub fn new(
        base_url: impl Into<String>,
        identity: &DeviceIdentity,
        request_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            status: Mutex::new(DeviceStatus::new(identity)),
        })
    }

    async fn post_pattern(&self, name: &str) -> Result<SetPatternReply, PatternError> {
        let url = format!("{}/setpattern", self.base_url);
        let res = self
            .http
            .post(url)
            .json(&SetPatternRequest { pattern: name })
            .send()
            .await
            .map_err(|e| PatternError::Actuator(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(PatternError::Actuator(format!(
                "unexpected status: {} body={}",
                status, body
            )));
        }
        res.json::<SetPatternReply>()
            .await
            .map_err(|e| PatternError::Actuator(e.to_string()))
    }

    async fn fetch_status(&self) -> Result<RemoteStatus, reqwest::Error> {
        let url = format!("{}/status", self.base_url);
        self.http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<RemoteStatus>()
            .await
    }
}

#[async_trait]
impl PatternSink for RemoteActuator {
    async fn apply_pattern(&self, raw: &str) -> Result<(), PatternError> {
        let request = PatternRequest::new(raw);
        let mut status = self.status.lock().await;
        if request.is_empty() {
            status.last_result = Some(LastResult::failed("empty pattern name"));
            return Err(PatternError::EmptyPattern);
        }

        let name = request.pattern();
        if status.pattern.as_deref() == Some(name) {
            debug!("[ACTUATOR] Remote already running: {}", name);
            status.last_result = Some(LastResult::ok(format!("already running {}", name)));
            return Ok(());
        }

        match self.post_pattern(name).await {
            Ok(SetPatternReply { result: Some(false) }) => {
                warn!("[ACTUATOR] Remote actuator does not know pattern {}", name);
                status.last_result = Some(LastResult::failed(format!("unknown pattern {}", name)));
                Err(PatternError::UnknownPattern(name.to_string()))
            }
            Ok(_) => {
                info!("[ACTUATOR] Remote pattern set to {}", name);
                status.pattern = Some(name.to_string());
                status.led_on = Some(name != OFF_PATTERN);
                status.last_result = Some(LastResult::ok(format!("applied {}", name)));
                Ok(())
            }
            Err(e) => {
                warn!("[ACTUATOR] Remote actuator request failed: {}", e);
                status.last_result = Some(LastResult::failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn status(&self) -> DeviceStatus {
        let mut status = self.status.lock().await;
        match self.fetch_status().await {
            Ok(remote) => {
                status.pattern = remote.pattern;
                status.led_on = remote.led_on;
            }
            Err(e) => warn!("[ACTUATOR] Remote status unavailable, reporting cached: {}", e),
        }
        status.clone()
    }

    async fn shutdown(&self) {
        debug!("[ACTUATOR] Leaving remote actuator at its current pattern");
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
