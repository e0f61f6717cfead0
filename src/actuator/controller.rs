//! Pattern controller
//!
//! Validates and de-duplicates pattern requests before they reach the
//! animation runner. Requests are serialized end to end: a request that
//! arrives while another is stopping or starting a renderer waits for it.

use async_trait::async_trait;
use light_edge_shared::{DeviceIdentity, PatternRequest};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::RendererRegistry;
use super::runner::AnimationRunner;
use super::strip::RenderFault;
use super::traits::{DeviceStatus, LastResult, PatternError, PatternSink};

pub struct PatternController {
    runner: Arc<Mutex<AnimationRunner>>,
    registry: RendererRegistry,
    status: Arc<watch::Sender<DeviceStatus>>,
    fault_monitor: JoinHandle<()>,
}

impl PatternController {
    pub fn new(
        runner: AnimationRunner,
        registry: RendererRegistry,
        identity: &DeviceIdentity,
    ) -> Self {
        let faults = runner.fault_notifier();
        let runner = Arc::new(Mutex::new(runner));
        let (status, _) = watch::channel(DeviceStatus::new(identity));
        let status = Arc::new(status);
        let fault_monitor = tokio::spawn(watch_faults(
            faults,
            Arc::downgrade(&runner),
            Arc::downgrade(&status),
        ));

        Self {
            runner,
            registry,
            status,
            fault_monitor,
        }
    }

    /// Snapshot of the current status; never waits on an in-flight request
    pub fn current_status(&self) -> DeviceStatus {
        self.status.borrow().clone()
    }

    fn record(&self, result: LastResult) {
        self.status.send_modify(|status| status.last_result = Some(result));
    }

    /// Normalize `raw` and make it the running pattern.
    ///
    /// The tracked pattern only changes once the new renderer has started;
    /// a failed request leaves it where it was.
    pub async fn apply_pattern(&self, raw: &str) -> Result<(), PatternError> {
        let request = PatternRequest::new(raw);
        if request.is_empty() {
            self.record(LastResult::failed("empty pattern name"));
            return Err(PatternError::EmptyPattern);
        }

        let mut runner = self.runner.lock().await;
        if let Some((pattern, fault)) = runner.take_fault() {
            clear_faulted(&self.status, &pattern, &fault);
        }
        let name = request.pattern();

        if runner.current() == Some(name) {
            if runner.is_running() {
                debug!("[ACTUATOR] Already running: {}", name);
            } else {
                debug!("[ACTUATOR] Already shown: {}", name);
            }
            self.record(LastResult::ok(format!("already running {}", name)));
            return Ok(());
        }

        let Some(renderer) = self.registry.get(name).copied() else {
            warn!("[ACTUATOR] Pattern not found: {}", name);
            self.record(LastResult::failed(format!("unknown pattern {}", name)));
            return Err(PatternError::UnknownPattern(name.to_string()));
        };

        runner.start(renderer.name, renderer.render).await;

        self.status.send_modify(|status| {
            status.pattern = Some(renderer.name.to_string());
            status.led_on = Some(renderer.lit);
            status.last_result = Some(LastResult::ok(format!("applied {}", renderer.name)));
        });
        info!(
            "[ACTUATOR] Pattern set to {} ({}ms after request)",
            renderer.name,
            light_edge_shared::now_ms().saturating_sub(request.received_at_ms())
        );
        Ok(())
    }

    /// Stop the running animation
    pub async fn stop(&self) {
        self.runner.lock().await.stop().await;
    }
}

impl Drop for PatternController {
    fn drop(&mut self) {
        self.fault_monitor.abort();
    }
}

/// Clear the slot and the reported pattern as soon as a renderer faults
async fn watch_faults(
    faults: Arc<Notify>,
    runner: Weak<Mutex<AnimationRunner>>,
    status: Weak<watch::Sender<DeviceStatus>>,
) {
    loop {
        faults.notified().await;
        let (Some(runner), Some(status)) = (runner.upgrade(), status.upgrade()) else {
            return;
        };
        let mut runner = runner.lock().await;
        if let Some((pattern, fault)) = runner.take_fault() {
            clear_faulted(&status, &pattern, &fault);
        }
    }
}

/// What is on the strip after a fault is unknown, so neither pattern nor
/// `led_on` is reported until the next successful request.
fn clear_faulted(status: &watch::Sender<DeviceStatus>, pattern: &str, fault: &RenderFault) {
    warn!("[ACTUATOR] Cleared pattern {} after fault: {}", pattern, fault);
    status.send_modify(|status| {
        status.pattern = None;
        status.led_on = None;
        status.last_result = Some(LastResult::failed(format!(
            "pattern {} faulted: {}",
            pattern, fault
        )));
    });
}

#[async_trait]
impl PatternSink for PatternController {
    async fn apply_pattern(&self, name: &str) -> Result<(), PatternError> {
        PatternController::apply_pattern(self, name).await
    }

    async fn status(&self) -> DeviceStatus {
        self.current_status()
    }

    async fn shutdown(&self) {
        self.stop().await;
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
