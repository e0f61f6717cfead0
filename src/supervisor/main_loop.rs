//! Supervisor main loop
//!
//! Owns the broker session and is the only task that touches it. Broker
//! events, health checks and periodic status publishes are handled one at a
//! time from a single select loop, so inbound config is applied in delivery
//! order.

use anyhow::{bail, Result};
use bytes::Bytes;
use light_edge_shared::{codec, defaults};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::MessageType;
use crate::broker::{BrokerSession, Health, SessionError, SessionNotice};
use crate::command::CommandExecutor;
use crate::transport::{DeliveryGuarantee, PublishError};

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Where periodic status goes
    pub message_type: MessageType,
    /// Periodic publish cadence for full state
    pub status_interval: Duration,
    /// Periodic publish cadence for telemetry events
    pub event_interval: Duration,
    /// How often the watchdog and token expiry are checked
    pub health_interval: Duration,
    /// Session rebuilds allowed in a row before giving up
    pub max_rebuilds: u32,
    /// Pattern applied at startup
    pub initial_pattern: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            message_type: MessageType::default(),
            status_interval: Duration::from_secs(defaults::STATUS_INTERVAL_SECS),
            event_interval: Duration::from_secs(defaults::EVENT_INTERVAL_SECS),
            health_interval: Duration::from_secs(1),
            max_rebuilds: defaults::MAX_SESSION_REBUILDS,
            initial_pattern: defaults::INITIAL_PATTERN.into(),
        }
    }
}

impl SupervisorConfig {
    fn periodic_interval(&self) -> Duration {
        match self.message_type {
            MessageType::State => self.status_interval,
            MessageType::Event => self.event_interval,
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    session: BrokerSession,
    executor: CommandExecutor,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        session: BrokerSession,
        executor: CommandExecutor,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            session,
            executor,
            shutdown,
        }
    }

    /// Run until shutdown, or until the session cannot be rebuilt
    pub async fn run(mut self) -> Result<()> {
        let initial = self.config.initial_pattern.clone();
        if let Err(e) = self.executor.sink().apply_pattern(&initial).await {
            warn!("[SUPERVISOR] Initial pattern {} not applied: {}", initial, e);
        }

        let identity = self.session.identity().clone();
        let state_topic = identity.state_topic();
        let periodic_topic = match self.config.message_type {
            MessageType::State => state_topic.clone(),
            MessageType::Event => identity.events_topic(),
        };

        // Recorded now, sent on every (re)connect
        if let Err(e) = self
            .session
            .subscribe(&identity.config_topic(), DeliveryGuarantee::AtLeastOnce)
            .await
        {
            warn!("[SUPERVISOR] Subscribe failed: {}", e);
        }

        info!("[SUPERVISOR] Starting for {}", identity);
        let result = self.supervise(&state_topic, &periodic_topic).await;
        self.teardown().await;
        result
    }

    async fn supervise(&mut self, state_topic: &str, periodic_topic: &str) -> Result<()> {
        if !self.recover().await? {
            return Ok(());
        }
        self.publish_status(state_topic).await;

        let mut health = interval(self.config.health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut periodic = interval(self.config.periodic_interval());
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The state was just published
        periodic.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("[SUPERVISOR] Shutdown requested");
                    return Ok(());
                }

                event = self.session.next_event() => {
                    match self.session.handle_event(event).await {
                        Some(SessionNotice::Config(payload)) => {
                            self.on_config(payload, state_topic).await;
                        }
                        Some(SessionNotice::ConnectionLost { reason }) => {
                            warn!("[SUPERVISOR] Connection lost: {}", reason);
                            if !self.recover().await? {
                                return Ok(());
                            }
                            self.publish_status(state_topic).await;
                        }
                        None => {}
                    }
                }

                _ = health.tick() => {
                    if !self.check_health().await? {
                        return Ok(());
                    }
                }

                _ = periodic.tick() => {
                    self.publish_status(periodic_topic).await;
                }
            }
        }
    }

    /// Watchdog and token expiry. Returns false if shutdown interrupted recovery.
    async fn check_health(&mut self) -> Result<bool> {
        match self.session.check_health().await {
            Health::Healthy => match self.session.refresh_if_due().await {
                Ok(_) => Ok(true),
                Err(SessionError::Shutdown) => Ok(false),
                Err(e) => {
                    warn!("[SUPERVISOR] Token refresh failed: {}", e);
                    self.recover().await
                }
            },
            Health::Stale { silence } => {
                warn!("[SUPERVISOR] Session stale after {:?}, reconnecting", silence);
                self.recover().await
            }
            Health::Disconnected => self.recover().await,
        }
    }

    /// Get the session connected again, rebuilding it when backoff runs out.
    ///
    /// Returns false if shutdown was requested meanwhile.
    async fn recover(&mut self) -> Result<bool> {
        let mut rebuilds = 0;
        loop {
            let err = match self.session.ensure_connected().await {
                Ok(()) => return Ok(true),
                Err(SessionError::Shutdown) => return Ok(false),
                Err(e) => e,
            };

            rebuilds += 1;
            if rebuilds > self.config.max_rebuilds {
                error!(
                    "[SUPERVISOR] Broker session failed after {} rebuilds: {}",
                    self.config.max_rebuilds, err
                );
                bail!(
                    "broker session could not be re-established after {} rebuilds: {}",
                    self.config.max_rebuilds,
                    err
                );
            }

            warn!(
                "[SUPERVISOR] Rebuilding broker session ({}/{}): {}",
                rebuilds, self.config.max_rebuilds, err
            );
            self.session.disconnect().await;
            self.session = self.session.reconstruct();
        }
    }

    async fn on_config(&mut self, payload: Bytes, state_topic: &str) {
        let result = self.executor.execute(&payload).await;
        debug!("[SUPERVISOR] Config handled: {:?}", result);
        if result.should_report() {
            self.publish_status(state_topic).await;
        }
    }

    async fn publish_status(&mut self, topic: &str) {
        let status = self.executor.sink().status().await;
        let payload = match codec::encode_status(&status.to_message()) {
            Ok(payload) => payload,
            Err(e) => {
                error!("[SUPERVISOR] Failed to encode status: {}", e);
                return;
            }
        };

        match self
            .session
            .publish(topic, payload, DeliveryGuarantee::AtLeastOnce)
            .await
        {
            Ok(()) => debug!("[SUPERVISOR] Published status to {}", topic),
            Err(PublishError::NotConnected) => {
                debug!("[SUPERVISOR] Not connected, status to {} skipped", topic)
            }
            // The session dropped the link; the next health check reconnects
            Err(e) => warn!("[SUPERVISOR] Status publish to {} failed: {}", topic, e),
        }
    }

    async fn teardown(&mut self) {
        self.session.disconnect().await;
        self.executor.sink().shutdown().await;
        info!("[SUPERVISOR] Stopped");
    }
}
