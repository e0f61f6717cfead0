//! Broker session with token refresh, backoff and watchdog-driven reconnection
//!
//! The session is owned by a single task (the supervisor). The transport's
//! background I/O task only talks to it through the event channel, so every
//! state change happens on the owner's side.

use bytes::Bytes;
use light_edge_shared::{
    defaults, now_secs, ConnectionState, ConnectionStateMachine, DeviceIdentity, SessionEvent,
    TransitionResult,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::{BackoffState, BackoffStep};
use super::watchdog::AckWatchdog;
use crate::credentials::{CredentialManager, SessionToken};
use crate::transport::{
    BrokerConnector, BrokerEvent, BrokerLink, ConnectError, ConnectRequest, DeliveryGuarantee,
    PublishError, SubscribeError,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("reconnect backoff exceeded the {0:?} ceiling")]
    BackoffExceeded(Duration),
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("session shut down")]
    Shutdown,
}

/// Configuration for a broker session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub identity: DeviceIdentity,
    /// Maximum silence before the watchdog presumes the link dead
    pub max_silence: Duration,
    /// Refresh the token this long before it expires
    pub refresh_margin: Duration,
    /// Retry failed connects with backoff
    pub auto_reconnect: bool,
    pub backoff_base: Duration,
    pub backoff_ceiling: Duration,
    pub backoff_jitter: Duration,
    /// Upper bound on handing a publish to the transport
    pub publish_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity: DeviceIdentity::new("my-project", "us-central1", "my-registry", "my-device"),
            max_silence: Duration::from_secs(defaults::WATCHDOG_MAX_SILENCE_SECS),
            refresh_margin: Duration::from_secs(defaults::TOKEN_REFRESH_MARGIN_SECS),
            auto_reconnect: true,
            backoff_base: Duration::from_secs(defaults::BACKOFF_BASE_SECS),
            backoff_ceiling: Duration::from_secs(defaults::BACKOFF_CEILING_SECS),
            backoff_jitter: Duration::from_millis(defaults::BACKOFF_JITTER_MS),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a session health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// The watchdog fired and the link was torn down
    Stale { silence: Duration },
    Disconnected,
}

/// Something the session owner has to act on
#[derive(Debug, Clone)]
pub enum SessionNotice {
    /// A payload arrived on the config topic
    Config(Bytes),
    /// The transport dropped the connection
    ConnectionLost { reason: String },
}

/// The single authenticated connection to the broker
pub struct BrokerSession {
    config: SessionConfig,
    credentials: CredentialManager,
    connector: Arc<dyn BrokerConnector>,
    shutdown: CancellationToken,
    fsm: ConnectionStateMachine,
    backoff: BackoffState,
    watchdog: AckWatchdog,
    token: Option<SessionToken>,
    link: Option<Box<dyn BrokerLink>>,
    events: Option<tokio::sync::mpsc::Receiver<BrokerEvent>>,
    subscriptions: Vec<(String, DeliveryGuarantee)>,
}

impl BrokerSession {
    pub fn new(
        config: SessionConfig,
        credentials: CredentialManager,
        connector: Arc<dyn BrokerConnector>,
        shutdown: CancellationToken,
    ) -> Self {
        let backoff = BackoffState::new(
            config.backoff_base,
            config.backoff_ceiling,
            config.backoff_jitter,
        );
        let watchdog = AckWatchdog::new(config.max_silence);

        Self {
            config,
            credentials,
            connector,
            shutdown,
            fsm: ConnectionStateMachine::new(),
            backoff,
            watchdog,
            token: None,
            link: None,
            events: None,
            subscriptions: Vec::new(),
        }
    }

    /// Build a replacement session with the same configuration and subscriptions.
    ///
    /// The caller is expected to have disconnected `self` first.
    pub fn reconstruct(&self) -> Self {
        let mut fresh = Self::new(
            self.config.clone(),
            self.credentials.clone(),
            self.connector.clone(),
            self.shutdown.clone(),
        );
        fresh.subscriptions = self.subscriptions.clone();
        fresh
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.config.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.fsm.state()
    }

    pub fn is_connected(&self) -> bool {
        self.fsm.is_connected()
    }

    /// Age of the current token in seconds
    pub fn token_age(&self) -> Option<u64> {
        self.token.as_ref().map(|t| t.age(now_secs()))
    }

    fn transition(&mut self, event: SessionEvent) {
        if let TransitionResult::Invalid { from, event } = self.fsm.process_event(event) {
            debug!("[BROKER] Ignoring {:?} while {}", event, from);
        }
    }

    fn token_due(&self) -> bool {
        match &self.token {
            Some(token) => CredentialManager::is_expiring_soon(
                token,
                now_secs(),
                self.config.refresh_margin.as_secs(),
            ),
            None => true,
        }
    }

    /// Make one connect attempt, issuing a fresh token if needed
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Disconnected => self.transition(SessionEvent::ConnectAttempt),
            ConnectionState::Backoff => self.transition(SessionEvent::BackoffElapsed),
            ConnectionState::Connecting => {}
        }

        let result = self.try_connect().await;
        if result.is_err() {
            self.transition(SessionEvent::AttemptFailed {
                auto_reconnect: self.config.auto_reconnect,
            });
        }
        result
    }

    async fn try_connect(&mut self) -> Result<(), ConnectError> {
        if self.token_due() {
            let token = self.credentials.refresh()?;
            debug!(
                "[BROKER] Token issued at {} expires at {}",
                token.issued_at(),
                token.expires_at()
            );
            self.token = Some(token);
        }
        let password = match &self.token {
            Some(token) => token.as_str().to_string(),
            None => return Err(ConnectError::Transport("no session token".into())),
        };

        let request = ConnectRequest {
            client_id: self.config.identity.client_id(),
            username: defaults::MQTT_USERNAME.into(),
            password,
        };
        let connection = self.connector.connect(&request).await?;

        self.link = Some(connection.link);
        self.events = Some(connection.events);
        self.transition(SessionEvent::Acknowledged);
        self.backoff.reset();
        self.watchdog.reset(Instant::now());
        info!(
            "[BROKER] Connected via {} as {}",
            self.connector.name(),
            request.client_id
        );

        // Subscriptions do not survive a transport-level reconnect
        let topics = self.subscriptions.clone();
        for (topic, qos) in topics {
            if let Err(e) = self.send_subscribe(&topic, qos).await {
                self.drop_connection(SessionEvent::TransportError).await;
                return Err(ConnectError::Transport(format!(
                    "resubscribe to {} failed: {}",
                    topic, e
                )));
            }
        }

        Ok(())
    }

    /// Connect, retrying with backoff until connected, exhausted or shut down
    pub async fn ensure_connected(&mut self) -> Result<(), SessionError> {
        loop {
            if self.is_connected() {
                return Ok(());
            }
            if self.shutdown.is_cancelled() {
                return Err(SessionError::Shutdown);
            }

            let err = match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            warn!("[BROKER] Connect failed: {}", err);

            if !self.config.auto_reconnect {
                return Err(SessionError::Connect(err));
            }

            match self.backoff.on_failure() {
                BackoffStep::Wait(delay) => {
                    info!("[BROKER] Waiting {:?} before reconnecting", delay);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(SessionError::Shutdown),
                        _ = sleep(delay) => {}
                    }
                    self.transition(SessionEvent::BackoffElapsed);
                }
                BackoffStep::Exhausted => {
                    error!(
                        "[BROKER] Exceeded maximum backoff time of {:?}, giving up",
                        self.config.backoff_ceiling
                    );
                    self.transition(SessionEvent::ExplicitDisconnect);
                    return Err(SessionError::BackoffExceeded(self.config.backoff_ceiling));
                }
            }
        }
    }

    /// Replace the token and reconnect if it is about to expire.
    ///
    /// Returns true if a refresh happened.
    pub async fn refresh_if_due(&mut self) -> Result<bool, SessionError> {
        if !self.is_connected() || !self.token_due() {
            return Ok(false);
        }

        info!(
            "[BROKER] Refreshing token after {}s",
            self.token_age().unwrap_or_default()
        );
        self.drop_connection(SessionEvent::ExplicitDisconnect).await;
        self.token = None;
        self.ensure_connected().await?;
        Ok(true)
    }

    /// Publish `payload`, refreshing the token first if it is due
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: DeliveryGuarantee,
    ) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        self.refresh_if_due()
            .await
            .map_err(|e| PublishError::Refresh(e.to_string()))?;

        let link = self.link.as_ref().ok_or(PublishError::NotConnected)?;
        let publish = link.publish(topic, payload, qos);
        let result = match timeout(self.config.publish_timeout, publish).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Transport(format!(
                "publish not accepted within {:?}",
                self.config.publish_timeout
            ))),
        };

        match result {
            Ok(()) => {
                self.watchdog.on_publish();
                Ok(())
            }
            Err(e) => {
                self.drop_connection(SessionEvent::TransportError).await;
                Err(e)
            }
        }
    }

    /// Register a subscription; it is re-established after every reconnect
    pub async fn subscribe(
        &mut self,
        topic: &str,
        qos: DeliveryGuarantee,
    ) -> Result<(), SubscribeError> {
        if !self.subscriptions.iter().any(|(t, _)| t == topic) {
            self.subscriptions.push((topic.to_string(), qos));
        }
        if !self.is_connected() {
            return Ok(());
        }
        if let Err(e) = self.send_subscribe(topic, qos).await {
            self.drop_connection(SessionEvent::TransportError).await;
            return Err(e);
        }
        Ok(())
    }

    async fn send_subscribe(
        &self,
        topic: &str,
        qos: DeliveryGuarantee,
    ) -> Result<(), SubscribeError> {
        let link = self.link.as_ref().ok_or(SubscribeError::NotConnected)?;
        match timeout(self.config.publish_timeout, link.subscribe(topic, qos)).await {
            Ok(result) => result,
            Err(_) => Err(SubscribeError::Transport(format!(
                "subscribe not accepted within {:?}",
                self.config.publish_timeout
            ))),
        }
    }

    /// Close the connection on purpose
    pub async fn disconnect(&mut self) {
        self.drop_connection(SessionEvent::ExplicitDisconnect).await;
    }

    async fn drop_connection(&mut self, event: SessionEvent) {
        if let Some(mut link) = self.link.take() {
            // Only a deliberate close is worth a graceful DISCONNECT
            if event == SessionEvent::ExplicitDisconnect {
                link.disconnect().await;
            }
        }
        self.events = None;
        self.transition(event);
    }

    /// Run the watchdog; a stale session is torn down so the owner can reconnect
    pub async fn check_health(&mut self) -> Health {
        if !self.is_connected() {
            return Health::Disconnected;
        }

        let now = Instant::now();
        if self.watchdog.is_stale(now) {
            let silence = self.watchdog.silence(now);
            warn!(
                "[BROKER] No acknowledgment for {:?} ({} unacked), forcing reconnect",
                silence,
                self.watchdog.unacked()
            );
            self.drop_connection(SessionEvent::WatchdogExpired).await;
            return Health::Stale { silence };
        }

        Health::Healthy
    }

    /// Wait for the next transport event; pends forever while disconnected
    pub async fn next_event(&mut self) -> BrokerEvent {
        match self.events.as_mut() {
            Some(events) => match events.recv().await {
                Some(event) => event,
                None => {
                    self.events = None;
                    BrokerEvent::Disconnected {
                        reason: "event stream closed".into(),
                    }
                }
            },
            None => std::future::pending().await,
        }
    }

    /// Apply a transport event to the session state
    pub async fn handle_event(&mut self, event: BrokerEvent) -> Option<SessionNotice> {
        match event {
            BrokerEvent::Acknowledged { packet_id } => {
                debug!("[BROKER] Published message acked (packet {})", packet_id);
                self.watchdog.on_ack(Instant::now());
                None
            }
            BrokerEvent::Subscribed { packet_id } => {
                debug!("[BROKER] Subscribed (packet {})", packet_id);
                None
            }
            BrokerEvent::SubscribeRejected { packet_id } => {
                warn!("[BROKER] Subscription refused (packet {})", packet_id);
                None
            }
            BrokerEvent::Message { topic, payload } => {
                if topic == self.config.identity.config_topic() {
                    Some(SessionNotice::Config(payload))
                } else {
                    debug!("[BROKER] Ignoring message on {}", topic);
                    None
                }
            }
            BrokerEvent::Disconnected { reason } => {
                warn!("[BROKER] Disconnected: {}", reason);
                self.drop_connection(SessionEvent::TransportError).await;
                Some(SessionNotice::ConnectionLost { reason })
            }
        }
    }
}
