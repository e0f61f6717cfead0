//! Transport trait abstraction for pluggable broker backends

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::credentials::CredentialError;

/// Broker delivery guarantee for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryGuarantee {
    AtMostOnce,
    #[default]
    AtLeastOnce,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("broker refused connection: {0}")]
    Rejected(String),
    #[error("no CONNACK within {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to read CA bundle {}: {source}", .path.display())]
    CaBundle {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credentials unavailable: {0}")]
    Credential(#[from] CredentialError),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("session is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("session is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Parameters for one connect attempt
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub client_id: String,
    pub username: String,
    pub password: String,
}

/// Notifications produced by the transport's background I/O task
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// The broker acknowledged a publish
    Acknowledged { packet_id: u16 },
    /// The broker granted a subscription
    Subscribed { packet_id: u16 },
    /// The broker refused a subscription
    SubscribeRejected { packet_id: u16 },
    /// A message arrived on a subscribed topic
    Message { topic: String, payload: Bytes },
    /// The transport closed or failed
    Disconnected { reason: String },
}

/// An established broker connection.
///
/// Events for this connection arrive on the receiver returned alongside it.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: DeliveryGuarantee,
    ) -> Result<(), PublishError>;

    async fn subscribe(&self, topic: &str, qos: DeliveryGuarantee) -> Result<(), SubscribeError>;

    /// Close the connection gracefully
    async fn disconnect(&mut self);
}

/// A live link plus its serialized event stream
pub struct BrokerConnection {
    pub link: Box<dyn BrokerLink>,
    pub events: mpsc::Receiver<BrokerEvent>,
}

/// Factory for broker connections
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Attempt to connect; resolves once the broker has acknowledged
    async fn connect(&self, request: &ConnectRequest) -> Result<BrokerConnection, ConnectError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
