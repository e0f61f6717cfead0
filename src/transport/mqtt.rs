//! MQTT bridge transport over TLS

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode, TlsConfiguration, Transport,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::traits::{
    BrokerConnection, BrokerConnector, BrokerEvent, BrokerLink, ConnectError, ConnectRequest,
    DeliveryGuarantee, PublishError, SubscribeError,
};

/// Time allowed for a DISCONNECT to be flushed before the I/O task is dropped
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

/// Configuration for the MQTT bridge connection
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// PEM bundle of trusted root certificates
    pub ca_certs: PathBuf,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    /// Capacity of the request and event queues
    pub queue_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "mqtt.googleapis.com".into(),
            port: 8883,
            ca_certs: ".keys/roots.pem".into(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            queue_capacity: 100,
        }
    }
}

impl From<DeliveryGuarantee> for QoS {
    fn from(qos: DeliveryGuarantee) -> Self {
        match qos {
            DeliveryGuarantee::AtMostOnce => QoS::AtMostOnce,
            DeliveryGuarantee::AtLeastOnce => QoS::AtLeastOnce,
        }
    }
}

/// Connects to the MQTT bridge with TLS and token authentication
pub struct MqttConnector {
    config: MqttConfig,
}

impl MqttConnector {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<BrokerConnection, ConnectError> {
        let ca = tokio::fs::read(&self.config.ca_certs)
            .await
            .map_err(|source| ConnectError::CaBundle {
                path: self.config.ca_certs.clone(),
                source,
            })?;

        let mut options = MqttOptions::new(
            request.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options
            .set_credentials(request.username.clone(), request.password.clone())
            .set_keep_alive(self.config.keep_alive)
            .set_clean_session(true)
            .set_transport(Transport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }));

        let (client, eventloop) = AsyncClient::new(options, self.config.queue_capacity);
        let (event_tx, event_rx) = mpsc::channel(self.config.queue_capacity);
        let (ready_tx, ready_rx) = oneshot::channel();

        debug!(
            "[MQTT] Connecting to {}:{} as {}",
            self.config.host, self.config.port, request.client_id
        );
        let poller = tokio::spawn(poll_loop(eventloop, ready_tx, event_tx));

        let outcome = match timeout(self.config.connect_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectError::Transport(
                "event loop ended before CONNACK".into(),
            )),
            Err(_) => Err(ConnectError::Timeout(self.config.connect_timeout)),
        };

        match outcome {
            Ok(()) => Ok(BrokerConnection {
                link: Box::new(MqttLink { client, poller }),
                events: event_rx,
            }),
            Err(e) => {
                poller.abort();
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

/// Drive the client's network I/O and translate packets into broker events.
///
/// Runs until the connection fails or the session drops its event receiver.
async fn poll_loop(
    mut eventloop: EventLoop,
    ready: oneshot::Sender<Result<(), ConnectError>>,
    events: mpsc::Sender<BrokerEvent>,
) {
    let mut ready = Some(ready);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let accepted = ack.code == ConnectReturnCode::Success;
                if let Some(tx) = ready.take() {
                    let result = if accepted {
                        Ok(())
                    } else {
                        Err(ConnectError::Rejected(format!("{:?}", ack.code)))
                    };
                    let _ = tx.send(result);
                }
                if !accepted {
                    return;
                }
            }
            Ok(Event::Incoming(packet)) => {
                if let Some(event) = translate(packet) {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Event::Outgoing(outgoing)) => {
                trace!("[MQTT] Outgoing {:?}", outgoing);
            }
            Err(e) => {
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(ConnectError::Transport(e.to_string())));
                    }
                    None => {
                        let _ = events
                            .send(BrokerEvent::Disconnected {
                                reason: e.to_string(),
                            })
                            .await;
                    }
                }
                return;
            }
        }
    }
}

fn translate(packet: Packet) -> Option<BrokerEvent> {
    match packet {
        Packet::PubAck(ack) => Some(BrokerEvent::Acknowledged { packet_id: ack.pkid }),
        Packet::SubAck(ack) => {
            let refused = ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure));
            if refused {
                Some(BrokerEvent::SubscribeRejected { packet_id: ack.pkid })
            } else {
                Some(BrokerEvent::Subscribed { packet_id: ack.pkid })
            }
        }
        Packet::Publish(publish) => Some(BrokerEvent::Message {
            topic: publish.topic,
            payload: publish.payload,
        }),
        Packet::Disconnect => Some(BrokerEvent::Disconnected {
            reason: "broker sent DISCONNECT".into(),
        }),
        _ => None,
    }
}

/// A connected MQTT client plus its I/O task
pub struct MqttLink {
    client: AsyncClient,
    poller: JoinHandle<()>,
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: DeliveryGuarantee,
    ) -> Result<(), PublishError> {
        self.client
            .publish(topic, qos.into(), false, payload.to_vec())
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }

    async fn subscribe(&self, topic: &str, qos: DeliveryGuarantee) -> Result<(), SubscribeError> {
        self.client
            .subscribe(topic, qos.into())
            .await
            .map_err(|e| SubscribeError::Transport(e.to_string()))
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            warn!("[MQTT] Disconnect request failed: {}", e);
        }
        if timeout(DISCONNECT_FLUSH, &mut self.poller).await.is_err() {
            self.poller.abort();
        }
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MqttConfig::default();
        assert_eq!(config.host, "mqtt.googleapis.com");
        assert_eq!(config.port, 8883);
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(QoS::from(DeliveryGuarantee::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::from(DeliveryGuarantee::AtMostOnce), QoS::AtMostOnce);
    }

    #[test]
    fn test_translate_publish() {
        let publish = rumqttc::Publish::new("/devices/porch/config", QoS::AtLeastOnce, "{}");
        match translate(Packet::Publish(publish)) {
            Some(BrokerEvent::Message { topic, payload }) => {
                assert_eq!(topic, "/devices/porch/config");
                assert_eq!(&payload[..], b"{}");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_translate_suback_failure() {
        let suback = rumqttc::SubAck::new(7, vec![SubscribeReasonCode::Failure]);
        assert!(matches!(
            translate(Packet::SubAck(suback)),
            Some(BrokerEvent::SubscribeRejected { packet_id: 7 })
        ));
    }

    #[tokio::test]
    async fn test_missing_ca_bundle() {
        let connector = MqttConnector::new(MqttConfig {
            ca_certs: "/nonexistent/roots.pem".into(),
            ..Default::default()
        });
        let request = ConnectRequest {
            client_id: "projects/p/locations/r/registries/g/devices/d".into(),
            username: "unused".into(),
            password: "token".into(),
        };
        let result = connector.connect(&request).await;
        assert!(matches!(result, Err(ConnectError::CaBundle { .. })));
    }
}
