//! Scripted in-memory broker for tests

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::traits::{
    BrokerConnection, BrokerConnector, BrokerEvent, BrokerLink, ConnectError, ConnectRequest,
    DeliveryGuarantee, PublishError, SubscribeError,
};

/// A message the mock broker accepted
#[derive(Debug, Clone)]
pub struct Published {
    /// 1-based index of the connection that carried it
    pub connection: usize,
    pub topic: String,
    pub payload: Bytes,
    /// Password (token) the carrying connection authenticated with
    pub password: String,
}

#[derive(Default)]
struct MockState {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    packet_ids: AtomicU16,
    failures: Mutex<VecDeque<String>>,
    always_fail: AtomicBool,
    silent: AtomicBool,
    passwords: Mutex<Vec<String>>,
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<(usize, String)>>,
    event_tx: Mutex<Option<mpsc::Sender<BrokerEvent>>>,
}

/// Test handle onto the mock broker; clones share state
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<MockState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn BrokerConnector> {
        Arc::new(MockConnector {
            state: self.state.clone(),
        })
    }

    /// Fail the next `count` connect attempts
    pub fn fail_next(&self, count: usize) {
        let mut failures = self.state.failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back("scripted failure".into());
        }
    }

    /// Fail every connect attempt
    pub fn fail_always(&self, fail: bool) {
        self.state.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Stop acknowledging publishes
    pub fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Passwords of successful connections, in order
    pub fn passwords(&self) -> Vec<String> {
        self.state.passwords.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.published.lock().unwrap().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<(usize, String)> {
        self.state.subscriptions.lock().unwrap().clone()
    }

    /// Deliver an event on the current connection
    pub async fn inject(&self, event: BrokerEvent) {
        let tx = self.state.event_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// Deliver a config message on `topic`
    pub async fn push_config(&self, topic: &str, payload: &'static [u8]) {
        self.inject(BrokerEvent::Message {
            topic: topic.into(),
            payload: Bytes::from_static(payload),
        })
        .await;
    }
}

struct MockConnector {
    state: Arc<MockState>,
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<BrokerConnection, ConnectError> {
        let attempt = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;

        if self.state.always_fail.load(Ordering::SeqCst) {
            return Err(ConnectError::Transport(format!("attempt {} refused", attempt)));
        }
        if let Some(reason) = self.state.failures.lock().unwrap().pop_front() {
            return Err(ConnectError::Transport(reason));
        }

        let connection = {
            let mut passwords = self.state.passwords.lock().unwrap();
            passwords.push(request.password.clone());
            passwords.len()
        };
        let (event_tx, event_rx) = mpsc::channel(100);
        *self.state.event_tx.lock().unwrap() = Some(event_tx.clone());

        Ok(BrokerConnection {
            link: Box::new(MockLink {
                state: self.state.clone(),
                connection,
                password: request.password.clone(),
                event_tx,
            }),
            events: event_rx,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockLink {
    state: Arc<MockState>,
    connection: usize,
    password: String,
    event_tx: mpsc::Sender<BrokerEvent>,
}

#[async_trait]
impl BrokerLink for MockLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        _qos: DeliveryGuarantee,
    ) -> Result<(), PublishError> {
        self.state.published.lock().unwrap().push(Published {
            connection: self.connection,
            topic: topic.into(),
            payload,
            password: self.password.clone(),
        });
        if !self.state.silent.load(Ordering::SeqCst) {
            let packet_id = self.state.packet_ids.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self
                .event_tx
                .try_send(BrokerEvent::Acknowledged { packet_id });
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: DeliveryGuarantee) -> Result<(), SubscribeError> {
        self.state
            .subscriptions
            .lock()
            .unwrap()
            .push((self.connection, topic.into()));
        let packet_id = self.state.packet_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.event_tx.try_send(BrokerEvent::Subscribed { packet_id });
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
