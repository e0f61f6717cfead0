pub mod mqtt;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use mqtt::{MqttConfig, MqttConnector};
pub use traits::{
    BrokerConnector, BrokerEvent, BrokerLink, ConnectError, ConnectRequest, DeliveryGuarantee,
    PublishError, SubscribeError,
};
