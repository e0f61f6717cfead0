//! Authenticated broker session
//!
//! - `session`: connect, publish, subscribe and token refresh
//! - `backoff`: exponential reconnect delays with a terminal ceiling
//! - `watchdog`: stale-link detection from acknowledgment silence

mod backoff;
mod session;
mod watchdog;

pub use session::{BrokerSession, Health, SessionConfig, SessionError, SessionNotice};
