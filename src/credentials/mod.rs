//! Session credentials for the cloud bridge
//!
//! The bridge authenticates devices with a short-lived signed token passed
//! as the MQTT password. This module issues those tokens and tracks when
//! they need to be replaced.

mod manager;

pub use manager::{CredentialError, CredentialManager, SessionToken, SigningAlgorithm};

/// Credential manager backed by the checked-in ES256 test key
#[cfg(test)]
pub(crate) fn test_credentials(validity_minutes: u64) -> CredentialManager {
    CredentialManager::new(
        "test-project",
        manager::tests::fixture("device_ec.pem"),
        SigningAlgorithm::Es256,
        validity_minutes,
    )
}
