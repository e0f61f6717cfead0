//! Credential manager - issues and tracks signed session tokens

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use light_edge_shared::now_secs;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read signing key {}: {source}", .path.display())]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("signing key {} is not a valid {algorithm} key: {source}", .path.display())]
    InvalidKey {
        path: PathBuf,
        algorithm: SigningAlgorithm,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Algorithms accepted by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SigningAlgorithm {
    #[default]
    #[value(name = "RS256")]
    Rs256,
    #[value(name = "ES256")]
    Es256,
}

impl SigningAlgorithm {
    fn jwt_algorithm(self) -> Algorithm {
        match self {
            SigningAlgorithm::Rs256 => Algorithm::RS256,
            SigningAlgorithm::Es256 => Algorithm::ES256,
        }
    }

    fn encoding_key(self, pem: &[u8]) -> jsonwebtoken::errors::Result<EncodingKey> {
        match self {
            SigningAlgorithm::Rs256 => EncodingKey::from_rsa_pem(pem),
            SigningAlgorithm::Es256 => EncodingKey::from_ec_pem(pem),
        }
    }
}

impl std::str::FromStr for SigningAlgorithm {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RS256" => Ok(SigningAlgorithm::Rs256),
            "ES256" => Ok(SigningAlgorithm::Es256),
            other => Err(CredentialError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningAlgorithm::Rs256 => f.write_str("RS256"),
            SigningAlgorithm::Es256 => f.write_str("ES256"),
        }
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iat: u64,
    exp: u64,
    aud: &'a str,
}

/// A signed token plus the timestamps cached at issuance.
///
/// The token body is never inspected after signing.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    value: String,
    issued_at: u64,
    expires_at: u64,
}

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Issue time, seconds since Unix epoch
    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    /// Expiry time, seconds since Unix epoch
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Seconds since issuance
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.issued_at)
    }
}

// Keep the signed value out of logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Issues session tokens for one device
#[derive(Debug, Clone)]
pub struct CredentialManager {
    audience: String,
    key_path: PathBuf,
    algorithm: SigningAlgorithm,
    validity_minutes: u64,
}

impl CredentialManager {
    pub fn new(
        audience: impl Into<String>,
        key_path: impl Into<PathBuf>,
        algorithm: SigningAlgorithm,
        validity_minutes: u64,
    ) -> Self {
        Self {
            audience: audience.into(),
            key_path: key_path.into(),
            algorithm,
            validity_minutes,
        }
    }

    /// Issue a fresh token using this manager's key and validity window
    pub fn refresh(&self) -> Result<SessionToken, CredentialError> {
        Self::issue(
            &self.audience,
            &self.key_path,
            self.algorithm,
            self.validity_minutes,
        )
    }

    /// Sign a token for `audience` with the key at `key_path`.
    ///
    /// The key is read on every call.
    pub fn issue(
        audience: &str,
        key_path: &Path,
        algorithm: SigningAlgorithm,
        validity_minutes: u64,
    ) -> Result<SessionToken, CredentialError> {
        let pem = std::fs::read(key_path).map_err(|source| CredentialError::KeyRead {
            path: key_path.to_path_buf(),
            source,
        })?;
        let key = algorithm
            .encoding_key(&pem)
            .map_err(|source| CredentialError::InvalidKey {
                path: key_path.to_path_buf(),
                algorithm,
                source,
            })?;

        let issued_at = now_secs();
        let expires_at = issued_at + validity_minutes * 60;
        let claims = Claims {
            iat: issued_at,
            exp: expires_at,
            aud: audience,
        };
        let value = jsonwebtoken::encode(&Header::new(algorithm.jwt_algorithm()), &claims, &key)?;

        info!(
            "[CREDENTIALS] Issued {} token from {} (valid {} min)",
            algorithm,
            key_path.display(),
            validity_minutes
        );

        Ok(SessionToken {
            value,
            issued_at,
            expires_at,
        })
    }

    /// True if `token` expires within `threshold_secs` of `now`
    pub fn is_expiring_soon(token: &SessionToken, now: u64, threshold_secs: u64) -> bool {
        now.saturating_add(threshold_secs) >= token.expires_at
    }
}
