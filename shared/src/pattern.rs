//! Pattern request normalization

use crate::now_ms;

/// A requested actuator pattern, already normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternRequest {
    pattern: String,
    received_at_ms: u64,
}

impl PatternRequest {
    /// Normalize a raw pattern name and stamp the request
    pub fn new(raw: &str) -> Self {
        Self {
            pattern: normalize(raw),
            received_at_ms: now_ms(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn received_at_ms(&self) -> u64 {
        self.received_at_ms
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }
}

/// Lowercase, trim and drop all whitespace from a pattern name.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// True if `name` is already in normalized form
pub fn is_normalized(name: &str) -> bool {
    normalize(name) == name
}
