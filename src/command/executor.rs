//! Command executor - decodes config payloads and applies them

use light_edge_shared::{codec, now_ms};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::actuator::PatternSink;

/// Result of handling one config payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Pattern applied (or already running)
    Completed { pattern: String },
    /// Config was well-formed but applying it failed
    Failed { message: String },
    /// Payload could not be decoded
    Rejected { message: String },
    /// Empty payload: no configuration present
    Ignored,
}

impl CommandResult {
    /// Whether the device state may have changed and should be reported
    pub fn should_report(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Executes configuration commands received from the broker
pub struct CommandExecutor {
    sink: Arc<dyn PatternSink>,
}

impl CommandExecutor {
    pub fn new(sink: Arc<dyn PatternSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn PatternSink> {
        &self.sink
    }

    /// Decode `payload` and apply the pattern it asks for
    pub async fn execute(&self, payload: &[u8]) -> CommandResult {
        let start_time = now_ms();

        let config = match codec::decode_config(payload) {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!("[COMMAND] Empty config, nothing to apply");
                return CommandResult::Ignored;
            }
            Err(e) => {
                warn!("[COMMAND] Malformed config: {}", e);
                return CommandResult::Rejected {
                    message: e.to_string(),
                };
            }
        };

        let pattern = match config.desired_pattern() {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!("[COMMAND] Config rejected: {}", e);
                return CommandResult::Rejected {
                    message: e.to_string(),
                };
            }
        };

        debug!("[COMMAND] Applying pattern {:?} via {}", pattern, self.sink.name());
        let result = match self.sink.apply_pattern(pattern).await {
            Ok(()) => CommandResult::Completed {
                pattern: pattern.to_string(),
            },
            Err(e) => CommandResult::Failed {
                message: e.to_string(),
            },
        };

        let processing_time = now_ms().saturating_sub(start_time);
        match &result {
            CommandResult::Completed { pattern } => {
                info!("[COMMAND] Config applied: {} ({}ms)", pattern, processing_time)
            }
            CommandResult::Failed { message } => {
                warn!("[COMMAND] Config failed: {} ({}ms)", message, processing_time)
            }
            _ => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::test_controller;
    use tokio::time::{sleep, Duration};

    fn executor() -> (CommandExecutor, Arc<crate::actuator::PatternController>) {
        let (_sink, controller) = test_controller(6);
        let controller = Arc::new(controller);
        (CommandExecutor::new(controller.clone()), controller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_config_applied() {
        let (executor, controller) = executor();
        let result = executor.execute(br#"{"pattern":"Christmas"}"#).await;
        assert_eq!(
            result,
            CommandResult::Completed {
                pattern: "Christmas".into()
            }
        );
        sleep(Duration::from_millis(10)).await;
        assert_eq!(
            controller.current_status().pattern.as_deref(),
            Some("christmas")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_led_off() {
        let (executor, controller) = executor();
        executor.execute(br#"{"pattern":"red"}"#).await;
        let result = executor
            .execute(br#"{"led_on":false,"pattern":"red"}"#)
            .await;
        assert!(matches!(result, CommandResult::Completed { .. }));
        assert_eq!(controller.current_status().led_on, Some(false));
    }

    #[tokio::test]
    async fn test_empty_payload_ignored() {
        let (executor, controller) = executor();
        let before = controller.current_status();
        assert_eq!(executor.execute(b"").await, CommandResult::Ignored);
        assert!(!CommandResult::Ignored.should_report());
        assert_eq!(controller.current_status(), before);
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let (executor, controller) = executor();
        let result = executor.execute(b"{not json").await;
        assert!(matches!(result, CommandResult::Rejected { .. }));
        assert_eq!(controller.current_status().last_result, None);

        let result = executor.execute(br#"{"led_on":true}"#).await;
        assert!(matches!(result, CommandResult::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_pattern_fails() {
        let (executor, controller) = executor();
        executor.execute(br#"{"pattern":"blue"}"#).await;
        let result = executor.execute(br#"{"pattern":"doesnotexist"}"#).await;
        assert!(matches!(result, CommandResult::Failed { .. }));
        assert!(result.should_report());
        assert_eq!(controller.current_status().pattern.as_deref(), Some("blue"));
    }
}
