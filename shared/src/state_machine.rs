//! Broker Connection State Machine
//!
//! Defines valid connection-state transitions for a broker session.

use std::fmt;

/// Connection state of a broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A connect attempt was started
    ConnectAttempt,
    /// The broker acknowledged the connect
    Acknowledged,
    /// The transport reported an error or closed
    TransportError,
    /// The session was closed on purpose
    ExplicitDisconnect,
    /// No acknowledgment within the watchdog window
    WatchdogExpired,
    /// A connect attempt failed
    AttemptFailed { auto_reconnect: bool },
    /// The backoff delay elapsed
    BackoffElapsed,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and state changed (or stayed, for idempotent events)
    Success(ConnectionState),
    /// Transition was invalid from current state
    Invalid { from: ConnectionState, event: SessionEvent },
}

/// The connection state machine for one broker session
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
}

impl ConnectionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    pub fn is_connected(&self) -> bool {
        self.current_state == ConnectionState::Connected
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: SessionEvent) -> TransitionResult {
        match self.next_state(&event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn next_state(&self, event: &SessionEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use SessionEvent::*;

        match (self.current_state, event) {
            (Disconnected, ConnectAttempt) => Some(Connecting),
            (Backoff, BackoffElapsed) => Some(Connecting),

            (Connecting, Acknowledged) => Some(Connected),

            (Connecting | Disconnected, AttemptFailed { auto_reconnect: true }) => Some(Backoff),
            (Connecting | Disconnected, AttemptFailed { auto_reconnect: false }) => {
                Some(Disconnected)
            }

            (Connected | Connecting, TransportError | WatchdogExpired) => Some(Disconnected),

            // Closing is always allowed
            (_, ExplicitDisconnect) => Some(Disconnected),

            // A late transport error after we already dropped the link
            (Disconnected, TransportError) => Some(Disconnected),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = ConnectionStateMachine::new();
        assert_eq!(fsm.state(), ConnectionState::Disconnected);
        assert!(!fsm.is_connected());
    }

    #[test]
    fn test_connect_flow() {
        let mut fsm = ConnectionStateMachine::new();

        let result = fsm.process_event(SessionEvent::ConnectAttempt);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connecting));

        let result = fsm.process_event(SessionEvent::Acknowledged);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connected));
        assert!(fsm.is_connected());
    }

    #[test]
    fn test_failed_attempt_enters_backoff() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(SessionEvent::ConnectAttempt);

        let result = fsm.process_event(SessionEvent::AttemptFailed { auto_reconnect: true });
        assert_eq!(result, TransitionResult::Success(ConnectionState::Backoff));

        let result = fsm.process_event(SessionEvent::BackoffElapsed);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connecting));
    }

    #[test]
    fn test_failed_attempt_without_reconnect() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(SessionEvent::ConnectAttempt);

        let result = fsm.process_event(SessionEvent::AttemptFailed { auto_reconnect: false });
        assert_eq!(result, TransitionResult::Success(ConnectionState::Disconnected));
    }

    #[test]
    fn test_watchdog_drops_connection() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(SessionEvent::ConnectAttempt);
        fsm.process_event(SessionEvent::Acknowledged);

        let result = fsm.process_event(SessionEvent::WatchdogExpired);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Disconnected));
    }

    #[test]
    fn test_invalid_transition() {
        let mut fsm = ConnectionStateMachine::new();

        // Can't be acknowledged without an attempt
        let result = fsm.process_event(SessionEvent::Acknowledged);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), ConnectionState::Disconnected);

        // Can't skip the backoff wait
        fsm.process_event(SessionEvent::ConnectAttempt);
        fsm.process_event(SessionEvent::AttemptFailed { auto_reconnect: true });
        let result = fsm.process_event(SessionEvent::ConnectAttempt);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), ConnectionState::Backoff);
    }

    #[test]
    fn test_explicit_disconnect_from_any_state() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(SessionEvent::ConnectAttempt);
        fsm.process_event(SessionEvent::AttemptFailed { auto_reconnect: true });

        let result = fsm.process_event(SessionEvent::ExplicitDisconnect);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Disconnected));
    }
}
