//! Per-transport bridge state machine.

/// Lifecycle state of one bridge connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Transport is open, waiting for the client's `init`.
    #[default]
    AwaitingHandshake,
    /// Backend is being attached or created.
    Attaching,
    /// Backend output is being relayed.
    Streaming,
    /// Transport or backend is gone.
    Closed,
}

impl ConnectionState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - AwaitingHandshake -> Attaching
    /// - Attaching -> Streaming
    /// - any non-closed state -> Closed
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (*self, target),
            (AwaitingHandshake, Attaching)
                | (Attaching, Streaming)
                | (AwaitingHandshake, Closed)
                | (Attaching, Closed)
                | (Streaming, Closed)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: ConnectionState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::BridgeError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Check if client input may be forwarded to the backend.
    pub fn accepts_input(&self) -> bool {
        matches!(self, ConnectionState::Streaming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = ConnectionState::AwaitingHandshake;
        assert!(state.transition_to(ConnectionState::Attaching).is_ok());
        assert!(state.transition_to(ConnectionState::Streaming).is_ok());
        assert!(state.accepts_input());
        assert!(state.transition_to(ConnectionState::Closed).is_ok());
        assert!(state.is_terminal());
    }

    #[test]
    fn test_cannot_skip_attaching() {
        let mut state = ConnectionState::AwaitingHandshake;
        assert!(state.transition_to(ConnectionState::Streaming).is_err());
        assert_eq!(state, ConnectionState::AwaitingHandshake);
    }

    #[test]
    fn test_closed_from_every_live_state() {
        for start in [
            ConnectionState::AwaitingHandshake,
            ConnectionState::Attaching,
            ConnectionState::Streaming,
        ] {
            let mut state = start;
            assert!(state.transition_to(ConnectionState::Closed).is_ok());
        }
    }

    #[test]
    fn test_closed_is_final() {
        let mut state = ConnectionState::Closed;
        assert!(state.transition_to(ConnectionState::Closed).is_err());
        assert!(state.transition_to(ConnectionState::Attaching).is_err());
        assert!(!state.accepts_input());
    }

    #[test]
    fn test_default() {
        assert_eq!(ConnectionState::default(), ConnectionState::AwaitingHandshake);
    }
}
