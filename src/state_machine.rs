//! Session state machine
//!
//! Pure transition table for the persistent-connection lifecycle:
//! `Closed -> Opening -> Open -> Degraded -> Closed`. The session manager
//! feeds it events and performs the I/O; this module never touches the wire.

use log::{info, warn};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    /// Heartbeat went unanswered; the session must be torn down and reopened
    Degraded,
}

/// Session events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    OpenRequested,
    HandshakeAck,
    HandshakeFailed,
    /// Any inbound frame, proof that the transport is alive
    FrameReceived,
    HeartbeatTimeout,
    /// Transport reported a write failure or peer close
    TransportLost,
    CloseRequested,
}

/// State transition result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// Keep the current state
    Stay,
    /// Move to a new state
    Transition(SessionState),
    /// Move to a new state and reset the failed-open count
    TransitionWithReset(SessionState),
}

/// Session state machine
#[derive(Debug)]
pub struct SessionStateMachine {
    current_state: SessionState,
    previous_state: Option<SessionState>,
    failed_opens: u32,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: SessionState::Closed,
            previous_state: None,
            failed_opens: 0,
        }
    }

    pub fn get_current_state(&self) -> SessionState {
        self.current_state
    }

    pub fn get_previous_state(&self) -> Option<SessionState> {
        self.previous_state
    }

    /// Consecutive opens that failed since the last successful handshake
    pub fn get_failed_opens(&self) -> u32 {
        self.failed_opens
    }

    pub fn is_open(&self) -> bool {
        self.current_state == SessionState::Open
    }

    /// Apply an event and return the transition taken
    pub fn handle_event(&mut self, event: SessionEvent) -> StateTransition {
        let transition = Self::get_state_transition(self.current_state, event);

        match transition {
            StateTransition::Transition(new_state) => {
                if event == SessionEvent::HandshakeFailed {
                    self.failed_opens = self.failed_opens.saturating_add(1);
                }
                self.transition_to_state(new_state);
            }
            StateTransition::TransitionWithReset(new_state) => {
                self.failed_opens = 0;
                self.transition_to_state(new_state);
            }
            StateTransition::Stay => {}
        }

        transition
    }

    fn transition_to_state(&mut self, new_state: SessionState) {
        if new_state == self.current_state {
            return;
        }

        match new_state {
            SessionState::Open => info!("[SESSION] Session open"),
            SessionState::Degraded => warn!("[SESSION] Session degraded"),
            SessionState::Closed if self.current_state != SessionState::Opening => {
                info!("[SESSION] Session closed (was {:?})", self.current_state);
            }
            _ => {}
        }

        self.previous_state = Some(self.current_state);
        self.current_state = new_state;
    }

    fn get_state_transition(current_state: SessionState, event: SessionEvent) -> StateTransition {
        match (current_state, event) {
            (SessionState::Closed, SessionEvent::OpenRequested) => {
                StateTransition::Transition(SessionState::Opening)
            }

            (SessionState::Opening, SessionEvent::HandshakeAck) => {
                StateTransition::TransitionWithReset(SessionState::Open)
            }
            (SessionState::Opening, SessionEvent::HandshakeFailed) => {
                StateTransition::Transition(SessionState::Closed)
            }

            // Any traffic keeps an open session open
            (SessionState::Open, SessionEvent::FrameReceived) => StateTransition::Stay,
            (SessionState::Open, SessionEvent::HeartbeatTimeout) => {
                StateTransition::Transition(SessionState::Degraded)
            }

            (
                SessionState::Opening | SessionState::Open | SessionState::Degraded,
                SessionEvent::TransportLost,
            ) => StateTransition::Transition(SessionState::Closed),

            (_, SessionEvent::CloseRequested) => StateTransition::Transition(SessionState::Closed),

            // Degraded is only left through close, late traffic does not revive it
            _ => StateTransition::Stay,
        }
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(sm.get_current_state(), SessionState::Closed);

        sm.handle_event(SessionEvent::OpenRequested);
        assert_eq!(sm.get_current_state(), SessionState::Opening);

        sm.handle_event(SessionEvent::HandshakeAck);
        assert_eq!(sm.get_current_state(), SessionState::Open);

        assert_eq!(
            sm.handle_event(SessionEvent::FrameReceived),
            StateTransition::Stay
        );
        assert!(sm.is_open());

        sm.handle_event(SessionEvent::HeartbeatTimeout);
        assert_eq!(sm.get_current_state(), SessionState::Degraded);
        assert_eq!(sm.get_previous_state(), Some(SessionState::Open));

        sm.handle_event(SessionEvent::CloseRequested);
        assert_eq!(sm.get_current_state(), SessionState::Closed);
    }

    #[test]
    fn degraded_is_not_revived_by_traffic() {
        let mut sm = SessionStateMachine::new();
        sm.handle_event(SessionEvent::OpenRequested);
        sm.handle_event(SessionEvent::HandshakeAck);
        sm.handle_event(SessionEvent::HeartbeatTimeout);

        sm.handle_event(SessionEvent::FrameReceived);
        sm.handle_event(SessionEvent::HandshakeAck);
        assert_eq!(sm.get_current_state(), SessionState::Degraded);
    }

    #[test]
    fn failed_handshakes_are_counted_until_success() {
        let mut sm = SessionStateMachine::new();
        for _ in 0..3 {
            sm.handle_event(SessionEvent::OpenRequested);
            sm.handle_event(SessionEvent::HandshakeFailed);
        }
        assert_eq!(sm.get_current_state(), SessionState::Closed);
        assert_eq!(sm.get_failed_opens(), 3);

        sm.handle_event(SessionEvent::OpenRequested);
        assert_eq!(
            sm.handle_event(SessionEvent::HandshakeAck),
            StateTransition::TransitionWithReset(SessionState::Open)
        );
        assert_eq!(sm.get_failed_opens(), 0);
    }

    #[test]
    fn heartbeat_timeout_outside_open_is_ignored() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(
            sm.handle_event(SessionEvent::HeartbeatTimeout),
            StateTransition::Stay
        );
        assert_eq!(sm.get_current_state(), SessionState::Closed);
    }

    #[test]
    fn transport_loss_closes_from_any_live_state() {
        for setup in [
            &[SessionEvent::OpenRequested][..],
            &[SessionEvent::OpenRequested, SessionEvent::HandshakeAck][..],
            &[
                SessionEvent::OpenRequested,
                SessionEvent::HandshakeAck,
                SessionEvent::HeartbeatTimeout,
            ][..],
        ] {
            let mut sm = SessionStateMachine::new();
            for event in setup {
                sm.handle_event(*event);
            }
            sm.handle_event(SessionEvent::TransportLost);
            assert_eq!(sm.get_current_state(), SessionState::Closed);
        }
    }
}
