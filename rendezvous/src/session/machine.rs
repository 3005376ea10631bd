use crate::error::{RendezvousError, Result};

/// Lifecycle of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
    Closed,
    /// The transport failed irrecoverably. Absorbing.
    Failed,
}

impl SessionState {
    /// Whether the session has ended, cleanly or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Inputs that drive [`SessionMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineEvent {
    /// Local tracks were added to the peer
    TracksAttached,
    /// A negotiation message was produced or consumed
    SignalReady,
    TransportConnected,
    TransportFailed,
    /// A remote track or stream ended
    TrackRemoved,
    /// The caller or the remote side hung up
    Close,
}

/// Session state as a pure function of the events seen so far.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    tracks_attached: bool,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            tracks_attached: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Applies `event` and returns the resulting state.
    ///
    /// Terminal states absorb every event. Events that make no sense in the
    /// current state are rejected with [`RendezvousError::InvalidState`] and
    /// leave the state unchanged.
    pub fn apply(&mut self, event: MachineEvent) -> Result<SessionState> {
        use MachineEvent::*;
        use SessionState::*;

        let next = match (self.state, event) {
            (Closed | Failed, _) => self.state,
            (_, Close) => Closed,

            (Idle, TracksAttached) => {
                self.tracks_attached = true;
                Idle
            }
            (Idle, SignalReady) if self.tracks_attached => Negotiating,
            (Negotiating | Connected, SignalReady) => self.state,

            (Negotiating | Connected, TransportConnected) => Connected,
            (Negotiating | Connected, TransportFailed) => Failed,
            (Connected, TrackRemoved) => Closed,

            (state, event) => {
                return Err(RendezvousError::InvalidState(format!(
                    "{:?} in {:?}",
                    event, state
                )));
            }
        };

        if next != self.state {
            tracing::debug!("Session state {:?} -> {:?} on {:?}", self.state, next, event);
        }
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MachineEvent::*;

    fn connected() -> SessionMachine {
        let mut machine = SessionMachine::new();
        machine.apply(TracksAttached).unwrap();
        machine.apply(SignalReady).unwrap();
        machine.apply(TransportConnected).unwrap();
        machine
    }

    #[test]
    fn negotiation_requires_attached_tracks() {
        let mut machine = SessionMachine::new();
        assert!(machine.apply(SignalReady).is_err());
        assert_eq!(machine.state(), SessionState::Idle);

        assert_eq!(machine.apply(TracksAttached).unwrap(), SessionState::Idle);
        assert_eq!(machine.apply(SignalReady).unwrap(), SessionState::Negotiating);
    }

    #[test]
    fn happy_path() {
        let mut machine = connected();
        assert_eq!(machine.state(), SessionState::Connected);
        assert_eq!(machine.apply(Close).unwrap(), SessionState::Closed);
    }

    #[test]
    fn connected_never_regresses_to_negotiating() {
        let mut machine = connected();
        assert_eq!(machine.apply(SignalReady).unwrap(), SessionState::Connected);
        assert_eq!(machine.apply(TransportConnected).unwrap(), SessionState::Connected);
        assert!(machine.apply(TracksAttached).is_err());
        assert_eq!(machine.state(), SessionState::Connected);
    }

    #[test]
    fn transport_failure_is_absorbing() {
        let mut machine = SessionMachine::new();
        machine.apply(TracksAttached).unwrap();
        machine.apply(SignalReady).unwrap();
        assert_eq!(machine.apply(TransportFailed).unwrap(), SessionState::Failed);

        for event in [SignalReady, TransportConnected, TrackRemoved, Close] {
            assert_eq!(machine.apply(event).unwrap(), SessionState::Failed);
        }
    }

    #[test]
    fn track_removal_closes_connected_session() {
        let mut machine = connected();
        assert_eq!(machine.apply(TrackRemoved).unwrap(), SessionState::Closed);
        assert_eq!(machine.apply(TransportConnected).unwrap(), SessionState::Closed);
    }

    #[test]
    fn out_of_order_events_rejected() {
        let mut machine = SessionMachine::new();
        assert!(machine.apply(TransportConnected).is_err());
        assert!(machine.apply(TransportFailed).is_err());
        assert!(machine.apply(TrackRemoved).is_err());
        assert_eq!(machine.state(), SessionState::Idle);

        machine.apply(TracksAttached).unwrap();
        machine.apply(SignalReady).unwrap();
        assert!(machine.apply(TrackRemoved).is_err());
        assert_eq!(machine.state(), SessionState::Negotiating);
    }

    #[test]
    fn close_from_idle() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.apply(Close).unwrap(), SessionState::Closed);
        assert!(machine.state().is_terminal());
    }
}
