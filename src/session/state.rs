use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a translation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, no media received yet
    Created,
    /// Broadcaster connected and media flowing
    Active,
    /// Broadcaster connection lost, waiting for it to come back within the grace window
    BroadcasterDisconnected,
    /// Terminal; all resources released
    Ended,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Active)
                | (Created, Ended)
                | (Active, BroadcasterDisconnected)
                | (Active, Ended)
                | (BroadcasterDisconnected, Active)
                | (BroadcasterDisconnected, Ended)
        )
    }

    /// States in which a broadcaster may (re)attach
    pub fn accepts_broadcaster(self) -> bool {
        !matches!(self, SessionState::Ended)
    }

    /// States in which source/target languages may change
    pub fn accepts_language_change(self) -> bool {
        matches!(self, SessionState::Created | SessionState::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::BroadcasterDisconnected => "broadcaster_disconnected",
            SessionState::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(Created.can_transition_to(Active));
        assert!(Active.can_transition_to(BroadcasterDisconnected));
        assert!(BroadcasterDisconnected.can_transition_to(Active));
        assert!(BroadcasterDisconnected.can_transition_to(Ended));
        assert!(Active.can_transition_to(Ended));
    }

    #[test]
    fn test_ended_is_terminal() {
        for next in [Created, Active, BroadcasterDisconnected, Ended] {
            assert!(!Ended.can_transition_to(next));
        }
    }

    #[test]
    fn test_no_backwards_transitions() {
        assert!(!Active.can_transition_to(Created));
        assert!(!Created.can_transition_to(BroadcasterDisconnected));
    }

    #[test]
    fn test_language_change_states() {
        assert!(Created.accepts_language_change());
        assert!(Active.accepts_language_change());
        assert!(!BroadcasterDisconnected.accepts_language_change());
        assert!(!Ended.accepts_language_change());
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_string(&BroadcasterDisconnected).unwrap(),
            "\"broadcaster_disconnected\""
        );
        assert_eq!(Ended.to_string(), "ended");
    }
}
