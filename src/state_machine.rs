use std::fmt;

/// Lifecycle of one voice session.
///
/// `Idle` is initial. `Closed` and `Errored` are terminal until a new
/// session is started, which re-enters `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
    Errored,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition.
    ///
    /// Teardown always lands in `Closed`, which is reachable from anywhere
    /// (including itself, so repeated `stop()` calls stay legal).
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle | Closed | Errored, Connecting)
                | (Connecting, Open)
                | (Connecting | Open, Errored)
                | (_, Closed)
        )
    }

    /// Connecting or Open: devices and channel are held.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Open)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of everything the UI layer may observe about a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionStatus {
    pub state: SessionState,
    pub connected: bool,
    pub speaking: bool,
    pub last_error: Option<String>,
}
