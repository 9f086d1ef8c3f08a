//! Error taxonomy for a live voice session.
//!
//! Errors are either **fatal** (the session is torn down and the controller
//! reports `Errored`) or **recoverable** (logged and counted, session state
//! unchanged). [`SessionError::is_fatal`] draws that line.

/// Everything that can go wrong while starting or running a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No usable API credential was configured. The session never starts.
    #[error("API key is missing")]
    Credential,

    /// Access to the capture device was denied.
    #[error("microphone access denied: {0}")]
    Permission(String),

    /// The channel failed to open, or failed while sending or receiving.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single inbound payload could not be decoded.
    #[error("malformed audio payload: {0}")]
    Decode(String),

    /// An audio device could not be opened or failed mid-session.
    #[error("audio device error: {0}")]
    Device(String),

    /// `start()` was issued while a session is connecting or open.
    #[error("a session is already active")]
    AlreadyActive,

    /// `stop()` arrived before `start()` finished opening the channel.
    #[error("session start was cancelled")]
    Cancelled,
}

impl SessionError {
    /// Fatal errors end the session; the rest are handled locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Credential
                | SessionError::Permission(_)
                | SessionError::Transport(_)
                | SessionError::Device(_)
        )
    }

    /// The single human-readable line surfaced to the UI layer.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Credential => "API Key is missing.".to_string(),
            SessionError::Permission(_) => "Microphone access was denied.".to_string(),
            SessionError::Transport(_) => "Connection error occurred.".to_string(),
            SessionError::Device(_) => "Audio device is unavailable.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}

impl From<url::ParseError> for SessionError {
    fn from(e: url::ParseError) -> Self {
        SessionError::Transport(format!("invalid endpoint url: {}", e))
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Transport(format!("failed to encode message: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_decode_and_control_errors_are_recoverable() {
        assert!(SessionError::Credential.is_fatal());
        assert!(SessionError::Permission("denied".into()).is_fatal());
        assert!(SessionError::Transport("reset".into()).is_fatal());
        assert!(SessionError::Device("gone".into()).is_fatal());

        assert!(!SessionError::Decode("odd length".into()).is_fatal());
        assert!(!SessionError::AlreadyActive.is_fatal());
        assert!(!SessionError::Cancelled.is_fatal());
    }

    #[test]
    fn user_message_hides_transport_detail() {
        let err = SessionError::Transport("tls handshake eof".into());
        assert_eq!(err.user_message(), "Connection error occurred.");
        assert_eq!(SessionError::Credential.user_message(), "API Key is missing.");
    }
}
