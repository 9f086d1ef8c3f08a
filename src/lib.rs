//! live_voice - a duplex voice session with a remote conversational endpoint.
//!
//! Microphone frames are encoded to PCM16/base64 and streamed out; synthesized
//! speech streams back and is scheduled for gapless playback, with barge-in
//! interruption and an idempotent teardown.

pub mod audio;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod gui_bridge;
pub mod net_link;
pub mod protocol;
pub mod state_machine;
pub mod stats;

pub use config::Config;
pub use controller::{SessionController, SessionHandle};
pub use error::SessionError;
pub use protocol::SessionContext;
pub use state_machine::{SessionState, SessionStatus};
