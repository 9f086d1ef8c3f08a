//! The single ordered queue feeding a session's controller.
//!
//! The capture thread, the output device and the channel task never touch
//! controller state directly; they post a [`SessionEvent`] and the
//! controller applies it on its own task, in arrival order.

use tokio::sync::mpsc;

use crate::audio::device::SourceId;
use crate::channel::ChannelEvent;
use crate::error::SessionError;

#[derive(Debug)]
pub enum SessionEvent {
    /// Lifecycle or payload event from the remote endpoint.
    Channel(ChannelEvent),
    /// A scheduled source played to its natural end.
    SourceEnded(SourceId),
    /// The capture or output device failed; the session cannot continue.
    DeviceFailed(SessionError),
}

/// Unbounded so audio threads can post without ever blocking.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub fn event_queue() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
