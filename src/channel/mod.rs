//! Duplex channel to the remote conversational endpoint.
//!
//! A [`ChannelConnector`] opens a [`SessionChannel`]: outbound frames go in
//! through a bounded queue drained by the connector's link task, inbound
//! events come back as [`SessionEvent::Channel`](crate::event::SessionEvent)
//! on the session's event queue.

pub mod mock;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::audio::codec::EncodedBlob;
use crate::error::SessionError;
use crate::event::EventSender;

/// Inbound events delivered by a channel.
///
/// When the endpoint signals an interruption in the same message as a new
/// delta, `Interrupted` is delivered first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The endpoint accepted the session setup; frames may flow.
    Opened,
    /// One base64 PCM16 chunk of synthesized speech.
    InboundDelta(String),
    /// The user barged in; queued playback must stop now.
    Interrupted,
    /// The endpoint closed the connection.
    Closed(Option<String>),
    /// The connection failed.
    Error(String),
}

/// Everything the endpoint needs to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub api_key: String,
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Open a channel. Inbound events are posted to `events`.
    ///
    /// Fails with [`SessionError::Transport`] when the endpoint rejects the
    /// handshake.
    async fn connect(
        &self,
        request: ConnectRequest,
        events: EventSender,
    ) -> Result<SessionChannel, SessionError>;
}

/// Result of offering a frame to the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Sent,
    NotReady,
    Full,
    Closed,
}

/// Producer side of the outbound queue, shared with the capture thread.
///
/// Frames are refused until the session marks the channel ready.
#[derive(Debug, Clone)]
pub struct OutboundGate {
    tx: mpsc::Sender<EncodedBlob>,
    ready: Arc<AtomicBool>,
}

impl OutboundGate {
    pub fn new(tx: mpsc::Sender<EncodedBlob>) -> Self {
        Self {
            tx,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Non-blocking send; never waits on the network.
    pub fn offer(&self, blob: EncodedBlob) -> Offer {
        if !self.is_ready() {
            return Offer::NotReady;
        }
        match self.tx.try_send(blob) {
            Ok(()) => Offer::Sent,
            Err(TrySendError::Full(_)) => Offer::Full,
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }
}

/// An open channel. Dropping it closes the connection.
pub struct SessionChannel {
    gate: OutboundGate,
    shutdown: Option<oneshot::Sender<()>>,
    link_task: Option<JoinHandle<()>>,
}

impl SessionChannel {
    /// Wrap a connector's link task.
    ///
    /// The task must drain the receiving end of `gate` and finish once
    /// `shutdown` fires (or its sender is dropped).
    pub fn new(
        gate: OutboundGate,
        shutdown: oneshot::Sender<()>,
        link_task: JoinHandle<()>,
    ) -> Self {
        Self {
            gate,
            shutdown: Some(shutdown),
            link_task: Some(link_task),
        }
    }

    pub fn gate(&self) -> OutboundGate {
        self.gate.clone()
    }

    pub fn mark_ready(&self) {
        self.gate.set_ready();
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// Fire-and-forget send of one frame.
    pub fn send(&self, blob: EncodedBlob) -> Offer {
        self.gate.offer(blob)
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }

    /// Ask the link task to close the connection. Idempotent.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        // Detach: the link task finishes its close handshake on its own.
        self.link_task.take();
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob() -> EncodedBlob {
        EncodedBlob {
            data: "AAA=".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        }
    }

    #[test]
    fn gate_refuses_until_ready() {
        let (tx, mut rx) = mpsc::channel(2);
        let gate = OutboundGate::new(tx);
        assert_eq!(gate.offer(blob()), Offer::NotReady);

        let shared = gate.clone();
        shared.set_ready();
        assert!(gate.is_ready());
        assert_eq!(gate.offer(blob()), Offer::Sent);
        assert_eq!(rx.try_recv().unwrap(), blob());
    }

    #[test]
    fn gate_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let gate = OutboundGate::new(tx);
        gate.set_ready();
        assert_eq!(gate.offer(blob()), Offer::Sent);
        assert_eq!(gate.offer(blob()), Offer::Full);

        drop(rx);
        assert_eq!(gate.offer(blob()), Offer::Closed);
    }

    #[tokio::test]
    async fn close_signals_link_task_once() {
        let (tx, _rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = shutdown_rx.await;
            let _ = done_tx.send(());
        });

        let mut channel = SessionChannel::new(OutboundGate::new(tx), shutdown_tx, task);
        assert!(!channel.is_closed());
        channel.close();
        channel.close();
        assert!(channel.is_closed());
        done_rx.await.unwrap();
    }
}
