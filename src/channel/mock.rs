//! Scripted connector for tests.
//!
//! Each `connect` records the request and returns a [`SessionChannel`] whose
//! outbound frames are collected in memory. Inbound events are injected with
//! [`MockConnector::emit`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{ChannelConnector, ChannelEvent, ConnectRequest, OutboundGate, SessionChannel};
use crate::audio::codec::EncodedBlob;
use crate::error::SessionError;
use crate::event::{EventSender, SessionEvent};

struct ConnectorState {
    reject: Option<String>,
    connect_delay: Duration,
    auto_open: bool,
    queue_capacity: usize,
    requests: Vec<ConnectRequest>,
    events: Option<EventSender>,
    sent: Arc<Mutex<Vec<EncodedBlob>>>,
    closed: Vec<Arc<AtomicBool>>,
}

#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Accepts every connection and acknowledges setup right away.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectorState {
                reject: None,
                connect_delay: Duration::ZERO,
                auto_open: true,
                queue_capacity: 64,
                requests: Vec::new(),
                events: None,
                sent: Arc::new(Mutex::new(Vec::new())),
                closed: Vec::new(),
            })),
        }
    }

    /// Every handshake fails with `reason`.
    pub fn rejecting(reason: &str) -> Self {
        let connector = Self::new();
        lock(&connector.state).reject = Some(reason.to_string());
        connector
    }

    /// Connections wait for an explicit `emit(ChannelEvent::Opened)`.
    pub fn manual_open(self) -> Self {
        lock(&self.state).auto_open = false;
        self
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        lock(&self.state).connect_delay = delay;
        self
    }

    pub fn with_queue_capacity(self, capacity: usize) -> Self {
        lock(&self.state).queue_capacity = capacity.max(1);
        self
    }

    /// Deliver an inbound event on the latest connection.
    ///
    /// Returns false if there is no connection or its session is gone.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        match lock(&self.state).events.as_ref() {
            Some(events) => events.send(SessionEvent::Channel(event)).is_ok(),
            None => false,
        }
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).requests.len()
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        lock(&self.state).requests.last().cloned()
    }

    /// Every frame sent on any connection, in send order.
    pub fn sent_frames(&self) -> Vec<EncodedBlob> {
        let sent = lock(&self.state).sent.clone();
        lock(&sent).clone()
    }

    /// Whether the latest connection has been closed by the session.
    pub fn is_closed(&self) -> bool {
        lock(&self.state)
            .closed
            .last()
            .is_some_and(|c| c.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: EventSender,
    ) -> Result<SessionChannel, SessionError> {
        let (reject, delay, auto_open, capacity, sent) = {
            let mut state = lock(&self.state);
            state.requests.push(request);
            (
                state.reject.clone(),
                state.connect_delay,
                state.auto_open,
                state.queue_capacity,
                state.sent.clone(),
            )
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = reject {
            return Err(SessionError::Transport(reason));
        }

        let (tx, mut rx) = mpsc::channel::<EncodedBlob>(capacity);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let closed = Arc::new(AtomicBool::new(false));

        let link_task = {
            let closed = closed.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        blob = rx.recv() => match blob {
                            Some(blob) => lock(&sent).push(blob),
                            None => break,
                        },
                        _ = &mut shutdown_rx => {
                            while let Ok(blob) = rx.try_recv() {
                                lock(&sent).push(blob);
                            }
                            break;
                        }
                    }
                }
                closed.store(true, Ordering::SeqCst);
            })
        };

        {
            let mut state = lock(&self.state);
            state.closed.push(closed);
            state.events = Some(events.clone());
        }
        if auto_open {
            let _ = events.send(SessionEvent::Channel(ChannelEvent::Opened));
        }

        Ok(SessionChannel::new(OutboundGate::new(tx), shutdown_tx, link_task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_queue;

    fn request() -> ConnectRequest {
        ConnectRequest {
            model: "m".to_string(),
            voice: "v".to_string(),
            system_instruction: "s".to_string(),
            api_key: "k".to_string(),
        }
    }

    #[tokio::test]
    async fn records_requests_and_frames() {
        let connector = MockConnector::new();
        let (events, mut rx) = event_queue();
        let mut channel = connector.connect(request(), events).await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Channel(ChannelEvent::Opened))
        ));

        channel.mark_ready();
        let blob = EncodedBlob {
            data: "AAA=".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        };
        channel.send(blob.clone());
        assert!(connector.emit(ChannelEvent::Interrupted));
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Channel(ChannelEvent::Interrupted))
        ));

        channel.close();
        for _ in 0..100 {
            if connector.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(connector.is_closed());
        assert_eq!(connector.sent_frames(), vec![blob]);
        assert_eq!(connector.last_request(), Some(request()));
    }

    #[tokio::test]
    async fn rejecting_connector_fails_handshake() {
        let connector = MockConnector::rejecting("bad key");
        let (events, _rx) = event_queue();
        let err = connector.connect(request(), events).await.err().unwrap();
        assert_eq!(err, SessionError::Transport("bad key".to_string()));
        assert_eq!(connector.connects(), 1);
    }
}
