use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::audio::codec::EncodedBlob;
use crate::channel::{ChannelConnector, ChannelEvent, ConnectRequest, OutboundGate, SessionChannel};
use crate::config::Config;
use crate::error::SessionError;
use crate::event::{EventSender, SessionEvent};
use crate::protocol::{RealtimeInputMessage, ServerMessage, SetupMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector for the live endpoint.
///
/// One connection per session; there is no reconnect loop. A dropped
/// connection ends the session and the user starts a new one.
#[derive(Debug, Clone)]
pub struct NetLink {
    ws_url: String,
    outbound_queue: usize,
}

impl NetLink {
    pub fn new(config: &Config) -> Self {
        Self::with_url(config.ws_url, config.outbound_queue)
    }

    pub fn with_url(ws_url: impl Into<String>, outbound_queue: usize) -> Self {
        Self {
            ws_url: ws_url.into(),
            outbound_queue: outbound_queue.max(1),
        }
    }
}

#[async_trait]
impl ChannelConnector for NetLink {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: EventSender,
    ) -> Result<SessionChannel, SessionError> {
        // 密钥只放在URL里，日志里不打印
        let mut url = Url::parse(&self.ws_url)?;
        url.query_pairs_mut().append_pair("key", &request.api_key);

        log::info!("Connecting to {}...", self.ws_url);
        let (mut ws_stream, response) = connect_async(url.as_str()).await?;
        log::info!("Connected! (HTTP {})", response.status());

        // 发送setup消息进行初始化
        let setup = serde_json::to_string(&SetupMessage::from_request(&request))?;
        log::debug!("Sending setup for model {}", request.model);
        ws_stream.send(Message::text(setup)).await?;

        let (tx, rx) = mpsc::channel::<EncodedBlob>(self.outbound_queue);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let link_task = tokio::spawn(link_loop(ws_stream, rx, shutdown_rx, events));

        Ok(SessionChannel::new(OutboundGate::new(tx), shutdown_tx, link_task))
    }
}

fn emit(events: &EventSender, event: ChannelEvent) {
    let _ = events.send(SessionEvent::Channel(event));
}

fn dispatch(events: &EventSender, text: &str) {
    match ServerMessage::parse(text) {
        Ok(msg) => {
            if msg.is_turn_complete() {
                log::debug!("Turn complete");
            }
            for event in msg.into_events() {
                emit(events, event);
            }
        }
        Err(e) => log::warn!("Ignoring unparseable server message: {}", e),
    }
}

// 主循环，处理读取和写入
async fn link_loop(
    ws_stream: WsStream,
    mut rx: mpsc::Receiver<EncodedBlob>,
    mut shutdown: oneshot::Receiver<()>,
    events: EventSender,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => dispatch(&events, text.as_str()),
                    // The endpoint may deliver JSON in binary frames.
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => dispatch(&events, text),
                        Err(_) => log::warn!("Ignoring non-UTF-8 binary frame ({} bytes)", data.len()),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("Server closed connection: {:?}", frame);
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty());
                        emit(&events, ChannelEvent::Closed(reason));
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("WebSocket error: {}", e);
                        emit(&events, ChannelEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        emit(&events, ChannelEvent::Closed(None));
                        break;
                    }
                }
            }
            blob = rx.recv() => {
                let Some(blob) = blob else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&RealtimeInputMessage::from_blob(blob)) {
                    Ok(json) => json,
                    Err(e) => {
                        log::warn!("Failed to serialize frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::text(json)).await {
                    log::error!("WebSocket send failed: {}", e);
                    emit(&events, ChannelEvent::Error(e.to_string()));
                    break;
                }
            }
            _ = &mut shutdown => {
                log::info!("Closing connection");
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Offer;
    use crate::event::{EventReceiver, event_queue};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn request() -> ConnectRequest {
        ConnectRequest {
            model: "models/live-test".to_string(),
            voice: "Kore".to_string(),
            system_instruction: "Be brief.".to_string(),
            api_key: "secret".to_string(),
        }
    }

    async fn next_channel_event(rx: &mut EventReceiver) -> ChannelEvent {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(SessionEvent::Channel(event))) => event,
            other => panic!("expected a channel event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn setup_frames_and_close_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let setup = ws.next().await.unwrap().unwrap();
            let setup: Value = serde_json::from_str(setup.to_text().unwrap()).unwrap();
            ws.send(Message::text(r#"{"setupComplete":{}}"#)).await.unwrap();

            let frame = ws.next().await.unwrap().unwrap();
            let frame: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();

            ws.send(Message::text(
                r#"{"serverContent":{"interrupted":true,"modelTurn":{"parts":[{"inlineData":{"data":"AAA="}}]}}}"#,
            ))
            .await
            .unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            (setup, frame)
        });

        let link = NetLink::with_url(format!("ws://{}/live", addr), 4);
        let (events, mut rx) = event_queue();
        let channel = link.connect(request(), events).await.unwrap();

        assert_eq!(next_channel_event(&mut rx).await, ChannelEvent::Opened);
        channel.mark_ready();
        let blob = EncodedBlob {
            data: "AQA=".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        };
        assert_eq!(channel.send(blob), Offer::Sent);

        assert_eq!(next_channel_event(&mut rx).await, ChannelEvent::Interrupted);
        assert_eq!(
            next_channel_event(&mut rx).await,
            ChannelEvent::InboundDelta("AAA=".to_string())
        );
        assert!(matches!(next_channel_event(&mut rx).await, ChannelEvent::Closed(_)));

        let (setup, frame) = server.await.unwrap();
        assert_eq!(setup["setup"]["model"], "models/live-test");
        assert_eq!(
            setup["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be brief."
        );
        assert_eq!(frame["realtimeInput"]["mediaChunks"][0]["data"], "AQA=");
        assert_eq!(
            frame["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let link = NetLink::with_url(format!("ws://{}/live", addr), 4);
        let (events, _rx) = event_queue();
        let err = link.connect(request(), events).await.err().unwrap();
        assert!(matches!(err, SessionError::Transport(_)));
    }
}
