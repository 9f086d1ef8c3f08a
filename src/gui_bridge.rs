use crate::config::Config;
use crate::protocol::SessionContext;
use crate::state_machine::SessionStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuiEvent {
    Start(SessionContext),
    Stop,
}

// GUI进程发来的请求
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
enum GuiRequest {
    Start {
        display_name: Option<String>,
        descriptor: Option<String>,
    },
    Stop,
}

/// Parse one datagram from the UI process. Unknown messages yield `None`.
pub fn parse_request(msg: &str) -> Option<GuiEvent> {
    match serde_json::from_str::<GuiRequest>(msg) {
        Ok(GuiRequest::Start {
            display_name,
            descriptor,
        }) => Some(GuiEvent::Start(SessionContext::new(display_name, descriptor))),
        Ok(GuiRequest::Stop) => Some(GuiEvent::Stop),
        Err(e) => {
            log::warn!("Ignoring GUI message {:?}: {}", msg, e);
            None
        }
    }
}

// 发给GUI进程的状态消息
#[derive(Serialize, Debug)]
struct StatusMessage<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    state: &'static str,
    connected: bool,
    speaking: bool,
    error: Option<&'a str>,
}

pub fn status_message(status: &SessionStatus) -> String {
    let msg = StatusMessage {
        msg_type: "status",
        state: status.state.as_str(),
        connected: status.connected,
        speaking: status.speaking,
        error: status.last_error.as_deref(),
    };
    // A struct of strings and bools always serializes.
    serde_json::to_string(&msg).unwrap_or_default()
}

pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    buffer_size: usize,
    tx: mpsc::Sender<GuiEvent>,
}

// GUI进程和Core进程通过本地UDP通信，端口在配置中指定
impl GuiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<Self> {
        // 绑定本地UDP端口
        let socket =
            UdpSocket::bind(format!("{}:{}", config.gui_local_ip, config.gui_local_port)).await?;
        let target_addr = format!("{}:{}", config.gui_remote_ip, config.gui_remote_port);

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            buffer_size: config.gui_buffer_size.max(1),
            tx,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            // 通过UDP socket接收消息
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let Ok(msg) = std::str::from_utf8(&buf[..len]) else {
                log::warn!("Ignoring non-UTF-8 GUI datagram ({} bytes)", len);
                continue;
            };
            if let Some(event) = parse_request(msg) {
                if self.tx.send(event).await.is_err() {
                    log::info!("GUI event receiver dropped, bridge exiting");
                    break;
                }
            }
        }
        Ok(())
    }

    pub async fn send_status(&self, status: &SessionStatus) -> anyhow::Result<()> {
        self.socket
            .send_to(status_message(status).as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }
}
