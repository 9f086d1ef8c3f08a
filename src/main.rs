use anyhow::Context;
use live_voice::audio::AlsaBackend;
use live_voice::config::{API_KEY_VARS, Config};
use live_voice::gui_bridge::{GuiBridge, GuiEvent};
use live_voice::net_link::NetLink;
use live_voice::{SessionContext, SessionController, SessionHandle};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;

// start() resolves only once the endpoint answers, so it runs off the main loop.
fn spawn_start(handle: &SessionHandle, ctx: SessionContext) {
    let handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = handle.start(ctx).await {
            log::warn!("Session start failed: {}", e);
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().map_err(anyhow::Error::msg)?;
    log::info!("{} {} starting", env!("APP_NAME"), env!("APP_VERSION"));
    if config.credential().is_none() {
        log::warn!(
            "No API key found in {:?}; sessions will fail until one is set",
            API_KEY_VARS
        );
    }

    // 会话控制器，真实的ALSA设备和WebSocket连接
    let backend = Arc::new(AlsaBackend::new(&config));
    let connector = Arc::new(NetLink::new(&config));
    let handle = SessionController::spawn(config.clone(), backend, connector);

    // GUI进程通道
    let (tx_gui_event, mut rx_gui_event) = mpsc::channel::<GuiEvent>(100);

    // 启动GUI桥，与GUI进程通信
    let gui_bridge = Arc::new(
        GuiBridge::new(&config, tx_gui_event)
            .await
            .context("failed to bind GUI bridge socket")?,
    );
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });

    let mut status_rx = handle.subscribe();
    if let Err(e) = gui_bridge.send_status(&handle.status()).await {
        log::warn!("Failed to send to GUI: {}", e);
    }

    if config.autostart {
        spawn_start(&handle, SessionContext::from_config(&config));
    }

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            // 监听来自GUI桥的GUI事件
            Some(event) = rx_gui_event.recv() => {
                match event {
                    GuiEvent::Start(ctx) => spawn_start(&handle, ctx),
                    GuiEvent::Stop => handle.stop().await,
                }
            }

            // 会话状态变化转发给GUI
            changed = status_rx.changed() => {
                if changed.is_err() {
                    log::error!("Session controller stopped unexpectedly");
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                log::info!(
                    "Session {} (connected={}, speaking={}, stats={:?})",
                    status.state,
                    status.connected,
                    status.speaking,
                    handle.stats(),
                );
                if let Err(e) = gui_bridge.send_status(&status).await {
                    log::warn!("Failed to send to GUI: {}", e);
                }
            }
        }
    }

    handle.stop().await;
    Ok(())
}
