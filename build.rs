use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    endpoint: Endpoint,
    assistant: Assistant,
    audio: Audio,
    session: Session,
    gui: Gui,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Endpoint {
    ws_url: String,
    model: String,
    voice: String,
}

#[derive(Deserialize)]
struct Assistant {
    name: String,
    persona: String,
    guidance: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    input_sample_rate: u32,
    output_sample_rate: u32,
    frame_size: usize,
    playback_period_size: usize,
    output_gain: f32,
    outbound_queue: usize,
}

#[derive(Deserialize)]
struct Session {
    autostart: bool,
    display_name: String,
    descriptor: String,
}

#[derive(Deserialize)]
struct Gui {
    local_port: u16,
    remote_port: u16,
    local_ip: String,
    remote_ip: String,
    buffer_size: usize,
}

// 在编译时读取 config.toml 并设置环境变量
// API key is not baked in, see Config::new
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // Endpoint
    println!("cargo:rustc-env=WS_URL={}", config.endpoint.ws_url);
    println!("cargo:rustc-env=MODEL={}", config.endpoint.model);
    println!("cargo:rustc-env=VOICE={}", config.endpoint.voice);

    // System instruction template pieces
    println!("cargo:rustc-env=ASSISTANT_NAME={}", config.assistant.name);
    println!("cargo:rustc-env=ASSISTANT_PERSONA={}", config.assistant.persona);
    println!("cargo:rustc-env=ASSISTANT_GUIDANCE={}", config.assistant.guidance);

    // Audio
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=INPUT_SAMPLE_RATE={}", config.audio.input_sample_rate);
    println!("cargo:rustc-env=OUTPUT_SAMPLE_RATE={}", config.audio.output_sample_rate);
    println!("cargo:rustc-env=FRAME_SIZE={}", config.audio.frame_size);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);
    println!("cargo:rustc-env=OUTPUT_GAIN={}", config.audio.output_gain);
    println!("cargo:rustc-env=OUTBOUND_QUEUE={}", config.audio.outbound_queue);

    // Session defaults
    println!("cargo:rustc-env=SESSION_AUTOSTART={}", config.session.autostart);
    println!("cargo:rustc-env=SESSION_DISPLAY_NAME={}", config.session.display_name);
    println!("cargo:rustc-env=SESSION_DESCRIPTOR={}", config.session.descriptor);

    // GUI 配置
    println!("cargo:rustc-env=GUI_LOCAL_PORT={}", config.gui.local_port);
    println!("cargo:rustc-env=GUI_REMOTE_PORT={}", config.gui.remote_port);
    println!("cargo:rustc-env=GUI_LOCAL_IP={}", config.gui.local_ip);
    println!("cargo:rustc-env=GUI_REMOTE_IP={}", config.gui.remote_ip);
    println!("cargo:rustc-env=GUI_BUFFER_SIZE={}", config.gui.buffer_size);
}
