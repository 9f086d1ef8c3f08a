/// Environment variables consulted for the endpoint credential, in order.
pub const API_KEY_VARS: [&str; 2] = ["LIVE_VOICE_API_KEY", "API_KEY"];

#[derive(Debug, Clone)]
pub struct Config {
    // 远端会话配置
    pub ws_url: &'static str,
    pub model: &'static str,
    pub voice: &'static str,

    // system instruction template
    pub assistant_name: &'static str,
    pub assistant_persona: &'static str,
    pub assistant_guidance: &'static str,

    // 音频配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub playback_period_size: usize,
    pub output_gain: f32,
    pub outbound_queue: usize,

    // 会话默认值
    pub autostart: bool,
    pub default_display_name: String,
    pub default_descriptor: String,

    // GUI进程配置
    pub gui_local_port: u16,
    pub gui_remote_port: u16,
    pub gui_local_ip: &'static str,
    pub gui_remote_ip: &'static str,
    pub gui_buffer_size: usize,

    /// Runtime credential, never baked into the binary.
    pub api_key: Option<String>,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            ws_url: env!("WS_URL"),
            model: env!("MODEL"),
            voice: env!("VOICE"),

            assistant_name: env!("ASSISTANT_NAME"),
            assistant_persona: env!("ASSISTANT_PERSONA"),
            assistant_guidance: env!("ASSISTANT_GUIDANCE"),

            capture_device: env!("CAPTURE_DEVICE"),
            playback_device: env!("PLAYBACK_DEVICE"),
            input_sample_rate: env!("INPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse INPUT_SAMPLE_RATE")?,
            output_sample_rate: env!("OUTPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse OUTPUT_SAMPLE_RATE")?,
            frame_size: env!("FRAME_SIZE").parse()
                .map_err(|_| "Failed to parse FRAME_SIZE")?,
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,
            output_gain: env!("OUTPUT_GAIN").parse()
                .map_err(|_| "Failed to parse OUTPUT_GAIN")?,
            outbound_queue: env!("OUTBOUND_QUEUE").parse()
                .map_err(|_| "Failed to parse OUTBOUND_QUEUE")?,

            autostart: env!("SESSION_AUTOSTART").parse()
                .map_err(|_| "Failed to parse SESSION_AUTOSTART")?,
            default_display_name: env!("SESSION_DISPLAY_NAME").to_string(),
            default_descriptor: env!("SESSION_DESCRIPTOR").to_string(),

            gui_local_port: env!("GUI_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_port: env!("GUI_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,
            gui_local_ip: env!("GUI_LOCAL_IP"),
            gui_remote_ip: env!("GUI_REMOTE_IP"),
            gui_buffer_size: env!("GUI_BUFFER_SIZE").parse()
                .map_err(|_| "Failed to parse GUI_BUFFER_SIZE")?,

            api_key: api_key_from_env(),
        })
    }

    /// Returns the configured credential if it is present and non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

fn api_key_from_env() -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}
