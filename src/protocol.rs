//! JSON messages exchanged with the live endpoint, and the system
//! instruction sent at setup.

use serde::{Deserialize, Serialize};

use crate::audio::codec::EncodedBlob;
use crate::channel::{ChannelEvent, ConnectRequest};
use crate::config::Config;

// ======================== Outbound ========================

/// First message on a new connection.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    /// Audio-only response in a single prebuilt voice.
    pub fn from_request(request: &ConnectRequest) -> Self {
        Self {
            setup: Setup {
                model: request.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: request.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: request.system_instruction.clone(),
                    }],
                },
            },
        }
    }
}

/// One captured frame on the wire.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeInputMessage {
    pub fn from_blob(blob: EncodedBlob) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: blob.mime_type,
                    data: blob.data,
                }],
            },
        }
    }
}

// ======================== Inbound ========================

// 服务器消息结构体
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: Option<String>,
    pub data: Option<String>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.turn_complete)
    }

    /// Events carried by this message, in the order they must be applied.
    ///
    /// An interruption comes before any audio in the same message.
    /// Heartbeat-only messages yield nothing.
    pub fn into_events(self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(ChannelEvent::Opened);
        }
        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(ChannelEvent::Interrupted);
            }
            let parts = content.model_turn.map(|t| t.parts).unwrap_or_default();
            for part in parts {
                if let Some(data) = part.inline_data.and_then(|d| d.data) {
                    if !data.is_empty() {
                        events.push(ChannelEvent::InboundDelta(data));
                    }
                }
            }
        }
        events
    }
}

// ======================== System instruction ========================

/// Who the assistant is talking to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub display_name: Option<String>,
    pub descriptor: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl SessionContext {
    /// Blank strings count as absent.
    pub fn new(display_name: Option<String>, descriptor: Option<String>) -> Self {
        Self {
            display_name: non_blank(display_name),
            descriptor: non_blank(descriptor),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context from the `[session]` defaults in config.toml.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Some(config.default_display_name.clone()),
            Some(config.default_descriptor.clone()),
        )
    }

    pub fn user_context(&self) -> String {
        match (&self.display_name, &self.descriptor) {
            (Some(name), Some(descriptor)) => {
                format!("The user's name is {} and they are {}.", name, descriptor)
            }
            (Some(name), None) => format!("The user's name is {}.", name),
            (None, _) => "The user is anonymous.".to_string(),
        }
    }
}

pub fn system_instruction(name: &str, persona: &str, guidance: &str, ctx: &SessionContext) -> String {
    format!(
        "You are '{}', {}. {} {}",
        name,
        persona,
        ctx.user_context(),
        guidance
    )
}

pub fn build_system_instruction(config: &Config, ctx: &SessionContext) -> String {
    system_instruction(
        config.assistant_name,
        config.assistant_persona,
        config.assistant_guidance,
        ctx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ConnectRequest {
        ConnectRequest {
            model: "models/live-test".to_string(),
            voice: "Kore".to_string(),
            system_instruction: "Be brief.".to_string(),
            api_key: "k".to_string(),
        }
    }

    #[test]
    fn setup_message_shape() {
        let value = serde_json::to_value(SetupMessage::from_request(&request())).unwrap();
        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/live-test",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Kore" } }
                        }
                    },
                    "systemInstruction": { "parts": [{ "text": "Be brief." }] }
                }
            })
        );
    }

    #[test]
    fn realtime_input_shape() {
        let blob = EncodedBlob {
            data: "AAA=".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        };
        let value = serde_json::to_value(RealtimeInputMessage::from_blob(blob)).unwrap();
        assert_eq!(
            value,
            json!({
                "realtimeInput": {
                    "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": "AAA=" }]
                }
            })
        );
    }

    #[test]
    fn setup_complete_opens_channel() {
        let msg = ServerMessage::parse(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(msg.into_events(), vec![ChannelEvent::Opened]);
    }

    #[test]
    fn interruption_precedes_delta_in_same_message() {
        let msg = ServerMessage::parse(
            r#"{"serverContent":{"interrupted":true,
                "modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}]}}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.into_events(),
            vec![
                ChannelEvent::Interrupted,
                ChannelEvent::InboundDelta("AAA=".to_string())
            ]
        );
    }

    #[test]
    fn every_audio_part_becomes_a_delta() {
        let msg = ServerMessage::parse(
            r#"{"serverContent":{"modelTurn":{"parts":[
                {"inlineData":{"data":"AQA="}},
                {"text":"ignored"},
                {"inlineData":{"data":"AgA="}}]}}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.into_events(),
            vec![
                ChannelEvent::InboundDelta("AQA=".to_string()),
                ChannelEvent::InboundDelta("AgA=".to_string())
            ]
        );
    }

    #[test]
    fn heartbeat_yields_nothing() {
        let msg = ServerMessage::parse(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        assert!(msg.is_turn_complete());
        assert!(msg.into_events().is_empty());

        let msg = ServerMessage::parse(r#"{"usageMetadata":{"totalTokenCount":3}}"#).unwrap();
        assert!(msg.into_events().is_empty());
    }

    #[test]
    fn user_context_variants() {
        let full = SessionContext::new(Some("Asha".into()), Some("a student in Grade 11".into()));
        assert_eq!(
            full.user_context(),
            "The user's name is Asha and they are a student in Grade 11."
        );

        let name_only = SessionContext::new(Some("Asha".into()), Some("  ".into()));
        assert_eq!(name_only.user_context(), "The user's name is Asha.");

        // A blank name renders as anonymous even when a descriptor is set.
        let blank = SessionContext::new(Some("".into()), Some("a student".into()));
        assert_eq!(blank, SessionContext::new(None, Some("a student".into())));
        assert!(blank.display_name.is_none());
        assert_eq!(blank.user_context(), "The user is anonymous.");

        assert_eq!(
            SessionContext::anonymous().user_context(),
            "The user is anonymous."
        );
    }

    #[test]
    fn system_instruction_template() {
        let ctx = SessionContext::new(Some("Asha".into()), None);
        assert_eq!(
            system_instruction("Mitra", "a calm listener", "Keep responses concise.", &ctx),
            "You are 'Mitra', a calm listener. The user's name is Asha. Keep responses concise."
        );
    }
}
