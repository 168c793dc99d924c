use serde::{Deserialize, Serialize};

use crate::audio::pcm::EncodedFrame;
use crate::error::{LiveError, Result};
use crate::net::{ServerMessage, SessionSetup};

/// Client → server messages. Serialized externally tagged:
/// ```text
/// {"setup": {...}}
/// {"realtimeInput": {"mediaChunks": [{"mimeType": "...", "data": "..."}]}}
/// ```
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Present-but-empty object enabling a transcription stream.
#[derive(Debug, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl ClientMessage {
    #[must_use]
    pub fn setup(setup: &SessionSetup) -> Self {
        let system_instruction = (!setup.system_instruction.is_empty()).then(|| Content {
            parts: vec![Part {
                text: Some(setup.system_instruction.clone()),
                inline_data: None,
            }],
        });

        Self::Setup(Setup {
            model: setup.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice.clone(),
                        },
                    },
                },
            },
            system_instruction,
            input_audio_transcription: setup.input_transcription.then_some(TranscriptionConfig {}),
            output_audio_transcription: setup
                .output_transcription
                .then_some(TranscriptionConfig {}),
        })
    }

    #[must_use]
    pub fn audio(frame: EncodedFrame) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: Some(frame.mime_type),
                data: frame.data,
            }],
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| LiveError::Protocol(format!("failed to encode client message: {e}")))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<Content>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

/// A server frame after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    SetupComplete,
    Content(ServerMessage),
    /// The server will close soon; carries the advertised time left.
    GoAway(String),
    /// Recognised JSON with nothing the session acts on (tool calls, usage).
    Ignored,
}

/// Parse one server frame (text or binary JSON).
pub fn decode_server_frame(payload: &[u8]) -> Result<Decoded> {
    let frame: ServerFrame = serde_json::from_slice(payload)
        .map_err(|e| LiveError::Protocol(format!("malformed server message: {e}")))?;

    if frame.setup_complete.is_some() {
        return Ok(Decoded::SetupComplete);
    }

    if let Some(content) = frame.server_content {
        let audio = content
            .model_turn
            .map(|turn| {
                turn.parts
                    .into_iter()
                    .filter_map(|p| p.inline_data.map(|blob| blob.data))
                    .collect()
            })
            .unwrap_or_default();

        return Ok(Decoded::Content(ServerMessage {
            audio,
            input_transcription: non_empty(content.input_transcription),
            output_transcription: non_empty(content.output_transcription),
            interrupted: content.interrupted,
            turn_complete: content.turn_complete,
        }));
    }

    if let Some(go_away) = frame.go_away {
        return Ok(Decoded::GoAway(
            go_away.time_left.unwrap_or_else(|| "unknown".to_string()),
        ));
    }

    Ok(Decoded::Ignored)
}

fn non_empty(transcription: Option<Transcription>) -> Option<String> {
    transcription
        .and_then(|t| t.text)
        .filter(|text| !text.is_empty())
}
