//! Wire types for the Gemini Live `BidiGenerateContent` protocol.

use serde::{Deserialize, Serialize};
use sidama_core::{LiveSessionConfig, RealtimeInput, ResponseModality, ServerEvent};

// --- Client messages ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(BidiGenerateContentRealtimeInput),
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl From<&LiveSessionConfig> for BidiGenerateContentSetup {
    fn from(config: &LiveSessionConfig) -> Self {
        let system_instruction = (!config.system_prompt.is_empty()).then(|| Content {
            parts: vec![Part {
                text: config.system_prompt.clone(),
            }],
        });
        Self {
            model: config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality],
            },
            system_instruction,
            output_audio_transcription: config
                .output_transcription
                .then_some(AudioTranscriptionConfig {}),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
}

#[derive(Serialize, Debug)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
pub struct Part {
    pub text: String,
}

/// Enables transcription; the server takes an empty object.
#[derive(Serialize, Debug)]
pub struct AudioTranscriptionConfig {}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentRealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    /// Still images travel as single video frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Blob>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl From<sidama_core::Blob> for Blob {
    fn from(blob: sidama_core::Blob) -> Self {
        Self {
            mime_type: blob.mime_type,
            data: blob.data,
        }
    }
}

impl From<RealtimeInput> for ClientMessage {
    fn from(input: RealtimeInput) -> Self {
        let payload = match input {
            RealtimeInput::Audio(blob) => BidiGenerateContentRealtimeInput {
                audio: Some(blob.into()),
                ..Default::default()
            },
            RealtimeInput::Image(blob) => BidiGenerateContentRealtimeInput {
                video: Some(blob.into()),
                ..Default::default()
            },
        };
        ClientMessage::RealtimeInput(payload)
    }
}

// --- Server messages ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<LiveServerContent>,
    pub go_away: Option<GoAway>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveServerContent {
    pub model_turn: Option<ServerContentTurn>,
    pub interrupted: Option<bool>,
    pub turn_complete: Option<bool>,
    pub output_transcription: Option<ServerTranscription>,
}

#[derive(Deserialize, Debug)]
pub struct ServerContentTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<ServerBlob>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerBlob {
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Deserialize, Debug)]
pub struct ServerTranscription {
    #[serde(default)]
    pub text: String,
}

/// Notice that the server will disconnect soon.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

impl ServerMessage {
    /// Parses one frame; the server sends JSON in both text and binary frames.
    pub fn parse(frame: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(frame)
    }

    /// Flattens the message into events, in the order they must be applied:
    /// audio first, then interruption, then transcription, then turn end.
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        if let Some(content) = self.server_content {
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    match part.inline_data {
                        Some(blob) if is_audio(blob.mime_type.as_deref()) => {
                            events.push(ServerEvent::AudioChunk { data: blob.data })
                        }
                        _ => {}
                    }
                }
            }
            if content.interrupted == Some(true) {
                events.push(ServerEvent::Interruption);
            }
            if let Some(transcription) = content.output_transcription {
                events.push(ServerEvent::TranscriptFragment(transcription.text));
            }
            if content.turn_complete == Some(true) {
                events.push(ServerEvent::TurnComplete);
            }
        }
        if events.is_empty() {
            events.push(ServerEvent::Unknown);
        }
        events
    }
}

fn is_audio(mime_type: Option<&str>) -> bool {
    mime_type.is_none_or(|m| m.starts_with("audio/"))
}
