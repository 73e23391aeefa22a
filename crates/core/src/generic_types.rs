use base64::Engine;
use serde::Serialize;

/// Persona spoken by the live guide.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are 'The Pulse', a high-energy Sidama Guide. \
You speak with intense rhythm and pride. If the user uploads a photo, react to it instantly \
with hyped cultural context! Greet the user like they just walked into the middle of \
Fichee-Chambalaalla festival!";

/// Native-audio model used when no other model is configured.
pub const DEFAULT_LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";

/// A base64-wrapped media payload tagged with its mime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl Blob {
    /// Wraps raw bytes without altering them.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Recovers the raw bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.data)
    }
}

/// One unit of streamed input for the remote model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeInput {
    /// A capture frame of 16 kHz PCM16.
    Audio(Blob),
    /// A still image attachment.
    Image(Blob),
}

impl RealtimeInput {
    pub fn blob(&self) -> &Blob {
        match self {
            RealtimeInput::Audio(blob) | RealtimeInput::Image(blob) => blob,
        }
    }
}

/// Inbound model messages, decoded once at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A chunk of spoken audio (base64 PCM16, 24 kHz mono).
    AudioChunk { data: String },
    /// The user barged in; local playback must stop now.
    Interruption,
    /// A piece of the transcription of the model's speech.
    TranscriptFragment(String),
    /// The model finished its turn.
    TurnComplete,
    /// Anything this client does not act on.
    Unknown,
}

/// Everything a live connection can report after it opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    Server(ServerEvent),
    /// The remote side closed the stream.
    Closed { reason: Option<String> },
    /// The transport failed mid-stream.
    Error(String),
}

/// Modality the model answers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Audio,
}

/// Generic configuration for opening a live session with any provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSessionConfig {
    pub model: String,
    pub system_prompt: String,
    pub response_modality: ResponseModality,
    pub output_transcription: bool,
}

impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            response_modality: ResponseModality::Audio,
            output_transcription: true,
        }
    }
}
