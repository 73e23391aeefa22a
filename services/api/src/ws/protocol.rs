//! Defines the WebSocket message protocol between the browser client and the API server.
//!
//! Control messages travel as JSON text frames. Microphone audio travels as
//! binary frames of little-endian i16 mono PCM at the rate declared in `start`.

use serde::{Deserialize, Serialize};
use sidama_core::{SessionState, SessionStatus};

/// Rate assumed for binary microphone frames when `start` does not name one.
pub const DEFAULT_CLIENT_SAMPLE_RATE: u32 = 16_000;

fn default_sample_rate() -> u32 {
    DEFAULT_CLIENT_SAMPLE_RATE
}

fn default_microphone() -> bool {
    true
}

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts a live session.
    Start {
        /// Rate of the binary microphone frames that follow.
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
        /// `false` when the browser refused microphone access.
        #[serde(default = "default_microphone")]
        microphone: bool,
    },
    /// Ends the live session.
    Stop,
    /// A still image, base64 encoded.
    Image { data: String, mime_type: String },
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The session lifecycle changed.
    Status {
        state: SessionState,
        error: Option<String>,
    },
    /// The most recent words spoken by the guide.
    Transcript { text: String },
    /// A chunk of 24 kHz PCM16 to start at `start_at` seconds on the connection clock.
    AudioChunk {
        id: u64,
        data: String,
        start_at: f64,
        duration: f64,
    },
    /// Cut a scheduled or playing chunk immediately.
    StopPlayback { id: u64 },
    /// Reports a failed request to the client.
    Error { message: String },
}

impl From<SessionStatus> for ServerMessage {
    fn from(status: SessionStatus) -> Self {
        ServerMessage::Status {
            state: status.state,
            error: status.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_defaults() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"start"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Start {
                sample_rate: 16_000,
                microphone: true
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"start","sample_rate":48000,"microphone":false}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Start {
                sample_rate: 48_000,
                microphone: false
            }
        );
    }

    #[test]
    fn test_stop_and_image() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Stop);

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"image","data":"AQID","mime_type":"image/png"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Image {
                data: "AQID".to_string(),
                mime_type: "image/png".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_message_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"init"}"#).is_err());
    }

    #[test]
    fn test_server_message_shapes() {
        let status = ServerMessage::from(SessionStatus {
            state: SessionState::Closed,
            error: Some("boom".to_string()),
        });
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            json!({ "type": "status", "state": "closed", "error": "boom" })
        );

        let chunk = ServerMessage::AudioChunk {
            id: 3,
            data: "AAA=".to_string(),
            start_at: 0.5,
            duration: 0.25,
        };
        assert_eq!(
            serde_json::to_value(chunk).unwrap(),
            json!({ "type": "audio_chunk", "id": 3, "data": "AAA=", "start_at": 0.5, "duration": 0.25 })
        );

        assert_eq!(
            serde_json::to_value(ServerMessage::StopPlayback { id: 3 }).unwrap(),
            json!({ "type": "stop_playback", "id": 3 })
        );
    }
}
