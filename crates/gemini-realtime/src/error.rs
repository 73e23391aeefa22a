//! Error types for the Gemini Live client.

use sidama_core::SessionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server closed the stream before acknowledging setup.
    #[error("stream closed during setup: {0}")]
    ClosedDuringSetup(String),
}

impl From<Error> for SessionError {
    fn from(err: Error) -> Self {
        SessionError::Connection(err.to_string())
    }
}
