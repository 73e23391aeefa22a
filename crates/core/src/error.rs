//! Error types for the realtime audio session.

use thiserror::Error;

/// Errors raised while converting audio between wire and sample formats.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("malformed base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("PCM16 payload has an odd byte count ({0})")]
    OddLength(usize),
    #[error("failed to build resampler: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),
    #[error("resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
}

/// Errors surfaced by the session manager to its caller.
///
/// Sends issued after `stop()` are not represented here: they are dropped
/// silently and never reach the caller as an error.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone access was refused. The session never starts.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    /// Handshake or mid-stream transport failure.
    #[error("connection error: {0}")]
    Connection(String),
    /// A malformed inbound audio payload.
    #[error("failed to decode audio: {0}")]
    Decode(#[from] AudioError),
    /// `start()` was called while a session is connecting or active.
    #[error("a session is already active")]
    AlreadyActive,
    /// An operation needed a connection attempt that was never initiated.
    #[error("no session has been started")]
    NotStarted,
    /// `stop()` was requested before the remote stream opened.
    #[error("session stopped before it opened")]
    Stopped,
}

/// Result alias used across the session crate.
pub type Result<T> = std::result::Result<T, SessionError>;
