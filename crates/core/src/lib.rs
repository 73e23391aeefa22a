//! Sidama Live Core
//!
//! The realtime audio session manager behind the live guide: it streams
//! microphone audio to a remote conversational model, plays the model's
//! speech back gaplessly, honours barge-in interruptions, forwards still
//! image attachments and keeps a rolling transcript.
//!
//! Providers and audio devices plug in through the traits in
//! [`realtime_api`].

pub mod audio;
pub mod error;
pub mod generic_types;
pub mod playback;
pub mod realtime_api;
pub mod session;
pub mod transcript;

pub use error::{AudioError, Result, SessionError};
pub use generic_types::{
    Blob, LiveEvent, LiveSessionConfig, RealtimeInput, ResponseModality, ServerEvent,
};
pub use playback::{PlaybackId, PlaybackScheduler, ScheduledChunk};
pub use realtime_api::{AudioOutput, LiveConnection, LiveConnector, Microphone, PlaybackEnded};
pub use session::{SessionManager, SessionState, SessionStatus};
pub use transcript::{TRANSCRIPT_WINDOW_WORDS, Transcript};
