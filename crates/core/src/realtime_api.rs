//! Seams between the session manager and the outside world.
//!
//! The manager never talks to a socket, a microphone or a speaker directly.
//! Providers implement [`LiveConnector`], hosts implement [`Microphone`] and
//! [`AudioOutput`].

use crate::{
    audio::PcmBuffer,
    error::Result,
    generic_types::{LiveEvent, LiveSessionConfig, RealtimeInput},
    playback::PlaybackId,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Channel on which an output reports chunks that finished playing.
pub type PlaybackEnded = mpsc::UnboundedSender<PlaybackId>;

/// An open bidirectional stream with the remote model.
///
/// Dropping `sender` asks the provider to close the stream.
pub struct LiveConnection {
    pub sender: mpsc::Sender<RealtimeInput>,
    pub events: mpsc::Receiver<LiveEvent>,
}

/// Opens streams to a remote conversational model.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Resolves once the remote stream reports it is open.
    async fn connect(&self, config: &LiveSessionConfig) -> Result<LiveConnection>;
}

/// Source of 16 kHz mono capture frames.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Requests access and starts capturing. Dropping the receiver halts
    /// capture. Fails with `SessionError::PermissionDenied` when refused.
    async fn open(&self) -> Result<mpsc::Receiver<Vec<f32>>>;
}

/// Playback device with its own monotonic clock, in seconds.
pub trait AudioOutput: Send + Sync {
    fn current_time(&self) -> f64;

    /// Starts `buffer` at `start_at` on the output clock. When it ends on its
    /// own, the output sends `id` on `ended`.
    fn schedule(&self, id: PlaybackId, buffer: PcmBuffer, start_at: f64, ended: PlaybackEnded);

    /// Cuts a scheduled or playing chunk. No end notice follows.
    fn stop(&self, id: PlaybackId);
}
