//! Browser-backed audio devices.
//!
//! The browser owns the real microphone and speakers. These adapters let a
//! `SessionManager` drive them over the connection's WebSocket.

use super::protocol::ServerMessage;
use async_trait::async_trait;
use sidama_core::{
    AudioError, AudioOutput, Microphone, PlaybackEnded, PlaybackId, SessionError,
    audio::{
        CaptureFramer, CaptureResampler, PcmBuffer, encode_pcm16_base64, i16_to_f32,
        pcm16_from_le_bytes,
    },
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const CAPTURE_CHANNEL_CAPACITY: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct MicState {
    granted: bool,
    resampler: CaptureResampler,
    framer: CaptureFramer,
    sender: Option<mpsc::Sender<Vec<f32>>>,
}

/// Microphone fed by binary frames from the browser.
pub struct SocketMicrophone {
    state: Mutex<MicState>,
}

impl SocketMicrophone {
    pub fn new() -> Result<Self, AudioError> {
        Ok(Self {
            state: Mutex::new(MicState {
                granted: false,
                resampler: CaptureResampler::new(sidama_core::audio::CAPTURE_SAMPLE_RATE)?,
                framer: CaptureFramer::default(),
                sender: None,
            }),
        })
    }

    /// Records what the browser reported on `start`: whether access was
    /// granted and the rate of the frames it will send.
    pub fn configure(&self, granted: bool, sample_rate: u32) -> Result<(), AudioError> {
        let resampler = CaptureResampler::new(sample_rate)?;
        let mut state = lock(&self.state);
        state.granted = granted;
        state.resampler = resampler;
        state.framer = CaptureFramer::default();
        Ok(())
    }

    /// Feeds one binary frame. Frames arriving while no session is capturing
    /// are dropped.
    pub fn push_pcm16(&self, bytes: &[u8]) -> Result<(), AudioError> {
        let samples = i16_to_f32(&pcm16_from_le_bytes(bytes)?);
        let mut state = lock(&self.state);
        let Some(sender) = state.sender.clone() else {
            return Ok(());
        };
        if sender.is_closed() {
            state.sender = None;
            return Ok(());
        }

        let resampled = state.resampler.process(&samples)?;
        for frame in state.framer.push(&resampled) {
            if let Err(e) = sender.try_send(frame) {
                warn!(error = %e, "Dropping capture frame.");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Microphone for SocketMicrophone {
    async fn open(&self) -> sidama_core::Result<mpsc::Receiver<Vec<f32>>> {
        let mut state = lock(&self.state);
        if !state.granted {
            return Err(SessionError::PermissionDenied(
                "the browser did not grant microphone access".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        state.framer = CaptureFramer::default();
        state.sender = Some(tx);
        debug!("Socket microphone opened.");
        Ok(rx)
    }
}

/// Speaker on the browser side. Chunks are sent ahead of time with their
/// start offset on the connection clock; the browser does the actual timing.
pub struct SocketAudioOutput {
    opened_at: Instant,
    outgoing: mpsc::UnboundedSender<ServerMessage>,
    /// Cancels the end-of-chunk timer of chunks that have not finished.
    pending: Arc<Mutex<HashMap<PlaybackId, oneshot::Sender<()>>>>,
}

impl SocketAudioOutput {
    pub fn new(outgoing: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            opened_at: Instant::now(),
            outgoing,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl AudioOutput for SocketAudioOutput {
    fn current_time(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    fn schedule(&self, id: PlaybackId, buffer: PcmBuffer, start_at: f64, ended: PlaybackEnded) {
        let duration = buffer.duration();
        let msg = ServerMessage::AudioChunk {
            id: id.0,
            data: encode_pcm16_base64(&buffer.samples),
            start_at,
            duration,
        };
        if self.outgoing.send(msg).is_err() {
            debug!(%id, "Client is gone; chunk not delivered.");
        }

        let wait = (start_at + duration - self.current_time()).max(0.0);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        lock(&self.pending).insert(id, cancel_tx);

        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(wait)) => {
                    lock(&pending).remove(&id);
                    let _ = ended.send(id);
                }
                _ = cancel_rx => {}
            }
        });
    }

    fn stop(&self, id: PlaybackId) {
        if let Some(cancel) = lock(&self.pending).remove(&id) {
            let _ = cancel.send(());
        }
        let _ = self.outgoing.send(ServerMessage::StopPlayback { id: id.0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[tokio::test]
    async fn test_denied_microphone() {
        let mic = SocketMicrophone::new().unwrap();
        mic.configure(false, 16_000).unwrap();
        assert!(matches!(
            mic.open().await,
            Err(SessionError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_frames_are_assembled_at_16k() {
        let mic = SocketMicrophone::new().unwrap();
        mic.configure(true, 16_000).unwrap();

        // Nothing is captured before the session opens the microphone.
        mic.push_pcm16(&pcm_bytes(&[1; 4096])).unwrap();

        let mut frames = mic.open().await.unwrap();
        mic.push_pcm16(&pcm_bytes(&[16_384; 3000])).unwrap();
        assert!(frames.try_recv().is_err());
        mic.push_pcm16(&pcm_bytes(&[16_384; 1096])).unwrap();

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.len(), 4096);
        assert!(frame.iter().all(|&s| s == 0.5));
    }

    #[tokio::test]
    async fn test_resampled_frames() {
        let mic = SocketMicrophone::new().unwrap();
        mic.configure(true, 48_000).unwrap();
        let mut frames = mic.open().await.unwrap();

        // One second at 48 kHz yields roughly 16000 samples, so at least three
        // full frames.
        for _ in 0..10 {
            mic.push_pcm16(&pcm_bytes(&[0; 4800])).unwrap();
        }
        for _ in 0..3 {
            assert_eq!(frames.recv().await.unwrap().len(), 4096);
        }
    }

    #[tokio::test]
    async fn test_odd_frame_is_rejected() {
        let mic = SocketMicrophone::new().unwrap();
        assert!(matches!(
            mic.push_pcm16(&[0, 1, 2]),
            Err(AudioError::OddLength(3))
        ));
    }

    #[tokio::test]
    async fn test_schedule_emits_chunk_and_reports_end() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let output = SocketAudioOutput::new(out_tx);
        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();

        let now = output.current_time();
        output.schedule(
            PlaybackId(7),
            PcmBuffer::new(vec![0.0; 240], 24_000),
            now,
            ended_tx,
        );

        match out_rx.recv().await.unwrap() {
            ServerMessage::AudioChunk {
                id,
                start_at,
                duration,
                ..
            } => {
                assert_eq!(id, 7);
                assert_eq!(start_at, now);
                assert!((duration - 0.01).abs() < 1e-9);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let ended = tokio::time::timeout(Duration::from_secs(5), ended_rx.recv())
            .await
            .unwrap();
        assert_eq!(ended, Some(PlaybackId(7)));
    }

    #[tokio::test]
    async fn test_stop_cancels_end_notice() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let output = SocketAudioOutput::new(out_tx);
        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();

        let start_at = output.current_time() + 0.05;
        output.schedule(
            PlaybackId(1),
            PcmBuffer::new(vec![0.0; 2400], 24_000),
            start_at,
            ended_tx,
        );
        output.stop(PlaybackId(1));

        assert!(matches!(
            out_rx.recv().await,
            Some(ServerMessage::AudioChunk { id: 1, .. })
        ));
        assert_eq!(
            out_rx.recv().await,
            Some(ServerMessage::StopPlayback { id: 1 })
        );

        // The timer task held the only other sender; cancelling it closes the channel.
        let ended = tokio::time::timeout(Duration::from_secs(5), ended_rx.recv())
            .await
            .unwrap();
        assert_eq!(ended, None);
    }
}
