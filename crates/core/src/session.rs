//! The realtime audio session manager.
//!
//! A [`SessionManager`] owns one background driver task. Every mutation of
//! session state (lifecycle, playback cursor, audible chunks, transcript,
//! queued inputs) happens inside that task, one message at a time, in arrival
//! order. Caller commands, capture frames, inbound model events, playback end
//! notices and setup results all funnel into the same loop, so no locks guard
//! the state.

use crate::{
    audio::{self, CAPTURE_MIME_TYPE},
    error::{Result, SessionError},
    generic_types::{Blob, LiveEvent, LiveSessionConfig, RealtimeInput, ServerEvent},
    playback::{PlaybackId, PlaybackScheduler},
    realtime_api::{AudioOutput, LiveConnection, LiveConnector, Microphone},
    transcript::Transcript,
};
use serde::Serialize;
use std::{collections::VecDeque, fmt, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, trace, warn};

/// Capture frames held while the handshake is in flight. Older frames are
/// dropped first.
const MAX_QUEUED_AUDIO_FRAMES: usize = 64;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What the reported-status channel carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Set when the session closed because of a failure.
    pub error: Option<String>,
}

impl SessionStatus {
    fn new(state: SessionState) -> Self {
        Self { state, error: None }
    }
}

enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
    SendImage(Blob, oneshot::Sender<Result<()>>),
}

/// Results of the setup task, tagged with the attempt they belong to.
enum Setup {
    Microphone(u64, Result<mpsc::Receiver<Vec<f32>>>),
    Connection(u64, Result<LiveConnection>),
}

/// Handle to a single-session manager.
///
/// Must be created inside a Tokio runtime. Dropping the handle ends the
/// driver task and closes any open stream.
pub struct SessionManager {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    transcript: watch::Receiver<Transcript>,
    _driver: JoinHandle<()>,
}

impl SessionManager {
    pub fn new(
        config: LiveSessionConfig,
        connector: Arc<dyn LiveConnector>,
        microphone: Arc<dyn Microphone>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(SessionStatus::new(SessionState::Idle));
        let (transcript_tx, transcript_rx) = watch::channel(Transcript::new());

        let driver = Driver {
            config: Arc::new(config),
            connector,
            microphone,
            output,
            state: SessionState::Idle,
            attempt: 0,
            scheduler: PlaybackScheduler::new(),
            transcript: Transcript::new(),
            queued: VecDeque::new(),
            sender: None,
            events: None,
            capture: None,
            start_reply: None,
            status_tx,
            transcript_tx,
        };
        let handle = tokio::spawn(driver.run(commands_rx));

        Self {
            commands: commands_tx,
            status: status_rx,
            transcript: transcript_rx,
            _driver: handle,
        }
    }

    /// Requests the microphone, opens the remote stream and resolves once the
    /// session is active. Valid from `Idle` and `Closed`.
    pub async fn start(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Start(reply_tx))
            .await
            .map_err(|_| SessionError::Stopped)?;
        reply_rx.await.map_err(|_| SessionError::Stopped)?
    }

    /// Closes the stream and halts capture. Audio already playing finishes on
    /// its own. Calling it when nothing is running is a no-op.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Stop(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Sends a still image as a single realtime input. Queued while the
    /// handshake is in flight; silently dropped after `stop()`.
    pub async fn send_image(&self, bytes: &[u8], mime_type: &str) -> Result<()> {
        let blob = Blob::from_bytes(mime_type, bytes);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::SendImage(blob, reply_tx))
            .await
            .map_err(|_| SessionError::Stopped)?;
        reply_rx.await.map_err(|_| SessionError::Stopped)?
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn transcript(&self) -> Transcript {
        self.transcript.borrow().clone()
    }

    pub fn subscribe_transcript(&self) -> watch::Receiver<Transcript> {
        self.transcript.clone()
    }
}

struct Driver {
    config: Arc<LiveSessionConfig>,
    connector: Arc<dyn LiveConnector>,
    microphone: Arc<dyn Microphone>,
    output: Arc<dyn AudioOutput>,

    state: SessionState,
    /// Incremented by every `start()`, so late setup results from an
    /// abandoned attempt are recognised and discarded.
    attempt: u64,
    scheduler: PlaybackScheduler,
    transcript: Transcript,
    /// Inputs issued while connecting, flushed in order on open.
    queued: VecDeque<RealtimeInput>,

    sender: Option<mpsc::Sender<RealtimeInput>>,
    events: Option<mpsc::Receiver<LiveEvent>>,
    capture: Option<mpsc::Receiver<Vec<f32>>>,
    start_reply: Option<oneshot::Sender<Result<()>>>,

    status_tx: watch::Sender<SessionStatus>,
    transcript_tx: watch::Sender<Transcript>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let (setup_tx, mut setup_rx) = mpsc::channel::<Setup>(8);
        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel::<PlaybackId>();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, &setup_tx),
                    None => break,
                },
                Some(setup) = setup_rx.recv() => self.handle_setup(setup),
                frame = recv_opt(&mut self.capture) => match frame {
                    Some(frame) => self.handle_capture(frame),
                    None => {
                        debug!("Microphone stream ended.");
                        self.capture = None;
                    }
                },
                event = recv_opt(&mut self.events) => match event {
                    Some(event) => self.handle_live_event(event, &ended_tx),
                    None => self.close(Some("remote stream ended unexpectedly".to_string())),
                },
                Some(id) = ended_rx.recv() => {
                    if self.scheduler.finished(id) {
                        trace!(%id, "Playback chunk ended.");
                    }
                }
            }
        }

        debug!("Session manager dropped; driver exiting.");
    }

    fn handle_command(&mut self, command: Command, setup_tx: &mpsc::Sender<Setup>) {
        match command {
            Command::Start(reply) => self.begin(reply, setup_tx),
            Command::Stop(ack) => {
                self.stop();
                let _ = ack.send(());
            }
            Command::SendImage(blob, reply) => {
                let result = match self.state {
                    SessionState::Idle => Err(SessionError::NotStarted),
                    _ => {
                        info!(mime_type = %blob.mime_type, bytes = blob.data.len(), "Sending image attachment.");
                        self.dispatch(RealtimeInput::Image(blob));
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }
        }
    }

    fn begin(&mut self, reply: oneshot::Sender<Result<()>>, setup_tx: &mpsc::Sender<Setup>) {
        if matches!(self.state, SessionState::Connecting | SessionState::Active) {
            let _ = reply.send(Err(SessionError::AlreadyActive));
            return;
        }

        self.attempt += 1;
        self.queued.clear();
        self.scheduler.reset();
        self.transcript.clear();
        self.transcript_tx.send_replace(self.transcript.clone());
        self.start_reply = Some(reply);
        self.set_state(SessionState::Connecting, None);
        info!(attempt = self.attempt, model = %self.config.model, "Starting live session.");

        let attempt = self.attempt;
        let config = self.config.clone();
        let connector = self.connector.clone();
        let microphone = self.microphone.clone();
        let setup_tx = setup_tx.clone();
        tokio::spawn(async move {
            let capture = microphone.open().await;
            let granted = capture.is_ok();
            if setup_tx.send(Setup::Microphone(attempt, capture)).await.is_err() || !granted {
                return;
            }
            let connection = connector.connect(&config).await;
            let _ = setup_tx.send(Setup::Connection(attempt, connection)).await;
        });
    }

    fn handle_setup(&mut self, setup: Setup) {
        let (attempt, current) = match &setup {
            Setup::Microphone(attempt, _) | Setup::Connection(attempt, _) => {
                (*attempt, *attempt == self.attempt && self.state == SessionState::Connecting)
            }
        };

        match setup {
            Setup::Microphone(_, Ok(capture)) => {
                if current {
                    debug!(attempt, "Microphone open; capturing.");
                    self.capture = Some(capture);
                }
            }
            Setup::Connection(_, Ok(connection)) => {
                if !current {
                    // Dropping the connection closes it before anything is sent.
                    debug!(attempt, "Discarding connection that opened after stop.");
                    return;
                }
                self.open(connection);
            }
            Setup::Microphone(_, Err(e)) | Setup::Connection(_, Err(e)) => {
                if current {
                    error!(attempt, error = %e, "Live session setup failed.");
                    self.fail(e);
                } else {
                    debug!(attempt, error = %e, "Ignoring setup failure from an abandoned attempt.");
                }
            }
        }
    }

    fn open(&mut self, connection: LiveConnection) {
        let LiveConnection { sender, events } = connection;
        self.sender = Some(sender);
        self.events = Some(events);
        self.set_state(SessionState::Active, None);
        info!(queued = self.queued.len(), "Live session active.");

        while let Some(input) = self.queued.pop_front() {
            self.forward(input);
        }
        if let Some(reply) = self.start_reply.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn handle_capture(&mut self, frame: Vec<f32>) {
        let blob = Blob {
            mime_type: CAPTURE_MIME_TYPE.to_string(),
            data: audio::encode_pcm16_base64(&frame),
        };
        self.dispatch(RealtimeInput::Audio(blob));
    }

    /// Routes an input according to the lifecycle: queue while connecting,
    /// send while active, drop otherwise.
    fn dispatch(&mut self, input: RealtimeInput) {
        match self.state {
            SessionState::Connecting => {
                if matches!(input, RealtimeInput::Audio(_)) {
                    let queued_audio = self
                        .queued
                        .iter()
                        .filter(|i| matches!(i, RealtimeInput::Audio(_)))
                        .count();
                    if queued_audio >= MAX_QUEUED_AUDIO_FRAMES {
                        if let Some(pos) = self
                            .queued
                            .iter()
                            .position(|i| matches!(i, RealtimeInput::Audio(_)))
                        {
                            self.queued.remove(pos);
                        }
                    }
                }
                self.queued.push_back(input);
            }
            SessionState::Active => self.forward(input),
            SessionState::Idle | SessionState::Closed => {
                debug!("Dropping input sent while the session is not running.");
            }
        }
    }

    /// Best-effort send. The driver never waits on the provider, so a stuck
    /// remote cannot hold up `stop()` or interruptions.
    fn forward(&mut self, input: RealtimeInput) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(input) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Live stream is not draining input; input dropped.");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Live stream already closed; input dropped.");
            }
        }
    }

    fn handle_live_event(&mut self, event: LiveEvent, ended_tx: &mpsc::UnboundedSender<PlaybackId>) {
        match event {
            LiveEvent::Server(ServerEvent::AudioChunk { data }) => self.play(&data, ended_tx),
            LiveEvent::Server(ServerEvent::Interruption) => {
                let cut = self.scheduler.interrupt();
                info!(stopped = cut.len(), "Model interrupted; cutting playback.");
                for id in cut {
                    self.output.stop(id);
                }
            }
            LiveEvent::Server(ServerEvent::TranscriptFragment(text)) => {
                self.transcript.push(&text);
                self.transcript_tx.send_replace(self.transcript.clone());
            }
            LiveEvent::Server(ServerEvent::TurnComplete) => debug!("Model turn complete."),
            LiveEvent::Server(ServerEvent::Unknown) => trace!("Ignoring unrecognised server message."),
            LiveEvent::Closed { reason } => {
                info!(?reason, "Remote closed the live stream.");
                self.close(None);
            }
            LiveEvent::Error(message) => {
                error!(%message, "Live stream failed.");
                self.close(Some(SessionError::Connection(message).to_string()));
            }
        }
    }

    fn play(&mut self, data: &str, ended_tx: &mpsc::UnboundedSender<PlaybackId>) {
        let buffer = match audio::decode_playback_chunk(data) {
            Ok(buffer) => buffer,
            Err(e) => {
                let e = SessionError::from(e);
                warn!(error = %e, "Dropping malformed audio chunk.");
                return;
            }
        };
        if buffer.is_empty() {
            return;
        }

        let now = self.output.current_time();
        let chunk = self.scheduler.schedule(now, buffer.duration());
        trace!(id = %chunk.id, start_at = chunk.start_at, duration = chunk.duration, "Scheduled playback chunk.");
        self.output
            .schedule(chunk.id, buffer, chunk.start_at, ended_tx.clone());
    }

    fn stop(&mut self) {
        match self.state {
            SessionState::Connecting | SessionState::Active => {
                info!(state = %self.state, "Stopping live session.");
                self.close(None);
            }
            SessionState::Idle | SessionState::Closed => debug!("Stop ignored; no session running."),
        }
    }

    fn fail(&mut self, error: SessionError) {
        let reply = self.start_reply.take();
        self.close(Some(error.to_string()));
        if let Some(reply) = reply {
            let _ = reply.send(Err(error));
        }
    }

    /// Tears the session down. Dropping the sender requests the remote close;
    /// dropping the capture receiver halts the microphone.
    fn close(&mut self, error: Option<String>) {
        self.sender = None;
        self.events = None;
        self.capture = None;
        self.queued.clear();
        self.scheduler.reset();
        self.set_state(SessionState::Closed, error.clone());

        if let Some(reply) = self.start_reply.take() {
            let failure = match error {
                Some(message) => SessionError::Connection(message),
                None => SessionError::Stopped,
            };
            let _ = reply.send(Err(failure));
        }
    }

    fn set_state(&mut self, state: SessionState, error: Option<String>) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Session state changed.");
        }
        self.state = state;
        self.status_tx.send_replace(SessionStatus { state, error });
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
