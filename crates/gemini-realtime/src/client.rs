//! WebSocket connector for the Gemini Live API.

use crate::{
    error::{Error, Result},
    types::{BidiGenerateContentSetup, ClientMessage, ServerMessage},
};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use sidama_core::{LiveConnection, LiveConnector, LiveEvent, LiveSessionConfig, RealtimeInput};
use std::fmt;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

/// Production endpoint of the Gemini Live API.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const CHANNEL_CAPACITY: usize = 128;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens Gemini Live sessions with an injected API key.
#[derive(Clone)]
pub struct GeminiLiveConnector {
    api_key: String,
    endpoint: String,
}

impl fmt::Debug for GeminiLiveConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiLiveConnector")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl GeminiLiveConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: GEMINI_LIVE_URL.to_string(),
        }
    }

    /// Points the connector at another endpoint, e.g. a regional proxy.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }

    /// Connects, performs the setup handshake and spawns the I/O tasks.
    pub async fn open(&self, config: &LiveSessionConfig) -> Result<LiveConnection> {
        let (ws_stream, _) = connect_async(self.url()).await?;
        info!(endpoint = %self.endpoint, "Connected to Gemini Live WebSocket.");
        let (mut gemini_tx, mut gemini_rx) = ws_stream.split();

        let setup = ClientMessage::Setup(BidiGenerateContentSetup::from(config));
        gemini_tx
            .send(WsMessage::Text(serde_json::to_string(&setup)?.into()))
            .await?;
        wait_for_setup_complete(&mut gemini_rx).await?;
        info!(model = %config.model, "Gemini session setup is complete.");

        let (input_tx, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(write_loop(gemini_tx, input_rx));
        tokio::spawn(read_loop(gemini_rx, event_tx));

        Ok(LiveConnection {
            sender: input_tx,
            events: event_rx,
        })
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, config: &LiveSessionConfig) -> sidama_core::Result<LiveConnection> {
        self.open(config).await.map_err(|e| {
            error!(error = %e, "Failed to open Gemini Live session.");
            e.into()
        })
    }
}

async fn wait_for_setup_complete(gemini_rx: &mut SplitStream<WsStream>) -> Result<()> {
    while let Some(frame) = gemini_rx.next().await {
        let payload = match frame? {
            WsMessage::Text(text) => text.as_bytes().to_vec(),
            WsMessage::Binary(bytes) => bytes.to_vec(),
            WsMessage::Close(close_frame) => {
                return Err(Error::ClosedDuringSetup(close_reason(close_frame.as_ref())));
            }
            _ => continue,
        };
        match ServerMessage::parse(&payload) {
            Ok(msg) if msg.setup_complete.is_some() => return Ok(()),
            Ok(msg) => warn!(?msg, "Received unexpected message during Gemini setup."),
            Err(e) => warn!(error = %e, "Failed to parse Gemini message during setup."),
        }
    }
    Err(Error::ClosedDuringSetup("stream ended".to_string()))
}

/// Serialises realtime input until the session drops its sender, then closes.
async fn write_loop(
    mut gemini_tx: SplitSink<WsStream, WsMessage>,
    mut inputs: mpsc::Receiver<RealtimeInput>,
) {
    while let Some(input) = inputs.recv().await {
        let payload = match serde_json::to_string(&ClientMessage::from(input)) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialise realtime input.");
                continue;
            }
        };
        if let Err(e) = gemini_tx.send(WsMessage::Text(payload.into())).await {
            warn!(error = %e, "Dropping realtime input; Gemini stream is gone.");
            return;
        }
    }

    debug!("Input channel closed; closing Gemini stream.");
    if let Err(e) = gemini_tx.send(WsMessage::Close(None)).await {
        debug!(error = %e, "Close frame not delivered.");
    }
}

/// Decodes server frames into live events, in arrival order.
async fn read_loop(mut gemini_rx: SplitStream<WsStream>, events: mpsc::Sender<LiveEvent>) {
    while let Some(frame) = gemini_rx.next().await {
        let payload = match frame {
            Ok(WsMessage::Text(text)) => text.as_bytes().to_vec(),
            Ok(WsMessage::Binary(bytes)) => bytes.to_vec(),
            Ok(WsMessage::Close(close_frame)) => {
                let reason = close_frame.as_ref().map(|f| f.reason.to_string());
                info!(?reason, "Gemini WebSocket connection closed by server.");
                let _ = events.send(LiveEvent::Closed { reason }).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                error!(error = %e, "Error reading from Gemini WebSocket.");
                let _ = events.send(LiveEvent::Error(e.to_string())).await;
                return;
            }
        };

        let msg = match ServerMessage::parse(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Skipping unparseable Gemini message.");
                continue;
            }
        };
        if let Some(go_away) = &msg.go_away {
            warn!(time_left = ?go_away.time_left, "Gemini announced an upcoming disconnect.");
        }
        for event in msg.into_events() {
            if events.send(LiveEvent::Server(event)).await.is_err() {
                debug!("Session stopped listening; ending Gemini reader.");
                return;
            }
        }
    }
    let _ = events.send(LiveEvent::Closed { reason: None }).await;
}

fn close_reason(close_frame: Option<&CloseFrame>) -> String {
    close_frame
        .map(|f| format!("{} {}", u16::from(f.code), f.reason))
        .unwrap_or_else(|| "no close frame".to_string())
}
