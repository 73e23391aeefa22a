//! Manages the WebSocket connection lifecycle for a live guide session.

use super::{
    devices::{SocketAudioOutput, SocketMicrophone},
    protocol::{ClientMessage, ServerMessage},
};
use crate::state::AppState;
use anyhow::{Context, Result};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use futures_util::{Sink, SinkExt, StreamExt, stream::SplitStream};
use sidama_core::{SessionManager, SessionStatus, TRANSCRIPT_WINDOW_WORDS, Transcript};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{Instrument, debug, error, info, instrument, warn};

/// How long teardown waits for queued frames to reach the client.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Each connection gets its own `SessionManager`, microphone and speaker.
/// Outgoing messages from every producer go through one writer task.
#[instrument(name = "ws_session", skip_all, fields(connection_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: u32 = rand::random();
    tracing::Span::current().record("connection_id", connection_id);
    info!("New WebSocket connection.");

    let (socket_tx, socket_rx) = socket.split();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_outgoing(socket_tx, outgoing_rx).in_current_span());

    let microphone = match SocketMicrophone::new() {
        Ok(microphone) => Arc::new(microphone),
        Err(e) => {
            error!(error = %e, "Failed to create socket microphone.");
            let _ = outgoing_tx.send(ServerMessage::Error {
                message: e.to_string(),
            });
            drop(outgoing_tx);
            let _ = writer.await;
            return;
        }
    };
    let output = Arc::new(SocketAudioOutput::new(outgoing_tx.clone()));
    let manager = Arc::new(SessionManager::new(
        state.session_config.as_ref().clone(),
        state.connector.clone(),
        microphone.clone(),
        output,
    ));

    let forwarder = tokio::spawn(
        forward_updates(
            manager.subscribe_status(),
            manager.subscribe_transcript(),
            outgoing_tx.clone(),
        )
        .in_current_span(),
    );

    if let Err(e) = run_socket(socket_rx, &manager, &microphone, &outgoing_tx).await {
        error!(error = ?e, "WebSocket session terminated with error.");
    }

    shutdown(manager, outgoing_tx, forwarder, writer).await;
    info!("WebSocket session finished.");
}

/// Stops the session, then lets the forwarder and writer drain so the final
/// status still reaches the client. Returns the writer's result.
async fn shutdown<T>(
    manager: Arc<SessionManager>,
    outgoing: mpsc::UnboundedSender<ServerMessage>,
    mut forwarder: JoinHandle<()>,
    mut writer: JoinHandle<T>,
) -> Option<T> {
    manager.stop().await;
    // The driver, and the speaker it owns, go away with the last handle.
    drop(manager);
    drop(outgoing);

    if timeout(SHUTDOWN_GRACE, &mut forwarder).await.is_err() {
        debug!("Status forwarder did not finish; aborting.");
        forwarder.abort();
    }
    match timeout(SHUTDOWN_GRACE, &mut writer).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            debug!(error = %e, "Client writer task failed.");
            None
        }
        Err(_) => {
            debug!("Client writer did not drain; aborting.");
            writer.abort();
            None
        }
    }
}

/// Reads client messages until the socket closes.
async fn run_socket(
    mut socket_rx: SplitStream<WebSocket>,
    manager: &Arc<SessionManager>,
    microphone: &SocketMicrophone,
    outgoing: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<()> {
    while let Some(msg) = socket_rx.next().await {
        match msg.context("Error receiving from client WebSocket")? {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(msg, manager, microphone, outgoing).await,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed client message.");
                    report(outgoing, format!("Malformed message: {e}"));
                }
            },
            Message::Binary(bytes) => {
                if let Err(e) = microphone.push_pcm16(&bytes) {
                    warn!(error = %e, "Dropping malformed microphone frame.");
                }
            }
            Message::Close(_) => {
                info!("Client closed the connection.");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    Ok(())
}

async fn handle_client_message(
    msg: ClientMessage,
    manager: &Arc<SessionManager>,
    microphone: &SocketMicrophone,
    outgoing: &mpsc::UnboundedSender<ServerMessage>,
) {
    match msg {
        ClientMessage::Start {
            sample_rate,
            microphone: granted,
        } => {
            info!(sample_rate, granted, "Client requested a live session.");
            if let Err(e) = microphone.configure(granted, sample_rate) {
                error!(error = %e, "Unsupported microphone format.");
                report(outgoing, e.to_string());
                return;
            }
            // `start` resolves only once the model is ready; keep reading the
            // socket meanwhile so `stop` and images are not held up.
            let manager = manager.clone();
            let outgoing = outgoing.clone();
            tokio::spawn(
                async move {
                    if let Err(e) = manager.start().await {
                        warn!(error = %e, "Live session did not start.");
                        report(&outgoing, e.to_string());
                    }
                }
                .in_current_span(),
            );
        }
        ClientMessage::Stop => {
            info!("Client requested stop.");
            manager.stop().await;
        }
        ClientMessage::Image { data, mime_type } => {
            let bytes = match BASE64_STANDARD.decode(data.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Image payload is not valid base64.");
                    report(outgoing, format!("Invalid image data: {e}"));
                    return;
                }
            };
            debug!(%mime_type, size = bytes.len(), "Forwarding image.");
            if let Err(e) = manager.send_image(&bytes, &mime_type).await {
                report(outgoing, e.to_string());
            }
        }
    }
}

/// Mirrors status and transcript changes to the client.
async fn forward_updates(
    mut status: watch::Receiver<SessionStatus>,
    mut transcript: watch::Receiver<Transcript>,
    outgoing: mpsc::UnboundedSender<ServerMessage>,
) {
    let initial = status.borrow_and_update().clone();
    if outgoing.send(initial.into()).is_err() {
        return;
    }
    loop {
        let msg = tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                ServerMessage::from(status.borrow_and_update().clone())
            }
            changed = transcript.changed() => {
                if changed.is_err() {
                    break;
                }
                ServerMessage::Transcript {
                    text: transcript.borrow_and_update().window(TRANSCRIPT_WINDOW_WORDS),
                }
            }
        };
        if outgoing.send(msg).is_err() {
            break;
        }
    }
}

/// Drains the outgoing queue into the socket until every sender is gone.
async fn write_outgoing<S>(mut sink: S, mut outgoing: mpsc::UnboundedReceiver<ServerMessage>) -> S
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    while let Some(msg) = outgoing.recv().await {
        if let Err(e) = send_msg(&mut sink, msg).await {
            debug!(error = ?e, "Client socket is gone; stopping writer.");
            break;
        }
    }
    sink
}

fn report(outgoing: &mpsc::UnboundedSender<ServerMessage>, message: String) {
    let _ = outgoing.send(ServerMessage::Error { message });
}

/// Helper to serialize and send a message to the client.
async fn send_msg<S>(sink: &mut S, msg: ServerMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(&msg)?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use sidama_core::{LiveConnection, LiveConnector, LiveSessionConfig, SessionError};

    struct RefusingConnector;

    #[async_trait]
    impl LiveConnector for RefusingConnector {
        async fn connect(&self, _config: &LiveSessionConfig) -> sidama_core::Result<LiveConnection> {
            Err(SessionError::Connection("refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queued_frames() {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(SessionManager::new(
            LiveSessionConfig::default(),
            Arc::new(RefusingConnector),
            Arc::new(SocketMicrophone::new().unwrap()),
            Arc::new(SocketAudioOutput::new(outgoing_tx.clone())),
        ));
        let forwarder = tokio::spawn(forward_updates(
            manager.subscribe_status(),
            manager.subscribe_transcript(),
            outgoing_tx.clone(),
        ));
        let writer = tokio::spawn(write_outgoing(Vec::<Message>::new(), outgoing_rx));

        report(&outgoing_tx, "last words".to_string());
        let sent = shutdown(manager, outgoing_tx, forwarder, writer)
            .await
            .expect("writer drained");

        let frames: Vec<Value> = sent
            .iter()
            .map(|msg| match msg {
                Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        assert!(frames.contains(&json!({ "type": "status", "state": "idle", "error": null })));
        assert!(frames.contains(&json!({ "type": "error", "message": "last words" })));
    }
}
