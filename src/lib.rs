//! Sidama Live
//!
//! Realtime voice guide for the Sidama site: a session manager that streams
//! microphone audio to Gemini Live and plays the spoken answers back.
//!
//! - [`core`]: the provider-agnostic session manager, audio codec and
//!   playback scheduler.
//! - [`gemini`]: the Gemini Live WebSocket provider.

pub use gemini_realtime as gemini;
pub use sidama_core as core;

use gemini_realtime::GeminiLiveConnector;
use sidama_core::{AudioOutput, LiveSessionConfig, Microphone, SessionManager};
use std::sync::Arc;
use tracing::info;

/// Builds a session manager wired to Gemini Live.
///
/// `endpoint` overrides the production URL when set. Must be called inside a
/// Tokio runtime.
pub fn connect_gemini_session(
    api_key: impl Into<String>,
    endpoint: Option<String>,
    config: LiveSessionConfig,
    microphone: Arc<dyn Microphone>,
    output: Arc<dyn AudioOutput>,
) -> SessionManager {
    let mut connector = GeminiLiveConnector::new(api_key);
    if let Some(endpoint) = endpoint {
        connector = connector.with_endpoint(endpoint);
    }
    info!(?connector, model = %config.model, "Creating Gemini live session manager.");
    SessionManager::new(config, Arc::new(connector), microphone, output)
}
