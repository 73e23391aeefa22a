//! Gemini Live provider for the realtime audio session.
//!
//! Implements [`sidama_core::LiveConnector`] over the `BidiGenerateContent`
//! WebSocket: it performs the setup handshake, serialises realtime input and
//! decodes server content into [`sidama_core::ServerEvent`]s.

pub mod client;
pub mod error;
pub mod types;

pub use client::{GEMINI_LIVE_URL, GeminiLiveConnector};
pub use error::{Error, Result};
