//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the shared,
//! clonable resources every connection needs.

use sidama_core::{LiveConnector, LiveSessionConfig};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub connector: Arc<dyn LiveConnector>,
    pub session_config: Arc<LiveSessionConfig>,
}
