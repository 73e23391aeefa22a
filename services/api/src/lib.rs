//! Sidama Live API Library Crate
//!
//! The web service that hosts live guide sessions for browsers: configuration,
//! shared state, routing and the WebSocket glue. The `api` binary is a thin
//! wrapper around this library.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;
