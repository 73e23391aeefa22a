//! WebSocket Session Management
//!
//! Each browser connection hosts one live guide session:
//!
//! - `protocol`: the JSON messages exchanged with the browser.
//! - `session`: the connection lifecycle, from upgrade to teardown.
//! - `devices`: the browser-backed microphone and speaker the session drives.

pub mod devices;
pub mod protocol;
pub mod session;

pub use session::ws_handler;
