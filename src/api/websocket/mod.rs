//! WebSocket hub endpoint
//!
//! Provides the persistent connection at `/hub`. Frames are JSON text;
//! see [`crate::types::ServerEvent`] and [`crate::types::ClientInvocation`].

pub mod handler;
pub mod state;

pub use handler::ws_handler;
pub use state::AppState;
