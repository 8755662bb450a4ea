//! API module for HTTP and WebSocket endpoints
//!
//! The hub connection endpoint, the send-message endpoint and operational routes.

pub mod auth;
pub mod http;
pub mod rest;
pub mod websocket;

pub use auth::IdentityResolver;
pub use http::create_router;
pub use websocket::AppState;
