//! Chat Hub
//!
//! Real-time transport for the marketplace's support chat: a server-side
//! broadcast hub that tracks who is connected and which conversations they
//! display, a routing service that persists messages before delivering them
//! live, and a client-side connection supervisor that keeps one connection
//! per session alive across network blips.
//!
//! # Modules
//!
//! - `types`: Identities, chat records and wire frames
//! - `hub`: Connection registry, conversation membership, group fan-out
//! - `routing`: Send-message pipeline and the message store seam
//! - `client`: Connection supervisor, backoff and event subscriptions
//! - `api`: Axum endpoints (hub WebSocket, send-message, stats)
//! - `server`: Server lifecycle
//! - `config`, `logging`, `error`: Ambient plumbing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chat_hub::config::HubConfig;
//! use chat_hub::routing::InMemoryMessageStore;
//! use chat_hub::server::HubServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chat_hub::error::ServerError> {
//!     let config = HubConfig::from_env()?;
//!     let store = InMemoryMessageStore::development(&config);
//!     let server = HubServer::new(config, Arc::new(store))?;
//!     server.run().await
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod routing;
pub mod server;
pub mod types;

// Re-export commonly used items at crate root
pub use client::{ConnectionSupervisor, SupervisorState};
pub use hub::{BroadcastHub, NotificationSender};
pub use routing::{MessageRoutingService, MessageStore};
pub use server::HubServer;
pub use types::{ChatMessage, ClientInvocation, ConnectionId, ConversationId, ServerEvent, UserId};
