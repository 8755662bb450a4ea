//! Error types for every layer of the hub
//!
//! Fan-out never produces errors for callers (see [`crate::hub::DeliveryReport`]);
//! the enums below cover identity resolution, persistence, routing, the client
//! supervisor and configuration.

use thiserror::Error;

/// Bearer-token validation failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Token error: {0}")]
    TokenError(String),
    #[error("Token subject is not a numeric user id: {0}")]
    InvalidSubject(String),
    #[error("Invalid secret: {0}")]
    InvalidSecret(String),
}

/// Errors raised by the external message store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Conversation {0} not found")]
    ConversationNotFound(i64),
    #[error("User {0} not found")]
    UserNotFound(i64),
    #[error("User {user} is not a participant of conversation {conversation}")]
    NotParticipant { user: i64, conversation: i64 },
    #[error("Message store unavailable: {0}")]
    Unavailable(String),
}

/// Failures surfaced by the message routing service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Sender could not be authenticated")]
    Unauthenticated,
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Client-side connection failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("No auth credential available")]
    MissingCredential,
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Gave up after {attempts} connection attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("Disconnected")]
    Disconnected,
    #[error("Supervisor task has stopped")]
    SupervisorStopped,
}

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

pub type RoutingResult<T> = Result<T, RoutingError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type ClientResult<T> = Result<T, ClientError>;

/// Startup and serving failures of the hub binary
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
