//! Message routing: conversation resolution, persistence and live delivery

pub mod lookup;
pub mod service;
pub mod store;

pub use lookup::{find_shared_conversation, role_matches};
pub use service::MessageRoutingService;
pub use store::{InMemoryMessageStore, MessageStore, NewMessage, PersistedMessage};
