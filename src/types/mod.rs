//! Data types for the chat hub
//!
//! Identities, persisted chat records and the frames exchanged over a hub connection.

mod event;
mod ids;
mod message;

pub use event::{
    ClientInvocation, ErrorPayload, NewConversationPayload, ServerEvent, TypingPayload, Welcome,
};
pub use ids::{ConnectionId, ConversationId, GroupLabel, UserId};
pub use message::{ChatMessage, Conversation, MessageId, Participant, SendMessageRequest};
