//! Wire frames exchanged over the hub connection
//!
//! Both directions are JSON text frames. Server events use
//! `{"type": "...", "payload": ...}`; client invocations are flat objects
//! tagged by `type`.

use serde::{Deserialize, Serialize};

use super::ids::{ConnectionId, ConversationId, UserId};
use super::message::{ChatMessage, Conversation};

/// Events pushed from the hub to connected clients
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    /// Sent once right after the connection is accepted
    Connected(Welcome),

    /// A persisted message for a conversation the client displays
    ReceiveMessage(ChatMessage),

    /// Someone else in the conversation started typing
    UserTyping(TypingPayload),

    /// Someone else in the conversation stopped typing
    UserStoppedTyping(TypingPayload),

    /// A conversation was created that includes the recipient
    NewConversation(NewConversationPayload),

    /// Business notification routed to a user (approvals, payouts, ...)
    ReceiveNotification(serde_json::Value),

    /// Reply to a client `Ping`
    Pong,

    /// The last invocation could not be processed
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Event name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "Connected",
            ServerEvent::ReceiveMessage(_) => "ReceiveMessage",
            ServerEvent::UserTyping(_) => "UserTyping",
            ServerEvent::UserStoppedTyping(_) => "UserStoppedTyping",
            ServerEvent::NewConversation(_) => "NewConversation",
            ServerEvent::ReceiveNotification(_) => "ReceiveNotification",
            ServerEvent::Pong => "Pong",
            ServerEvent::Error(_) => "Error",
        }
    }
}

/// Welcome frame contents
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub connection_id: ConnectionId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<UserId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: ConversationId,
    pub user_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversationPayload {
    pub conversation: Conversation,
    pub message: ChatMessage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Operations a connected client invokes on the hub
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientInvocation {
    JoinConversation {
        conversation_id: ConversationId,
        #[serde(default)]
        participant_ids: Vec<UserId>,
    },
    LeaveConversation {
        conversation_id: ConversationId,
    },
    UserTyping {
        conversation_id: ConversationId,
        display_name: String,
    },
    UserStoppedTyping {
        conversation_id: ConversationId,
        display_name: String,
    },
    Ping,
}
