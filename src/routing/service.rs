//! Message routing: turn a send intent into a persisted message plus a live delivery attempt
//!
//! Persistence is the contract. Live delivery happens after the store
//! accepted the message and its outcome never changes the result returned
//! to the sender.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::lookup::find_shared_conversation;
use super::store::{MessageStore, NewMessage, PersistedMessage};
use crate::error::{RoutingError, RoutingResult};
use crate::hub::BroadcastHub;
use crate::types::{
    ChatMessage, ConversationId, NewConversationPayload, SendMessageRequest, ServerEvent, UserId,
};

pub struct MessageRoutingService {
    store: Arc<dyn MessageStore>,
    hub: Arc<BroadcastHub>,
    staff_role: String,
}

/// A validated request
struct Target {
    conversation_id: Option<ConversationId>,
    recipient: Option<UserId>,
    body: String,
}

impl MessageRoutingService {
    pub fn new(store: Arc<dyn MessageStore>, hub: Arc<BroadcastHub>, staff_role: &str) -> Self {
        Self {
            store,
            hub,
            staff_role: staff_role.to_string(),
        }
    }

    /// Persist a message from `sender` and push it to the conversation's live subscribers.
    ///
    /// Unauthenticated senders and malformed requests are rejected before the
    /// store is touched; store errors are returned unchanged.
    pub async fn send_message(
        &self,
        sender: Option<UserId>,
        request: SendMessageRequest,
    ) -> RoutingResult<ChatMessage> {
        let sender = sender.ok_or(RoutingError::Unauthenticated)?;
        let target = validate(sender, request)?;

        let conversation_id = match (target.conversation_id, target.recipient) {
            (Some(id), _) => Some(id),
            (None, Some(recipient)) => self.resolve_conversation(sender, recipient).await?,
            (None, None) => None,
        };

        let persisted = self
            .store
            .append_message(NewMessage {
                sender,
                conversation_id,
                recipient: target.recipient,
                body: target.body,
            })
            .await?;

        info!(
            message_id = persisted.message.id.0,
            conversation_id = %persisted.conversation.id,
            sender_id = %sender,
            created_conversation = persisted.created_conversation,
            "message persisted"
        );

        self.deliver(&persisted);
        Ok(persisted.message)
    }

    /// Existing support conversation between the two parties, if any
    async fn resolve_conversation(
        &self,
        sender: UserId,
        recipient: UserId,
    ) -> RoutingResult<Option<ConversationId>> {
        let candidates = self.store.conversations_for(sender).await?;
        let found = find_shared_conversation(&candidates, sender, recipient, &self.staff_role);
        debug!(
            sender_id = %sender,
            recipient_id = %recipient,
            conversation_id = ?found,
            "resolved conversation from recipient hint"
        );
        Ok(found)
    }

    fn deliver(&self, persisted: &PersistedMessage) {
        let conversation = persisted.conversation.id;
        let mut report = self.hub.send_to_conversation(
            conversation,
            &ServerEvent::ReceiveMessage(persisted.message.clone()),
        );

        if persisted.created_conversation {
            // Nobody is subscribed to a brand-new group yet; reach participants directly.
            let event = ServerEvent::NewConversation(NewConversationPayload {
                conversation: persisted.conversation.clone(),
                message: persisted.message.clone(),
            });
            for user in persisted.conversation.participant_ids() {
                if user != persisted.message.sender_id {
                    report = report.merge(self.hub.send_to_user(user, &event));
                }
            }
        }

        if report.failed > 0 {
            warn!(
                %conversation,
                failed = report.failed,
                delivered = report.delivered,
                "live delivery partially failed"
            );
        }
    }
}

fn validate(sender: UserId, request: SendMessageRequest) -> RoutingResult<Target> {
    let body = request
        .body
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| RoutingError::MalformedRequest("body is required".to_string()))?;

    if request.conversation_id.is_none() && request.recipient_id.is_none() {
        return Err(RoutingError::MalformedRequest(
            "conversationId or recipientId is required".to_string(),
        ));
    }
    if request.conversation_id.is_none() && request.recipient_id == Some(sender) {
        return Err(RoutingError::MalformedRequest(
            "cannot open a conversation with yourself".to_string(),
        ));
    }

    Ok(Target {
        conversation_id: request.conversation_id,
        recipient: request.recipient_id,
        body,
    })
}
