//! Advisory record of who has joined each conversation
//!
//! Participant lists come from the joining client, which already got them
//! from the message store. Joins only ever add members; leaving a conversation
//! unsubscribes the connection from its group but keeps the membership.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::types::{ConversationId, UserId};

#[derive(Default)]
pub struct ConversationMembership {
    conversations: RwLock<HashMap<ConversationId, HashSet<UserId>>>,
}

impl ConversationMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `participants` into the conversation's member set
    pub fn join<I>(&self, conversation: ConversationId, participants: I)
    where
        I: IntoIterator<Item = UserId>,
    {
        self.conversations
            .write()
            .entry(conversation)
            .or_default()
            .extend(participants);
    }

    /// Members of `conversation`; empty when nobody joined it yet.
    pub fn members_of(&self, conversation: ConversationId) -> HashSet<UserId> {
        self.conversations
            .read()
            .get(&conversation)
            .cloned()
            .unwrap_or_default()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.read().len()
    }
}
