//! Message store seam
//!
//! Persistence is owned by an external service; the routing layer only needs
//! to look up conversations and append messages. [`InMemoryMessageStore`]
//! backs the development binary and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::config::HubConfig;
use crate::error::{StoreError, StoreResult};
use crate::types::{ChatMessage, Conversation, ConversationId, MessageId, Participant, UserId};

/// A message about to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: UserId,
    /// Target conversation; `None` asks the store to open a new one with `recipient`
    pub conversation_id: Option<ConversationId>,
    pub recipient: Option<UserId>,
    pub body: String,
}

/// Result of a successful append
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedMessage {
    pub message: ChatMessage,
    pub conversation: Conversation,
    /// True when the append opened a new conversation
    pub created_conversation: bool,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Conversations that include `user`, most recently active first
    async fn conversations_for(&self, user: UserId) -> StoreResult<Vec<Conversation>>;

    /// Persist a message, creating the conversation when none is given
    async fn append_message(&self, message: NewMessage) -> StoreResult<PersistedMessage>;
}

#[derive(Default)]
struct StoreState {
    roles: HashMap<UserId, String>,
    /// Role given to users seen for the first time; `None` rejects them
    default_role: Option<String>,
    conversations: Vec<Conversation>,
    activity: HashMap<ConversationId, u64>,
    messages: Vec<ChatMessage>,
    clock: u64,
    next_conversation_id: i64,
    next_message_id: i64,
}

impl StoreState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn participant(&mut self, user: UserId) -> StoreResult<Participant> {
        if let Some(role) = self.roles.get(&user) {
            return Ok(Participant::new(user, role.clone()));
        }
        let role = self
            .default_role
            .clone()
            .ok_or(StoreError::UserNotFound(user.0))?;
        self.roles.insert(user, role.clone());
        Ok(Participant::new(user, role))
    }
}

/// Process-local store with users, conversations and messages
#[derive(Default)]
pub struct InMemoryMessageStore {
    state: Mutex<StoreState>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store used by the development binary: seeded from `CHAT_HUB_DEV_USERS`,
    /// everyone else is admitted as a customer
    pub fn development(config: &HubConfig) -> Self {
        let store = Self::new().with_default_role("customer");
        for (user, role) in &config.dev_users {
            store.add_user(*user, role);
        }
        store
    }

    /// Admit unknown users under `role` instead of failing with `UserNotFound`
    pub fn with_default_role(self, role: &str) -> Self {
        self.state.lock().default_role = Some(role.to_string());
        self
    }

    /// Make a user known to the store under `role`
    pub fn add_user(&self, user: UserId, role: &str) {
        self.state.lock().roles.insert(user, role.to_string());
    }

    /// Open a conversation between known users
    pub fn create_conversation(&self, participants: &[UserId]) -> StoreResult<Conversation> {
        let mut state = self.state.lock();
        let participants = participants
            .iter()
            .map(|user| state.participant(*user))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(open_conversation(&mut state, participants))
    }

    pub fn messages_in(&self, conversation: ConversationId) -> Vec<ChatMessage> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation)
            .cloned()
            .collect()
    }
}

fn open_conversation(state: &mut StoreState, participants: Vec<Participant>) -> Conversation {
    state.next_conversation_id += 1;
    let conversation = Conversation {
        id: ConversationId(state.next_conversation_id),
        participants,
        created_at: Utc::now(),
    };
    let stamp = state.tick();
    state.activity.insert(conversation.id, stamp);
    state.conversations.push(conversation.clone());
    conversation
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn conversations_for(&self, user: UserId) -> StoreResult<Vec<Conversation>> {
        let state = self.state.lock();
        let mut found: Vec<_> = state
            .conversations
            .iter()
            .filter(|c| c.includes(user))
            .cloned()
            .collect();
        found.sort_by_key(|c| std::cmp::Reverse(state.activity.get(&c.id).copied().unwrap_or(0)));
        Ok(found)
    }

    async fn append_message(&self, message: NewMessage) -> StoreResult<PersistedMessage> {
        let mut state = self.state.lock();

        let (conversation, created_conversation) = match message.conversation_id {
            Some(id) => {
                let conversation = state
                    .conversations
                    .iter()
                    .find(|c| c.id == id)
                    .cloned()
                    .ok_or(StoreError::ConversationNotFound(id.0))?;
                if !conversation.includes(message.sender) {
                    return Err(StoreError::NotParticipant {
                        user: message.sender.0,
                        conversation: id.0,
                    });
                }
                (conversation, false)
            }
            None => {
                let recipient = message
                    .recipient
                    .ok_or_else(|| StoreError::Unavailable("recipient required".to_string()))?;
                let participants = vec![
                    state.participant(message.sender)?,
                    state.participant(recipient)?,
                ];
                (open_conversation(&mut state, participants), true)
            }
        };

        state.next_message_id += 1;
        let stored = ChatMessage {
            id: MessageId(state.next_message_id),
            conversation_id: conversation.id,
            sender_id: message.sender,
            body: message.body,
            sent_at: Utc::now(),
        };
        let stamp = state.tick();
        state.activity.insert(conversation.id, stamp);
        state.messages.push(stored.clone());

        Ok(PersistedMessage {
            message: stored,
            conversation,
            created_conversation,
        })
    }
}
