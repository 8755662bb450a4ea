//! Local fan-out of hub events to application handlers
//!
//! Handlers run in registration order on the supervisor task. Each `on_*`
//! call returns a [`Subscription`] whose `unsubscribe` removes exactly that
//! handler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::types::{ChatMessage, ConversationId, NewConversationPayload, ServerEvent};

/// Typing indicator as seen by local subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
    pub conversation_id: ConversationId,
    pub user_name: String,
    pub is_typing: bool,
}

pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct HandlerList<T> {
    handlers: Mutex<Vec<(u64, Handler<T>)>>,
}

impl<T: 'static> HandlerList<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: Mutex::new(Vec::new()),
        })
    }

    fn add(self: &Arc<Self>, id: u64, handler: Handler<T>) -> Subscription {
        self.handlers.lock().push((id, handler));
        let list: Weak<Self> = Arc::downgrade(self);
        Subscription {
            unregister: Some(Box::new(move || {
                if let Some(list) = list.upgrade() {
                    list.handlers.lock().retain(|(hid, _)| *hid != id);
                }
            })),
        }
    }

    fn dispatch(&self, event: &T) -> usize {
        // Snapshot so handlers may (un)subscribe without deadlocking
        let handlers: Vec<Handler<T>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    fn len(&self) -> usize {
        self.handlers.lock().len()
    }
}

/// Handle returned by every `on_*` registration
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    unregister: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

/// Handler registry for the four client-visible event streams
pub struct EventSubscribers {
    next_id: AtomicU64,
    messages: Arc<HandlerList<ChatMessage>>,
    typing: Arc<HandlerList<TypingEvent>>,
    conversations: Arc<HandlerList<NewConversationPayload>>,
    notifications: Arc<HandlerList<serde_json::Value>>,
}

impl Default for EventSubscribers {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscribers {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            messages: HandlerList::new(),
            typing: HandlerList::new(),
            conversations: HandlerList::new(),
            notifications: HandlerList::new(),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.messages.add(self.next_id(), Arc::new(handler))
    }

    pub fn on_typing<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TypingEvent) + Send + Sync + 'static,
    {
        self.typing.add(self.next_id(), Arc::new(handler))
    }

    pub fn on_new_conversation<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&NewConversationPayload) + Send + Sync + 'static,
    {
        self.conversations.add(self.next_id(), Arc::new(handler))
    }

    pub fn on_notification<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.notifications.add(self.next_id(), Arc::new(handler))
    }

    /// Route a server event to the matching handlers; returns how many ran
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        match event {
            ServerEvent::ReceiveMessage(message) => self.messages.dispatch(message),
            ServerEvent::UserTyping(payload) => self.typing.dispatch(&TypingEvent {
                conversation_id: payload.conversation_id,
                user_name: payload.user_name.clone(),
                is_typing: true,
            }),
            ServerEvent::UserStoppedTyping(payload) => self.typing.dispatch(&TypingEvent {
                conversation_id: payload.conversation_id,
                user_name: payload.user_name.clone(),
                is_typing: false,
            }),
            ServerEvent::NewConversation(payload) => self.conversations.dispatch(payload),
            ServerEvent::ReceiveNotification(payload) => self.notifications.dispatch(payload),
            ServerEvent::Connected(_) | ServerEvent::Pong | ServerEvent::Error(_) => 0,
        }
    }

    pub fn handler_count(&self) -> usize {
        self.messages.len() + self.typing.len() + self.conversations.len() + self.notifications.len()
    }
}
