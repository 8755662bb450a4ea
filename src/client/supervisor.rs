//! Client connection supervisor
//!
//! One supervisor per logged-in session owns the single physical hub
//! connection. It runs as an actor task: public methods send commands, the
//! task owns every piece of mutable state (link, pending joins, retry
//! counter) so there is never more than one connection attempt in flight.
//!
//! State machine:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Reconnecting -> Connected
//!              |                          |
//!              +--> Reconnecting -> ... --+--> Failed
//! ```
//!
//! Conversations joined through the supervisor are remembered as pending
//! joins and re-sent after every successful (re)connect.

use std::collections::BTreeMap;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, warn};

use super::backoff::{BackoffStrategy, RetryState};
use super::subscribers::{EventSubscribers, Subscription, TypingEvent};
use super::transport::{HubConnector, HubLink, WsConnector};
use crate::config::SupervisorConfig;
use crate::error::{ClientError, ClientResult};
use crate::types::{
    ChatMessage, ClientInvocation, ConversationId, NewConversationPayload, ServerEvent, UserId,
};

/// Where the auth credential comes from at connect time
pub trait CredentialSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

type Reply = oneshot::Sender<ClientResult<()>>;

enum Command {
    Connect(Reply),
    Join {
        conversation_id: ConversationId,
        participants: Vec<UserId>,
        reply: Reply,
    },
    Leave {
        conversation_id: ConversationId,
        reply: Reply,
    },
    Relay(ClientInvocation),
    Disconnect {
        clear_session: bool,
        reply: Reply,
    },
    PendingJoins(oneshot::Sender<Vec<ConversationId>>),
}

/// Handle to the supervisor task. Cheap to clone; the task stops when the
/// last handle is dropped.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SupervisorState>,
    subscribers: Arc<EventSubscribers>,
}

impl ConnectionSupervisor {
    /// Spawn a supervisor on the current tokio runtime
    pub fn spawn(
        connector: Arc<dyn HubConnector>,
        credentials: Arc<dyn CredentialSource>,
        backoff: Arc<dyn BackoffStrategy>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SupervisorState::Idle);
        let subscribers = Arc::new(EventSubscribers::new());

        let actor = Actor {
            connector,
            credentials,
            backoff,
            subscribers: Arc::clone(&subscribers),
            state: state_tx,
            pending_joins: BTreeMap::new(),
            retry: RetryState::default(),
            link: None,
            inbound: None,
            attempt: None,
            backoff_timer: None,
            waiters: Vec::new(),
        };
        tokio::spawn(actor.run(commands_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
            subscribers,
        }
    }

    /// Supervisor over the WebSocket transport, configured from `CHAT_HUB_*` settings
    pub fn from_config(config: SupervisorConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        let connector = WsConnector::new(config.url).with_inbound_buffer(config.inbound_buffer);
        Self::spawn(Arc::new(connector), credentials, Arc::new(config.backoff))
    }

    /// Establish the connection if not already connected.
    ///
    /// Resolves once connected, or with the error that ended the attempt
    /// cycle. Calls made while an attempt is in flight share that attempt.
    pub async fn connect(&self) -> ClientResult<()> {
        self.request(Command::Connect).await
    }

    /// Join a conversation group now, or once the connection comes up.
    ///
    /// The join is remembered and replayed after every reconnect until
    /// [`leave_conversation`](Self::leave_conversation) or
    /// [`logout`](Self::logout).
    pub async fn join_conversation(
        &self,
        conversation_id: ConversationId,
        participants: Vec<UserId>,
    ) -> ClientResult<()> {
        self.request(|reply| Command::Join {
            conversation_id,
            participants,
            reply,
        })
        .await
    }

    pub async fn leave_conversation(&self, conversation_id: ConversationId) -> ClientResult<()> {
        self.request(|reply| Command::Leave {
            conversation_id,
            reply,
        })
        .await
    }

    /// Relay a typing indicator; dropped silently unless connected
    pub fn typing(&self, conversation_id: ConversationId, display_name: impl Into<String>) {
        let _ = self.commands.send(Command::Relay(ClientInvocation::UserTyping {
            conversation_id,
            display_name: display_name.into(),
        }));
    }

    pub fn stopped_typing(&self, conversation_id: ConversationId, display_name: impl Into<String>) {
        let _ = self
            .commands
            .send(Command::Relay(ClientInvocation::UserStoppedTyping {
                conversation_id,
                display_name: display_name.into(),
            }));
    }

    /// Close the connection and stop retrying. Pending joins are kept.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.request(|reply| Command::Disconnect {
            clear_session: false,
            reply,
        })
        .await
    }

    /// Disconnect and forget every pending join
    pub async fn logout(&self) -> ClientResult<()> {
        self.request(|reply| Command::Disconnect {
            clear_session: true,
            reply,
        })
        .await
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Conversations that will be re-joined on the next (re)connect
    pub async fn pending_joins(&self) -> ClientResult<Vec<ConversationId>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::PendingJoins(tx))
            .map_err(|_| ClientError::SupervisorStopped)?;
        rx.await.map_err(|_| ClientError::SupervisorStopped)
    }

    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.subscribers.on_message(handler)
    }

    pub fn on_typing<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TypingEvent) + Send + Sync + 'static,
    {
        self.subscribers.on_typing(handler)
    }

    pub fn on_new_conversation<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&NewConversationPayload) + Send + Sync + 'static,
    {
        self.subscribers.on_new_conversation(handler)
    }

    pub fn on_notification<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.subscribers.on_notification(handler)
    }

    async fn request(&self, build: impl FnOnce(Reply) -> Command) -> ClientResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| ClientError::SupervisorStopped)?;
        rx.await.map_err(|_| ClientError::SupervisorStopped)?
    }
}

enum Step {
    Command(Command),
    Attempted(ClientResult<HubLink>),
    RetryDue,
    Inbound(Option<ServerEvent>),
}

struct Actor {
    connector: Arc<dyn HubConnector>,
    credentials: Arc<dyn CredentialSource>,
    backoff: Arc<dyn BackoffStrategy>,
    subscribers: Arc<EventSubscribers>,
    state: watch::Sender<SupervisorState>,
    pending_joins: BTreeMap<ConversationId, Vec<UserId>>,
    retry: RetryState,
    link: Option<mpsc::UnboundedSender<ClientInvocation>>,
    inbound: Option<mpsc::Receiver<ServerEvent>>,
    attempt: Option<BoxFuture<'static, ClientResult<HubLink>>>,
    backoff_timer: Option<Pin<Box<Sleep>>>,
    /// Callers waiting for the current attempt cycle to finish
    waiters: Vec<Reply>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let step = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => break,
                },
                result = next_attempt(&mut self.attempt) => Step::Attempted(result),
                () = next_timer(&mut self.backoff_timer) => Step::RetryDue,
                event = next_event(&mut self.inbound) => Step::Inbound(event),
            };

            match step {
                Step::Command(command) => self.handle_command(command),
                Step::Attempted(Ok(link)) => self.on_connected(link),
                Step::Attempted(Err(e)) => self.on_attempt_failed(e),
                Step::RetryDue => {
                    self.backoff_timer = None;
                    self.start_attempt();
                }
                Step::Inbound(Some(event)) => {
                    self.subscribers.dispatch(&event);
                }
                Step::Inbound(None) => self.on_link_lost(),
            }
        }
        debug!("connection supervisor stopped");
    }

    fn current(&self) -> SupervisorState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SupervisorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(?previous, ?next, "supervisor state changed");
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.ensure_connected(reply),
            Command::Join {
                conversation_id,
                participants,
                reply,
            } => {
                self.pending_joins
                    .insert(conversation_id, participants.clone());
                if self.current() == SupervisorState::Connected {
                    self.send(ClientInvocation::JoinConversation {
                        conversation_id,
                        participant_ids: participants,
                    });
                    let _ = reply.send(Ok(()));
                } else {
                    debug!(%conversation_id, "join queued until connected");
                    self.ensure_connected(reply);
                }
            }
            Command::Leave {
                conversation_id,
                reply,
            } => {
                self.pending_joins.remove(&conversation_id);
                if self.current() == SupervisorState::Connected {
                    self.send(ClientInvocation::LeaveConversation { conversation_id });
                }
                let _ = reply.send(Ok(()));
            }
            Command::Relay(invocation) => {
                if self.current() == SupervisorState::Connected {
                    self.send(invocation);
                } else {
                    debug!("dropping typing indicator while not connected");
                }
            }
            Command::Disconnect {
                clear_session,
                reply,
            } => {
                self.shut_down(clear_session);
                let _ = reply.send(Ok(()));
            }
            Command::PendingJoins(reply) => {
                let _ = reply.send(self.pending_joins.keys().copied().collect());
            }
        }
    }

    fn ensure_connected(&mut self, reply: Reply) {
        match self.current() {
            SupervisorState::Connected => {
                let _ = reply.send(Ok(()));
            }
            SupervisorState::Connecting | SupervisorState::Reconnecting => {
                self.waiters.push(reply);
            }
            SupervisorState::Idle | SupervisorState::Failed => {
                self.waiters.push(reply);
                self.retry.reset();
                self.set_state(SupervisorState::Connecting);
                self.start_attempt();
            }
        }
    }

    fn start_attempt(&mut self) {
        let Some(token) = self.credentials.token() else {
            warn!("no credential available; not connecting");
            self.attempt = None;
            self.backoff_timer = None;
            self.retry.reset();
            self.set_state(SupervisorState::Idle);
            self.finish_waiters(Err(ClientError::MissingCredential));
            return;
        };

        self.retry.attempt += 1;
        debug!(attempt = self.retry.attempt, "connecting to hub");
        let connector = Arc::clone(&self.connector);
        self.attempt = Some(Box::pin(async move { connector.connect(&token).await }));
    }

    fn on_connected(&mut self, link: HubLink) {
        self.attempt = None;
        self.link = Some(link.outbound);
        self.inbound = Some(link.inbound);
        info!(attempts = self.retry.attempt, "connected to hub");
        self.retry.reset();
        self.set_state(SupervisorState::Connected);
        self.replay_pending_joins();
        self.finish_waiters(Ok(()));
    }

    fn on_attempt_failed(&mut self, error: ClientError) {
        self.attempt = None;
        match self.backoff.next_delay(self.retry.attempt) {
            Some(delay) => {
                warn!(
                    attempt = self.retry.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "hub connection attempt failed; retrying"
                );
                self.backoff_timer = Some(Box::pin(sleep(delay)));
                self.set_state(SupervisorState::Reconnecting);
            }
            None => {
                let attempts = self.retry.attempt;
                warn!(attempts, error = %error, "giving up on hub connection");
                self.set_state(SupervisorState::Failed);
                self.finish_waiters(Err(ClientError::RetriesExhausted { attempts }));
            }
        }
    }

    fn on_link_lost(&mut self) {
        self.link = None;
        self.inbound = None;
        warn!("hub connection lost; reconnecting");
        self.retry.reset();
        self.set_state(SupervisorState::Reconnecting);
        self.start_attempt();
    }

    fn shut_down(&mut self, clear_session: bool) {
        self.attempt = None;
        self.backoff_timer = None;
        self.link = None;
        self.inbound = None;
        self.retry.reset();
        if clear_session {
            self.pending_joins.clear();
        }
        self.set_state(SupervisorState::Idle);
        self.finish_waiters(Err(ClientError::Disconnected));
        info!(clear_session, "disconnected from hub");
    }

    /// Re-send every remembered join over the current link; returns how many were sent
    fn replay_pending_joins(&self) -> usize {
        let mut sent = 0;
        for (conversation_id, participants) in &self.pending_joins {
            if self.send(ClientInvocation::JoinConversation {
                conversation_id: *conversation_id,
                participant_ids: participants.clone(),
            }) {
                sent += 1;
            }
        }
        if sent > 0 {
            debug!(count = sent, "replayed pending joins");
        }
        sent
    }

    fn send(&self, invocation: ClientInvocation) -> bool {
        match &self.link {
            Some(link) => link.send(invocation).is_ok(),
            None => false,
        }
    }

    fn finish_waiters(&mut self, result: ClientResult<()>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }
}

async fn next_attempt(
    attempt: &mut Option<BoxFuture<'static, ClientResult<HubLink>>>,
) -> ClientResult<HubLink> {
    match attempt {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn next_event(inbound: &mut Option<mpsc::Receiver<ServerEvent>>) -> Option<ServerEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}
