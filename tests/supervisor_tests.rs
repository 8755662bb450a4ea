//! Integration tests for the client connection supervisor, driven through a
//! fake connector that records every attempt and every invocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_hub::client::{
    BackoffStrategy, ConnectionSupervisor, CredentialSource, ExponentialBackoff, HubConnector,
    HubLink, SupervisorState,
};
use chat_hub::error::{ClientError, ClientResult};
use chat_hub::types::{ClientInvocation, ConversationId, ServerEvent, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Server side of one fake link
struct FakeServer {
    invocations: mpsc::UnboundedReceiver<ClientInvocation>,
    events: mpsc::Sender<ServerEvent>,
}

impl FakeServer {
    fn drain(&mut self) -> Vec<ClientInvocation> {
        std::iter::from_fn(|| self.invocations.try_recv().ok()).collect()
    }
}

#[derive(Default)]
struct FakeConnector {
    failures_left: Mutex<u32>,
    /// Time each attempt takes before it resolves
    latency: Duration,
    attempts: Mutex<Vec<Instant>>,
    servers: Mutex<Vec<FakeServer>>,
}

impl FakeConnector {
    fn new(failures: u32) -> Arc<Self> {
        let connector = Self::default();
        *connector.failures_left.lock() = failures;
        Arc::new(connector)
    }

    fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    fn take_server(&self) -> Option<FakeServer> {
        let mut servers = self.servers.lock();
        if servers.is_empty() {
            None
        } else {
            Some(servers.remove(0))
        }
    }
}

#[async_trait]
impl HubConnector for FakeConnector {
    async fn connect(&self, _token: &str) -> ClientResult<HubLink> {
        self.attempts.lock().push(Instant::now());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        {
            let mut failures = self.failures_left.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ClientError::ConnectFailed("connection refused".to_string()));
            }
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(16);
        self.servers.lock().push(FakeServer {
            invocations: out_rx,
            events: in_tx,
        });
        Ok(HubLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

fn credentials() -> Arc<dyn CredentialSource> {
    Arc::new(|| Some("session-token".to_string()))
}

fn backoff(initial_ms: u64, max_ms: u64, max_attempts: u32) -> Arc<dyn BackoffStrategy> {
    Arc::new(ExponentialBackoff::new(
        Duration::from_millis(initial_ms),
        Duration::from_millis(max_ms),
        max_attempts,
    ))
}

async fn wait_for_state(supervisor: &ConnectionSupervisor, wanted: SupervisorState) {
    let mut changes = supervisor.state_changes();
    tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|s| *s == wanted))
        .await
        .expect("state not reached in time")
        .expect("supervisor stopped");
}

fn joins_for(invocations: &[ClientInvocation], id: ConversationId) -> usize {
    invocations
        .iter()
        .filter(|i| {
            matches!(i, ClientInvocation::JoinConversation { conversation_id, .. } if *conversation_id == id)
        })
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_attempt() {
    let connector = FakeConnector::slow(Duration::from_millis(50));
    let supervisor = ConnectionSupervisor::spawn(connector.clone(), credentials(), backoff(10, 100, 5));

    let (a, b, c) = tokio::join!(supervisor.connect(), supervisor.connect(), supervisor.connect());
    assert_eq!(a, Ok(()));
    assert_eq!(b, Ok(()));
    assert_eq!(c, Ok(()));
    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(supervisor.state(), SupervisorState::Connected);

    // Already connected: nothing new is dialled
    supervisor.connect().await.unwrap();
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test]
async fn test_reconnect_rejoins_each_conversation_once() {
    let connector = FakeConnector::new(0);
    let supervisor = ConnectionSupervisor::spawn(connector.clone(), credentials(), backoff(10, 100, 5));

    supervisor
        .join_conversation(ConversationId(1), vec![UserId(1), UserId(2)])
        .await
        .unwrap();
    supervisor
        .join_conversation(ConversationId(2), vec![UserId(1), UserId(3)])
        .await
        .unwrap();

    let mut first = connector.take_server().unwrap();
    let before = first.drain();
    assert_eq!(joins_for(&before, ConversationId(1)), 1);
    assert_eq!(joins_for(&before, ConversationId(2)), 1);

    // Server goes away
    drop(first);

    let mut second = loop {
        if let Some(server) = connector.take_server() {
            break server;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    wait_for_state(&supervisor, SupervisorState::Connected).await;
    // Round-trip through the supervisor so the replay has been issued
    supervisor.pending_joins().await.unwrap();

    let replayed = second.drain();
    assert_eq!(replayed.len(), 2);
    assert_eq!(joins_for(&replayed, ConversationId(1)), 1);
    assert_eq!(joins_for(&replayed, ConversationId(2)), 1);
    assert_eq!(connector.attempt_count(), 2);
}

#[tokio::test]
async fn test_left_conversation_is_not_replayed() {
    let connector = FakeConnector::new(0);
    let supervisor = ConnectionSupervisor::spawn(connector.clone(), credentials(), backoff(10, 100, 5));

    supervisor.join_conversation(ConversationId(1), vec![]).await.unwrap();
    supervisor.join_conversation(ConversationId(2), vec![]).await.unwrap();
    supervisor.leave_conversation(ConversationId(1)).await.unwrap();

    let mut first = connector.take_server().unwrap();
    assert!(first
        .drain()
        .contains(&ClientInvocation::LeaveConversation { conversation_id: ConversationId(1) }));
    drop(first);

    let mut second = loop {
        if let Some(server) = connector.take_server() {
            break server;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    wait_for_state(&supervisor, SupervisorState::Connected).await;
    supervisor.pending_joins().await.unwrap();

    let replayed = second.drain();
    assert_eq!(joins_for(&replayed, ConversationId(1)), 0);
    assert_eq!(joins_for(&replayed, ConversationId(2)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_is_monotonic_capped_and_bounded() {
    let connector = FakeConnector::new(u32::MAX);
    let supervisor = ConnectionSupervisor::spawn(connector.clone(), credentials(), backoff(100, 400, 6));

    let err = supervisor.connect().await.unwrap_err();
    assert_eq!(err, ClientError::RetriesExhausted { attempts: 6 });
    assert_eq!(supervisor.state(), SupervisorState::Failed);

    let attempts = connector.attempts.lock().clone();
    assert_eq!(attempts.len(), 6);
    let delays: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert!(delays.iter().all(|d| *d <= Duration::from_millis(400)));
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(400),
            Duration::from_millis(400),
        ]
    );

    // No further automatic attempts once Failed
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_failure_starts_a_new_cycle() {
    let connector = FakeConnector::new(3);
    let supervisor = ConnectionSupervisor::spawn(connector.clone(), credentials(), backoff(100, 400, 2));

    assert!(supervisor.connect().await.is_err());
    assert_eq!(connector.attempt_count(), 2);

    // One failure left, then success
    supervisor.connect().await.unwrap();
    assert_eq!(connector.attempt_count(), 4);
    assert_eq!(supervisor.state(), SupervisorState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_backoff() {
    let connector = FakeConnector::new(1);
    let supervisor = ConnectionSupervisor::spawn(connector.clone(), credentials(), backoff(10_000, 30_000, 5));

    let waiting = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.connect().await })
    };
    wait_for_state(&supervisor, SupervisorState::Reconnecting).await;

    supervisor.disconnect().await.unwrap();
    assert_eq!(waiting.await.unwrap(), Err(ClientError::Disconnected));
    assert_eq!(supervisor.state(), SupervisorState::Idle);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_join_during_reconnect_is_queued() {
    let connector = FakeConnector::new(1);
    let supervisor = ConnectionSupervisor::spawn(connector.clone(), credentials(), backoff(500, 1_000, 5));

    let connecting = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.connect().await })
    };
    wait_for_state(&supervisor, SupervisorState::Reconnecting).await;

    // Resolves once the retry succeeds and the join is replayed
    supervisor
        .join_conversation(ConversationId(44), vec![UserId(1)])
        .await
        .unwrap();
    connecting.await.unwrap().unwrap();

    let mut server = connector.take_server().unwrap();
    let sent = server.drain();
    assert_eq!(joins_for(&sent, ConversationId(44)), 1);
}

#[tokio::test]
async fn test_missing_credential_makes_no_attempt() {
    let connector = FakeConnector::new(0);
    let supervisor =
        ConnectionSupervisor::spawn(connector.clone(), Arc::new(|| None::<String>), backoff(10, 100, 3));

    let err = supervisor
        .join_conversation(ConversationId(1), vec![])
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::MissingCredential);
    assert_eq!(connector.attempt_count(), 0);
    // The join stays queued for a later connect
    assert_eq!(supervisor.pending_joins().await.unwrap(), vec![ConversationId(1)]);
}

#[tokio::test]
async fn test_events_flow_to_subscribers_until_unsubscribed() {
    let connector = FakeConnector::new(0);
    let supervisor = ConnectionSupervisor::spawn(connector.clone(), credentials(), backoff(10, 100, 3));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = supervisor.on_typing(move |event| {
        let _ = tx.send(event.clone());
    });

    supervisor.connect().await.unwrap();
    let server = connector.take_server().unwrap();
    server
        .events
        .send(ServerEvent::UserTyping(chat_hub::types::TypingPayload {
            conversation_id: ConversationId(5),
            user_name: "Sam".to_string(),
        }))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(event.is_typing);
    assert_eq!(event.user_name, "Sam");

    subscription.unsubscribe();
    server
        .events
        .send(ServerEvent::UserStoppedTyping(chat_hub::types::TypingPayload {
            conversation_id: ConversationId(5),
            user_name: "Sam".to_string(),
        }))
        .await
        .unwrap();
    supervisor.pending_joins().await.unwrap();
    assert!(rx.try_recv().is_err());
}
