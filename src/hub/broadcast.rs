//! Broadcast hub: connection lifecycle, conversation groups and fan-out
//!
//! One hub instance is created per server and owns the connection registry
//! and conversation membership. Fan-out is a series of isolated sends; a
//! failed send is logged and never aborts delivery to the other recipients.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::groups::{ConnectionSink, DeliveryReport, Frame, GroupTransport, InMemoryGroups};
use super::membership::ConversationMembership;
use super::registry::ConnectionRegistry;
use crate::types::{
    ClientInvocation, ConnectionId, ConversationId, ServerEvent, TypingPayload, UserId, Welcome,
};

/// Identity captured when a connection was accepted.
///
/// Disconnect uses the same pair, so a connection is always unregistered
/// under the user it was registered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConnection {
    pub id: ConnectionId,
    pub user_id: Option<UserId>,
}

/// Snapshot of hub occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub users: usize,
    pub conversations: usize,
}

/// Entry point other subsystems (approvals, payouts) use to reach a user
pub trait NotificationSender: Send + Sync {
    fn send_notification_to_user(&self, user: UserId, payload: serde_json::Value)
        -> DeliveryReport;
}

pub struct BroadcastHub {
    registry: ConnectionRegistry,
    membership: ConversationMembership,
    groups: Arc<dyn GroupTransport>,
}

impl BroadcastHub {
    pub fn new(groups: Arc<dyn GroupTransport>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            membership: ConversationMembership::new(),
            groups,
        }
    }

    /// Hub backed by the in-process group transport
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryGroups::new()))
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn membership(&self) -> &ConversationMembership {
        &self.membership
    }

    /// Accept a physical connection.
    ///
    /// Connections without a resolved user stay addressable for `broadcast`
    /// and group sends but never appear in the registry.
    pub fn connect(&self, user_id: Option<UserId>, sink: Arc<dyn ConnectionSink>) -> HubConnection {
        let connection = HubConnection {
            id: ConnectionId::generate(),
            user_id,
        };
        self.groups.attach(connection.id.clone(), sink);

        match user_id {
            Some(user) => {
                self.registry.register(user, connection.id.clone());
                info!(connection_id = %connection.id, user_id = %user, "connection registered");
            }
            None => {
                info!(connection_id = %connection.id, "anonymous connection accepted");
            }
        }

        self.send_to_connection(
            &connection.id,
            &ServerEvent::Connected(Welcome {
                connection_id: connection.id.clone(),
                user_id,
            }),
        );
        connection
    }

    /// Tear down a connection. Clean and abrupt closes take the same path.
    pub fn disconnect(&self, connection: &HubConnection) {
        if let Some(user) = connection.user_id {
            self.registry.unregister(user, &connection.id);
        }
        self.groups.detach(&connection.id);
        info!(
            connection_id = %connection.id,
            user_id = ?connection.user_id,
            "connection closed"
        );
    }

    /// Subscribe the connection to the conversation group and record the participants
    pub fn join_conversation(
        &self,
        connection: &HubConnection,
        conversation: ConversationId,
        participants: &[UserId],
    ) {
        if !self
            .groups
            .subscribe(&connection.id, &conversation.group_label())
        {
            warn!(connection_id = %connection.id, %conversation, "join from detached connection ignored");
            return;
        }
        self.membership
            .join(conversation, participants.iter().copied());
        debug!(
            connection_id = %connection.id,
            %conversation,
            participants = participants.len(),
            "joined conversation"
        );
    }

    /// Unsubscribe from the conversation group. Membership is left untouched.
    pub fn leave_conversation(&self, connection: &HubConnection, conversation: ConversationId) {
        self.groups
            .unsubscribe(&connection.id, &conversation.group_label());
        debug!(connection_id = %connection.id, %conversation, "left conversation");
    }

    /// Deliver to every connection currently subscribed to the conversation group
    pub fn send_to_conversation(
        &self,
        conversation: ConversationId,
        event: &ServerEvent,
    ) -> DeliveryReport {
        let Some(frame) = encode(event) else {
            return DeliveryReport::default();
        };
        let report = self
            .groups
            .publish_to_group(&conversation.group_label(), &frame, None);
        debug!(
            %conversation,
            event = event.kind(),
            delivered = report.delivered,
            failed = report.failed,
            "sent to conversation"
        );
        report
    }

    /// Deliver to every live connection of `user`, whether or not it joined any group.
    pub fn send_to_user(&self, user: UserId, event: &ServerEvent) -> DeliveryReport {
        let connections = self.registry.connections_for(user);
        if connections.is_empty() {
            debug!(user_id = %user, event = event.kind(), "user offline, nothing to deliver");
            return DeliveryReport::default();
        }
        let Some(frame) = encode(event) else {
            return DeliveryReport::default();
        };

        let mut report = DeliveryReport::default();
        for connection in &connections {
            match self.groups.send_to(connection, &frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(connection_id = %connection, user_id = %user, error = %e, "failed to deliver to user");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Deliver to every connected client
    pub fn broadcast(&self, event: &ServerEvent) -> DeliveryReport {
        match encode(event) {
            Some(frame) => self.groups.publish_all(&frame),
            None => DeliveryReport::default(),
        }
    }

    /// Relay a typing indicator to the other subscribers of the conversation
    pub fn typing(
        &self,
        connection: &HubConnection,
        conversation: ConversationId,
        display_name: &str,
    ) -> DeliveryReport {
        self.relay_to_others(
            connection,
            conversation,
            ServerEvent::UserTyping(TypingPayload {
                conversation_id: conversation,
                user_name: display_name.to_string(),
            }),
        )
    }

    pub fn stopped_typing(
        &self,
        connection: &HubConnection,
        conversation: ConversationId,
        display_name: &str,
    ) -> DeliveryReport {
        self.relay_to_others(
            connection,
            conversation,
            ServerEvent::UserStoppedTyping(TypingPayload {
                conversation_id: conversation,
                user_name: display_name.to_string(),
            }),
        )
    }

    /// Dispatch one invocation received from `connection`
    pub fn handle_invocation(&self, connection: &HubConnection, invocation: ClientInvocation) {
        match invocation {
            ClientInvocation::JoinConversation {
                conversation_id,
                participant_ids,
            } => self.join_conversation(connection, conversation_id, &participant_ids),
            ClientInvocation::LeaveConversation { conversation_id } => {
                self.leave_conversation(connection, conversation_id)
            }
            ClientInvocation::UserTyping {
                conversation_id,
                display_name,
            } => {
                self.typing(connection, conversation_id, &display_name);
            }
            ClientInvocation::UserStoppedTyping {
                conversation_id,
                display_name,
            } => {
                self.stopped_typing(connection, conversation_id, &display_name);
            }
            ClientInvocation::Ping => self.send_to_connection(&connection.id, &ServerEvent::Pong),
        }
    }

    /// Send one event to one connection, logging instead of failing
    pub fn send_to_connection(&self, connection: &ConnectionId, event: &ServerEvent) {
        let Some(frame) = encode(event) else {
            return;
        };
        if let Err(e) = self.groups.send_to(connection, &frame) {
            warn!(connection_id = %connection, event = event.kind(), error = %e, "failed to send to connection");
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.groups.connection_count(),
            users: self.registry.user_count(),
            conversations: self.membership.conversation_count(),
        }
    }

    fn relay_to_others(
        &self,
        connection: &HubConnection,
        conversation: ConversationId,
        event: ServerEvent,
    ) -> DeliveryReport {
        let Some(frame) = encode(&event) else {
            return DeliveryReport::default();
        };
        self.groups
            .publish_to_group(&conversation.group_label(), &frame, Some(&connection.id))
    }
}

impl NotificationSender for BroadcastHub {
    fn send_notification_to_user(
        &self,
        user: UserId,
        payload: serde_json::Value,
    ) -> DeliveryReport {
        self.send_to_user(user, &ServerEvent::ReceiveNotification(payload))
    }
}

fn encode(event: &ServerEvent) -> Option<Frame> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Frame::from(json)),
        Err(e) => {
            warn!(event = event.kind(), error = %e, "failed to serialize event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::groups::ChannelSink;
    use tokio::sync::mpsc;

    fn connect(hub: &BroadcastHub, user: Option<i64>) -> (HubConnection, mpsc::Receiver<Frame>) {
        let (tx, mut rx) = mpsc::channel(32);
        let conn = hub.connect(user.map(UserId), Arc::new(ChannelSink::new(tx)));
        // Drain the welcome frame
        let welcome = rx.try_recv().unwrap();
        assert!(welcome.contains("Connected"));
        (conn, rx)
    }

    fn event_type(frame: &Frame) -> String {
        let value: serde_json::Value = serde_json::from_str(frame).unwrap();
        value["type"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_connect_registers_user() {
        let hub = BroadcastHub::in_memory();
        let (conn, _rx) = connect(&hub, Some(1));
        assert!(hub.registry().connections_for(UserId(1)).contains(&conn.id));
        assert_eq!(hub.stats().connections, 1);
    }

    #[test]
    fn test_anonymous_connection_is_not_registered() {
        let hub = BroadcastHub::in_memory();
        let (_conn, mut rx) = connect(&hub, None);
        assert_eq!(hub.registry().user_count(), 0);

        hub.broadcast(&ServerEvent::ReceiveNotification(serde_json::json!({"boot": true})));
        assert_eq!(event_type(&rx.try_recv().unwrap()), "ReceiveNotification");
    }

    #[test]
    fn test_disconnect_unregisters_captured_pair() {
        let hub = BroadcastHub::in_memory();
        let (conn, _rx) = connect(&hub, Some(1));
        hub.disconnect(&conn);
        assert!(hub.registry().connections_for(UserId(1)).is_empty());
        assert_eq!(hub.stats().connections, 0);
        // A second disconnect for the same connection is harmless
        hub.disconnect(&conn);
    }

    #[test]
    fn test_join_unions_membership() {
        let hub = BroadcastHub::in_memory();
        let (conn, _rx) = connect(&hub, Some(1));
        hub.join_conversation(&conn, ConversationId(5), &[UserId(1), UserId(2)]);
        hub.join_conversation(&conn, ConversationId(5), &[UserId(3)]);
        assert_eq!(hub.membership().members_of(ConversationId(5)).len(), 3);
    }

    #[test]
    fn test_leave_keeps_membership_but_stops_delivery() {
        let hub = BroadcastHub::in_memory();
        let (conn, mut rx) = connect(&hub, Some(1));
        hub.join_conversation(&conn, ConversationId(5), &[UserId(1)]);
        hub.leave_conversation(&conn, ConversationId(5));

        let report = hub.send_to_conversation(ConversationId(5), &ServerEvent::Pong);
        assert_eq!(report.delivered, 0);
        assert!(rx.try_recv().is_err());
        assert!(hub.membership().members_of(ConversationId(5)).contains(&UserId(1)));
    }

    #[test]
    fn test_send_to_offline_user_is_silent() {
        let hub = BroadcastHub::in_memory();
        let report = hub.send_to_user(UserId(42), &ServerEvent::Pong);
        assert_eq!(report, DeliveryReport::default());
    }

    #[test]
    fn test_typing_excludes_sender() {
        let hub = BroadcastHub::in_memory();
        let (a, mut rx_a) = connect(&hub, Some(1));
        let (b, mut rx_b) = connect(&hub, Some(2));
        hub.join_conversation(&a, ConversationId(7), &[UserId(1), UserId(2)]);
        hub.join_conversation(&b, ConversationId(7), &[UserId(1), UserId(2)]);

        let report = hub.typing(&a, ConversationId(7), "Ana");
        assert_eq!(report.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(event_type(&rx_b.try_recv().unwrap()), "UserTyping");

        hub.stopped_typing(&a, ConversationId(7), "Ana");
        assert_eq!(event_type(&rx_b.try_recv().unwrap()), "UserStoppedTyping");
    }

    #[test]
    fn test_ping_invocation_answers_caller_only() {
        let hub = BroadcastHub::in_memory();
        let (a, mut rx_a) = connect(&hub, Some(1));
        let (_b, mut rx_b) = connect(&hub, Some(2));
        hub.handle_invocation(&a, ClientInvocation::Ping);
        assert_eq!(event_type(&rx_a.try_recv().unwrap()), "Pong");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_notification_sender_wraps_payload() {
        let hub = BroadcastHub::in_memory();
        let (_conn, mut rx) = connect(&hub, Some(3));
        let report = hub.send_notification_to_user(UserId(3), serde_json::json!({"type": "approval"}));
        assert_eq!(report.delivered, 1);

        let value: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "ReceiveNotification");
        assert_eq!(value["payload"]["type"], "approval");
    }
}
