//! Integration tests for the broadcast hub: multi-tab delivery, targeted
//! notifications, typing exclusion and fan-out isolation.

use std::sync::Arc;

use chat_hub::hub::{
    BroadcastHub, ChannelSink, ConnectionSink, DeliveryError, Frame, HubConnection,
    NotificationSender,
};
use chat_hub::types::{ConversationId, ServerEvent, UserId};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// A connection whose transport is already gone
struct BrokenSink;

impl ConnectionSink for BrokenSink {
    fn send(&self, _frame: Frame) -> Result<(), DeliveryError> {
        Err(DeliveryError::Closed)
    }
}

/// Connect a client and drain its welcome frame
fn open(hub: &BroadcastHub, user: Option<i64>) -> (HubConnection, mpsc::Receiver<Frame>) {
    let (tx, mut rx) = mpsc::channel(32);
    let conn = hub.connect(user.map(UserId), Arc::new(ChannelSink::new(tx)));
    let welcome = next(&mut rx).expect("welcome frame");
    assert_eq!(welcome["type"], "Connected");
    (conn, rx)
}

fn next(rx: &mut mpsc::Receiver<Frame>) -> Option<Value> {
    rx.try_recv()
        .ok()
        .map(|frame| serde_json::from_str(&frame).unwrap())
}

fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Value> {
    std::iter::from_fn(|| next(rx)).collect()
}

#[test]
fn test_two_tabs_one_user() {
    let hub = BroadcastHub::in_memory();
    let (_c1, mut rx1) = open(&hub, Some(5));
    let (_c2, mut rx2) = open(&hub, Some(5));

    let report = hub.send_notification_to_user(UserId(5), json!({"type": "ping"}));
    assert_eq!(report.delivered, 2);

    let tab1 = drain(&mut rx1);
    let tab2 = drain(&mut rx2);
    assert_eq!(tab1.len(), 1);
    assert_eq!(tab2.len(), 1);
    assert_eq!(tab1[0]["type"], "ReceiveNotification");
    assert_eq!(tab2[0]["payload"]["type"], "ping");
}

#[test]
fn test_notification_does_not_need_membership() {
    let hub = BroadcastHub::in_memory();
    let (_conn, mut rx) = open(&hub, Some(9));
    assert_eq!(hub.stats().conversations, 0);

    hub.send_notification_to_user(UserId(9), json!({"type": "approval", "bookId": 31}));

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["payload"]["type"], "approval");
    assert_eq!(frames[0]["payload"]["bookId"], 31);
}

#[test]
fn test_typing_reaches_only_the_other_side() {
    let hub = BroadcastHub::in_memory();
    let conversation = ConversationId(12);
    let (a, mut rx_a) = open(&hub, Some(1));
    let (b, mut rx_b) = open(&hub, Some(2));
    hub.join_conversation(&a, conversation, &[UserId(1), UserId(2)]);
    hub.join_conversation(&b, conversation, &[UserId(1), UserId(2)]);

    hub.typing(&a, conversation, "Alex");

    assert!(drain(&mut rx_a).is_empty());
    let frames = drain(&mut rx_b);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "UserTyping");
    assert_eq!(frames[0]["payload"]["userName"], "Alex");
    assert_eq!(frames[0]["payload"]["conversationId"], 12);
}

#[test]
fn test_fan_out_survives_a_broken_connection() {
    let hub = BroadcastHub::in_memory();
    let conversation = ConversationId(3);
    let (a, mut rx_a) = open(&hub, Some(1));
    let (b, mut rx_b) = open(&hub, Some(2));
    let broken = hub.connect(Some(UserId(3)), Arc::new(BrokenSink));
    for conn in [&a, &b, &broken] {
        hub.join_conversation(conn, conversation, &[]);
    }

    let report = hub.send_to_conversation(conversation, &ServerEvent::Pong);

    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(drain(&mut rx_a).len(), 1);
    assert_eq!(drain(&mut rx_b).len(), 1);
}

#[test]
fn test_disconnect_cleans_up_registry() {
    let hub = BroadcastHub::in_memory();
    for _ in 0..50 {
        let (conn, _rx) = open(&hub, Some(4));
        hub.disconnect(&conn);
    }
    assert!(hub.registry().connections_for(UserId(4)).is_empty());
    assert_eq!(hub.registry().user_count(), 0);
    assert_eq!(hub.stats().connections, 0);
}

#[test]
fn test_anonymous_connection_is_not_addressable() {
    let hub = BroadcastHub::in_memory();
    let (_anon, mut rx) = open(&hub, None);

    assert_eq!(hub.registry().user_count(), 0);
    assert_eq!(hub.stats().connections, 1);

    // Still part of a global broadcast
    hub.broadcast(&ServerEvent::Pong);
    assert_eq!(drain(&mut rx).len(), 1);
}

#[test]
fn test_membership_is_additive() {
    let hub = BroadcastHub::in_memory();
    let (conn, _rx) = open(&hub, Some(1));
    hub.join_conversation(&conn, ConversationId(8), &[UserId(1), UserId(2)]);
    hub.join_conversation(&conn, ConversationId(8), &[UserId(3)]);

    let members = hub.membership().members_of(ConversationId(8));
    assert_eq!(members.len(), 3);
    for user in [1, 2, 3] {
        assert!(members.contains(&UserId(user)));
    }
}
