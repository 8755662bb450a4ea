//! Hub connect endpoint
//!
//! Each upgraded socket gets a writer task draining the connection's
//! outbound queue, while this task reads invocations and dispatches them to
//! the hub. Both clean closes and transport errors end in `disconnect`.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::state::AppState;
use crate::hub::{ChannelSink, Frame, HubConnection};
use crate::types::{ClientInvocation, ErrorPayload, ServerEvent, UserId};

/// Query parameters for the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Token for clients that cannot set headers on the upgrade request
    pub access_token: Option<String>,
    /// Older query name, still accepted
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// Upgrades are never refused for missing or bad credentials, nor for an
/// unparseable query string; such connections are accepted anonymously and
/// are not user-addressable.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    params: Option<Query<WsParams>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let params = match params {
        Some(Query(params)) => params,
        None => {
            debug!("ignoring malformed upgrade query");
            WsParams::default()
        }
    };
    let query_token = params.access_token.as_deref().or(params.token.as_deref());
    let user_id = state.auth.try_identify(&headers, query_token);

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Handle an individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: Option<UserId>) {
    let (mut sender, mut receiver) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(state.send_buffer);
    let (control_tx, mut control_rx) = mpsc::channel::<Message>(8);

    let connection = state
        .hub
        .connect(user_id, Arc::new(ChannelSink::new(frame_tx)));

    // Ends once the hub detaches the sink and the control sender is dropped
    let mut writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                frame = frame_rx.recv() => match frame {
                    Some(frame) => Message::Text(frame.to_string()),
                    None => break,
                },
                control = control_rx.recv() => match control {
                    Some(message) => message,
                    None => break,
                },
            };
            if sender.send(message).await.is_err() {
                break; // Client disconnected
            }
        }
        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(msg)) => {
                        if !handle_client_message(msg, &state, &connection, &control_tx) {
                            break; // Client requested close
                        }
                    }
                    Some(Err(e)) => {
                        debug!(connection_id = %connection.id, error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut writer => break,
        }
    }

    state.hub.disconnect(&connection);
}

/// Handle a message from the client.
/// Returns false if the connection should be closed
fn handle_client_message(
    msg: Message,
    state: &AppState,
    connection: &HubConnection,
    control: &mpsc::Sender<Message>,
) -> bool {
    match msg {
        Message::Text(text) => {
            match serde_json::from_str::<ClientInvocation>(&text) {
                Ok(invocation) => {
                    debug!(connection_id = %connection.id, ?invocation, "invocation received");
                    state.hub.handle_invocation(connection, invocation);
                }
                Err(e) => {
                    warn!(connection_id = %connection.id, error = %e, "unparseable invocation");
                    state.hub.send_to_connection(
                        &connection.id,
                        &ServerEvent::Error(ErrorPayload {
                            code: "invalid_invocation".to_string(),
                            message: e.to_string(),
                        }),
                    );
                }
            }
            true
        }
        Message::Binary(_) => true, // Ignore binary messages
        Message::Ping(data) => {
            let _ = control.try_send(Message::Pong(data));
            true
        }
        Message::Pong(_) => true,
        Message::Close(_) => false,
    }
}
