//! Send-message endpoint

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};

use crate::api::websocket::state::AppState;
use crate::error::RoutingError;
use crate::types::{ChatMessage, SendMessageRequest};

/// POST /api/messages - Persist a message, then push it to live subscribers
///
/// The sender comes from the bearer token. Returns 201 with the stored
/// message (including the resolved `conversationId`) even when nobody was
/// online to receive it.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), RoutingError> {
    let sender = state.auth.try_identify(&headers, None);
    let message = state.routing.send_message(sender, request).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
