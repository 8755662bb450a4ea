//! REST API module for HTTP endpoints
//!
//! - `POST /api/messages` - Persist a message and deliver it live
//! - `GET /api/hub/stats` - Hub occupancy

pub mod messages;
pub mod stats;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::{RoutingError, StoreError};

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.to_string(),
        }
    }
}

impl IntoResponse for RoutingError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            RoutingError::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            RoutingError::MalformedRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            RoutingError::Store(StoreError::ConversationNotFound(_))
            | RoutingError::Store(StoreError::UserNotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            RoutingError::Store(StoreError::NotParticipant { .. }) => {
                (StatusCode::FORBIDDEN, "FORBIDDEN")
            }
            RoutingError::Store(StoreError::Unavailable(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        (status, Json(ApiError::new(code, self.to_string()))).into_response()
    }
}
