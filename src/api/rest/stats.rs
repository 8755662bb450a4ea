//! Hub statistics endpoint

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::api::websocket::state::AppState;
use crate::hub::HubStats;

/// GET /api/hub/stats - Current connection, user and conversation counts
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<HubStats> {
    Json(state.hub.stats())
}
