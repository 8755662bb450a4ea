//! Shared application state for the hub endpoints

use std::sync::Arc;

use crate::api::auth::IdentityResolver;
use crate::hub::BroadcastHub;
use crate::routing::{MessageRoutingService, MessageStore};

/// Default per-connection outbound queue length
pub const DEFAULT_SEND_BUFFER: usize = 256;

pub struct AppState {
    /// Connection registry, membership and fan-out
    pub hub: Arc<BroadcastHub>,

    /// Send-message pipeline (persistence, then live delivery)
    pub routing: Arc<MessageRoutingService>,

    /// Bearer token to user id mapping
    pub auth: Arc<IdentityResolver>,

    /// Frames a slow connection may have queued before sends to it fail
    pub send_buffer: usize,
}

impl AppState {
    pub fn new(
        hub: Arc<BroadcastHub>,
        store: Arc<dyn MessageStore>,
        auth: IdentityResolver,
        staff_role: &str,
    ) -> Self {
        let routing = Arc::new(MessageRoutingService::new(store, Arc::clone(&hub), staff_role));
        Self {
            hub,
            routing,
            auth: Arc::new(auth),
            send_buffer: DEFAULT_SEND_BUFFER,
        }
    }

    pub fn with_send_buffer(mut self, size: usize) -> Self {
        self.send_buffer = size.max(1);
        self
    }
}
