//! Hub server lifecycle
//!
//! The server owns exactly one [`BroadcastHub`] (and with it the connection
//! registry and conversation membership). They are created with the server
//! and dropped with it; nothing lives in process-wide statics.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::api::{create_router, AppState, IdentityResolver};
use crate::config::HubConfig;
use crate::error::ServerError;
use crate::hub::BroadcastHub;
use crate::routing::MessageStore;

pub struct HubServer {
    config: HubConfig,
    state: Arc<AppState>,
}

impl HubServer {
    pub fn new(config: HubConfig, store: Arc<dyn MessageStore>) -> Result<Self, ServerError> {
        let auth = IdentityResolver::new(&config.jwt_secret)?;
        let hub = Arc::new(BroadcastHub::in_memory());
        let state = AppState::new(hub, store, auth, &config.staff_role)
            .with_send_buffer(config.send_buffer);
        Ok(Self {
            config,
            state: Arc::new(state),
        })
    }

    /// The hub other subsystems use to push notifications
    pub fn hub(&self) -> Arc<BroadcastHub> {
        Arc::clone(&self.state.hub)
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listener.local_addr()?;
        let app = create_router(Arc::clone(&self.state));
        info!(%addr, staff_role = %self.config.staff_role, "chat hub listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("chat hub stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
