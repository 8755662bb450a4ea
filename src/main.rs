//! Chat Hub - Binary Entry Point
//!
//! Runs the hub with the in-memory message store. Production deployments
//! embed [`HubServer`] with their own [`chat_hub::MessageStore`].

use std::sync::Arc;

use chat_hub::config::HubConfig;
use chat_hub::error::ServerError;
use chat_hub::logging::init_subscriber;
use chat_hub::routing::InMemoryMessageStore;
use chat_hub::server::HubServer;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let config = HubConfig::from_env()?;
    init_subscriber(&config.log_level);

    let store = InMemoryMessageStore::development(&config);
    let server = HubServer::new(config, Arc::new(store))?;
    server.run().await
}
