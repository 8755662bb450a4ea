//! Client-side transport to the hub
//!
//! A [`HubConnector`] opens one physical connection and hands back a
//! [`HubLink`]: a sender for invocations and a receiver of server events.
//! The link is dead once `inbound` yields `None`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::types::{ClientInvocation, ServerEvent};

/// Both directions of one live hub connection
pub struct HubLink {
    pub outbound: mpsc::UnboundedSender<ClientInvocation>,
    pub inbound: mpsc::Receiver<ServerEvent>,
}

#[async_trait]
pub trait HubConnector: Send + Sync {
    /// Open a connection authenticated with `token`
    async fn connect(&self, token: &str) -> ClientResult<HubLink>;
}

/// WebSocket connector speaking the hub's JSON frame protocol
pub struct WsConnector {
    url: String,
    inbound_buffer: usize,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            inbound_buffer: 256,
        }
    }

    pub fn with_inbound_buffer(mut self, size: usize) -> Self {
        self.inbound_buffer = size.max(1);
        self
    }
}

#[async_trait]
impl HubConnector for WsConnector {
    async fn connect(&self, token: &str) -> ClientResult<HubLink> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;
        debug!(url = %self.url, "hub connection established");

        let (mut write, mut read) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientInvocation>();
        let (in_tx, in_rx) = mpsc::channel::<ServerEvent>(self.inbound_buffer);

        // Writer: ends when the supervisor drops its sender
        tokio::spawn(async move {
            while let Some(invocation) = out_rx.recv().await {
                let json = match serde_json::to_string(&invocation) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize invocation");
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Reader: dropping `in_tx` signals link loss to the supervisor
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if in_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "ignoring unparseable hub frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "hub connection read failed");
                        break;
                    }
                }
            }
        });

        Ok(HubLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
