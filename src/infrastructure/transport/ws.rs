//! Downstream WebSocket Server
//!
//! Accepts browser and service clients, assigns each connection a fresh
//! client id and forwards their watch/unwatch requests to the session
//! manager as [`TransportEvent`]s. Outbound events are JSON frames of the
//! form `{"event":"tick","data":{...}}`.
//!
//! A client that can resume across reconnects passes a stable token in
//! the connect URL (`/?session=<token>`); the session manager uses it to
//! carry watches over the disconnect grace period.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
    Request as HandshakeRequest, Response as HandshakeResponse,
};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DeliveryError, DownstreamTransport, TransportEvent};
use crate::domain::subscription::ClientId;

/// Errors from the downstream server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Listener could not be bound or accepted.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inbound client request.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum ClientRequest {
    /// Start watching a symbol.
    Watch {
        symbol: String,
        interval: Option<String>,
    },
    /// Stop watching a symbol.
    Unwatch {
        symbol: String,
        interval: Option<String>,
    },
}

/// WebSocket server and per-client outbound registry.
pub struct WsTransport {
    clients: RwLock<HashMap<ClientId, mpsc::UnboundedSender<Message>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl WsTransport {
    /// Create a transport publishing client activity to `events`.
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Accept connections until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn serve(
        self: Arc<Self>,
        addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "downstream server listening");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("downstream server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let transport = Arc::clone(&self);
                            let cancel = cancel.clone();
                            tokio::spawn(async move {
                                transport.handle_client(stream, peer, cancel).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
        let mut session: Option<String> = None;
        let handshake = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &HandshakeRequest, response: HandshakeResponse| {
                session = request.uri().query().and_then(session_token);
                Ok(response)
            },
        )
        .await;

        let ws_stream = match handshake {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "handshake failed");
                return;
            }
        };

        let client: ClientId = uuid::Uuid::new_v4().to_string();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        self.clients.write().insert(client.clone(), outbound_tx);

        tracing::debug!(%peer, client = %client, session = session.is_some(), "client connected");
        let _ = self.events.send(TransportEvent::ClientConnected {
            client: client.clone(),
            session,
        });

        let (mut write, mut read) = ws_stream.split();
        let reason = loop {
            tokio::select! {
                () = cancel.cancelled() => break "shutdown",
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(message) => {
                            if write.send(message).await.is_err() {
                                break "write failed";
                            }
                        }
                        None => break "transport dropped",
                    }
                }
                inbound = read.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => self.handle_request(&client, &text),
                        Some(Ok(Message::Ping(data))) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                break "write failed";
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break "closed",
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(client = %client, error = %e, "read error");
                            break "read error";
                        }
                    }
                }
            }
        };

        self.clients.write().remove(&client);
        let _ = self.events.send(TransportEvent::ClientDisconnected {
            client,
            reason: reason.to_string(),
        });
    }

    fn handle_request(&self, client: &ClientId, text: &str) {
        let request = match serde_json::from_str::<ClientRequest>(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(client = %client, error = %e, "malformed client request");
                return;
            }
        };

        let event = match request {
            ClientRequest::Watch { symbol, interval } => TransportEvent::Watch {
                client: client.clone(),
                symbol,
                interval,
            },
            ClientRequest::Unwatch { symbol, interval } => TransportEvent::Unwatch {
                client: client.clone(),
                symbol,
                interval,
            },
        };
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl DownstreamTransport for WsTransport {
    async fn emit(
        &self,
        client: &ClientId,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let sender = self
            .clients
            .read()
            .get(client)
            .cloned()
            .ok_or_else(|| DeliveryError {
                client: client.clone(),
                reason: "client not connected".to_string(),
            })?;

        let frame = serde_json::json!({ "event": event, "data": payload }).to_string();
        sender
            .send(Message::Text(frame.into()))
            .map_err(|_| DeliveryError {
                client: client.clone(),
                reason: "outbound channel closed".to_string(),
            })
    }
}

fn session_token(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        pair.strip_prefix("session=")
            .filter(|token| !token.is_empty())
            .map(ToString::to_string)
    })
}
