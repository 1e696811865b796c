//! WebSocket alert stream.
//!
//! Clients connect to `/ws?token=...` and drive their subscriptions with
//! `{"event": "subscribe" | "unsubscribe", "channel": "..."}` messages.
//! Subscribing to `alerts` yields an immediate full snapshot; the periodic
//! broadcast then pushes recent alerts.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use fleetgate_auth::QueryTokenAuth;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};

use crate::alerts::{ALERTS_CHANNEL, ClientId};
use crate::server::AppState;

const INVALID_MESSAGE: &str = "Invalid message format";

/// A parsed client control message.
#[derive(Debug, PartialEq, Eq)]
enum ClientEvent {
    Subscribe(String),
    Unsubscribe(String),
    /// Valid JSON that is not a recognised command.
    Ignored,
}

fn parse_client_message(text: &str) -> Result<ClientEvent, serde_json::Error> {
    let message: Value = serde_json::from_str(text)?;
    let channel = message
        .get("channel")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty());

    Ok(match (message.get("event").and_then(Value::as_str), channel) {
        (Some("subscribe"), Some(channel)) => ClientEvent::Subscribe(channel.to_string()),
        (Some("unsubscribe"), Some(channel)) => ClientEvent::Unsubscribe(channel.to_string()),
        _ => ClientEvent::Ignored,
    })
}

pub async fn alerts_ws(
    State(state): State<AppState>,
    QueryTokenAuth(ctx): QueryTokenAuth,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::debug!(user = ?ctx.email(), "Alert stream connection authenticated");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let registry = Arc::clone(state.alerts.registry());
    let (id, mut outbound) = registry.register();
    let (mut ws_write, mut ws_read) = socket.split();

    tracing::debug!(client = %id, "Alert stream connected");

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                // `None` once the registry dropped this client.
                let Some(text) = queued else { break };
                if let Err(e) = ws_write.send(Message::Text(text.as_ref().into())).await {
                    tracing::debug!(client = %id, error = %e, "Alert stream write failed");
                    break;
                }
            }
            incoming = ws_read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = on_client_message(&state, id, text.as_str()).await {
                            if ws_write.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(client = %id, error = %e, "Alert stream read failed");
                        break;
                    }
                }
            }
        }
    }

    registry.remove(id);
    tracing::debug!(client = %id, "Alert stream disconnected");
}

/// Applies one client message and returns the direct reply, if any.
///
/// The `alerts` snapshot goes through the client's outbound queue.
async fn on_client_message(state: &AppState, id: ClientId, text: &str) -> Option<String> {
    let registry = state.alerts.registry();
    match parse_client_message(text) {
        Ok(ClientEvent::Subscribe(channel)) => {
            registry.subscribe(id, &channel);
            if channel == ALERTS_CHANNEL {
                let snapshot = state.alerts.fetch_alerts(true).await;
                // Queued behind any pending broadcast, like every push.
                registry.send(id, Arc::from(Value::Array(snapshot).to_string()));
            }
            None
        }
        Ok(ClientEvent::Unsubscribe(channel)) => {
            registry.unsubscribe(id, &channel);
            None
        }
        Ok(ClientEvent::Ignored) => None,
        Err(_) => Some(json!({ "error": INVALID_MESSAGE }).to_string()),
    }
}
