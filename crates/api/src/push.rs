//! Live push of evaluation results to connected websocket clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use gatehouse_auth::Principal;
use gatehouse_core::UserId;
use gatehouse_infra::EvaluatedSubmission;

use crate::app::services::AppServices;

pub type ConnectionId = u64;

/// Open connections per user. A user may hold several (one per tab).
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: RwLock<HashMap<UserId, HashMap<ConnectionId, UnboundedSender<String>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for `user`; payloads for it arrive on the
    /// returned receiver.
    pub fn register(&self, user: UserId) -> (ConnectionId, UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user)
            .or_default()
            .insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, user: UserId, id: ConnectionId) {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(user_connections) = connections.get_mut(&user) {
            user_connections.remove(&id);
            if user_connections.is_empty() {
                connections.remove(&user);
            }
        }
    }

    /// Queue `payload` on every live connection of `user`. Returns how many
    /// connections took it; closed ones are dropped.
    pub fn send_to_user(&self, user: UserId, payload: &str) -> usize {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        let Some(user_connections) = connections.get_mut(&user) else {
            return 0;
        };

        user_connections.retain(|_, tx| tx.send(payload.to_string()).is_ok());
        let delivered = user_connections.len();
        if delivered == 0 {
            connections.remove(&user);
        }
        delivered
    }

    #[cfg(test)]
    fn connection_count(&self, user: UserId) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .map_or(0, HashMap::len)
    }
}

/// GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
) -> Response {
    let registry = services.registry.clone();
    let user = principal.subject_id();
    ws.on_upgrade(move |socket| serve_socket(socket, registry, user))
}

async fn serve_socket(socket: WebSocket, registry: Arc<ConnectionRegistry>, user: UserId) {
    let (id, mut rx) = registry.register(user);
    tracing::info!(user_id = %user, connection_id = id, "websocket connected");

    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames carry nothing; drain until the client goes away.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.unregister(user, id);
    tracing::info!(user_id = %user, connection_id = id, "websocket disconnected");
}

/// Route one evaluation result to its recipient.
pub fn deliver(registry: &ConnectionRegistry, event: &EvaluatedSubmission) -> usize {
    let Some(user) = event.recipient() else {
        tracing::warn!(user_id = %event.user_id, "evaluation result without a numeric user id");
        return 0;
    };

    let payload = match serde_json::to_string(event) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode evaluation result");
            return 0;
        }
    };

    let delivered = registry.send_to_user(user, &payload);
    tracing::debug!(user_id = %user, submission_id = %event.submission_id, delivered, "evaluation result pushed");
    delivered
}

/// Drain `rx` into the registry until the sender side closes.
pub fn spawn_bridge(
    registry: Arc<ConnectionRegistry>,
    mut rx: UnboundedReceiver<EvaluatedSubmission>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            deliver(&registry, &event);
        }
        tracing::info!("evaluation bridge stopped");
    })
}

/// Subscribe to evaluation results on Redis and push them to clients.
#[cfg(feature = "redis")]
pub fn start_evaluation_bridge(
    redis_url: &str,
    registry: Arc<ConnectionRegistry>,
) -> anyhow::Result<JoinHandle<()>> {
    let subscriber = gatehouse_infra::pubsub::EvaluationSubscriber::new(redis_url)?;
    let (tx, rx) = mpsc::unbounded_channel();
    subscriber.spawn(tx);
    Ok(spawn_bridge(registry, rx))
}
