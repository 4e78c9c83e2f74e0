//! Live connection tracking and outbound routing

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};

use super::coordinator::CoordinatorHandle;
use super::protocol::ServerMessage;

/// A registered client connection
#[derive(Clone)]
pub struct Connection {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub handle: CoordinatorHandle,
    /// Send capability toward the client's socket
    pub outbound: mpsc::Sender<ServerMessage>,
}

impl Connection {
    pub fn new(handle: CoordinatorHandle, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: handle.connection_id().to_string(),
            created_at: Utc::now(),
            handle,
            outbound,
        }
    }
}

/// All live connections, keyed by connection id
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Connection>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection: Connection) {
        let id = connection.id.clone();
        let replaced = self.connections.write().await.insert(id.clone(), connection);
        if let Some(previous) = replaced {
            tracing::warn!(connection_id = %id, "connection id reused, tearing down previous");
            previous.handle.disconnect();
        }
        tracing::debug!(connection_id = %id, "connection registered");
    }

    /// Remove a connection and tear it down
    ///
    /// Returns false if it was already gone; teardown runs once per connection.
    pub async fn unregister(&self, id: &str) -> bool {
        let removed = self.connections.write().await.remove(id);
        match removed {
            Some(connection) => {
                connection.handle.disconnect();
                tracing::info!(
                    connection_id = %id,
                    age_secs = (Utc::now() - connection.created_at).num_seconds(),
                    "connection unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Look up a connection; `None` means it is gone
    pub async fn get(&self, id: &str) -> Option<Connection> {
        self.connections.read().await.get(id).cloned()
    }

    /// Best-effort send to every connection
    ///
    /// Never waits on a client: a full outbound queue skips that client, a
    /// closed one gets it unregistered. Returns the number of deliveries.
    pub async fn broadcast(&self, message: &ServerMessage) -> usize {
        let targets: Vec<(String, mpsc::Sender<ServerMessage>)> = self
            .connections
            .read()
            .await
            .values()
            .map(|c| (c.id.clone(), c.outbound.clone()))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, outbound) in targets {
            match outbound.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %id, kind = message.kind(), "outbound queue full, broadcast skipped");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!(connection_id = %id, kind = message.kind(), "broadcast send failed");
                    dead.push(id);
                }
            }
        }

        for id in dead {
            self.unregister(&id).await;
        }
        delivered
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }
}
