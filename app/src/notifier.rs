// ==============================================================================
// notifier.rs - Completion Notifier
// ==============================================================================
// Description: User -> live connection registry and completion event delivery
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================
// Delivery is fire-and-forget. A user has at most one live connection; a new
// connection supersedes the previous one. Events for users without a live
// connection are dropped.
// ==============================================================================

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::CompletionEvent;

/// Redis pub/sub channel carrying completion events from workers to gateways
pub const COMPLETIONS_CHANNEL: &str = "sales:completions";

/// Event name used on the live connection
pub const PROCESS_COMPLETED: &str = "process-completed";

pub type ConnectionId = Uuid;

/// Mapping from user id to their single active connection
pub trait ConnectionRegistry: Send + Sync {
    /// Returns the connection this one superseded, if any
    fn register(&self, user_id: &str, connection: ConnectionId) -> Option<ConnectionId>;

    fn lookup(&self, user_id: &str) -> Option<ConnectionId>;

    fn unregister(&self, user_id: &str) -> Option<ConnectionId>;

    /// Remove the mapping only if it still points at `connection`
    fn unregister_if(&self, user_id: &str, connection: ConnectionId) -> bool;
}

#[derive(Default)]
pub struct MemoryConnectionRegistry {
    connections: DashMap<String, ConnectionId>,
}

impl MemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionRegistry for MemoryConnectionRegistry {
    fn register(&self, user_id: &str, connection: ConnectionId) -> Option<ConnectionId> {
        self.connections.insert(user_id.to_string(), connection)
    }

    fn lookup(&self, user_id: &str) -> Option<ConnectionId> {
        self.connections.get(user_id).map(|entry| *entry.value())
    }

    fn unregister(&self, user_id: &str) -> Option<ConnectionId> {
        self.connections.remove(user_id).map(|(_, connection)| connection)
    }

    fn unregister_if(&self, user_id: &str, connection: ConnectionId) -> bool {
        self.connections
            .remove_if(user_id, |_, current| *current == connection)
            .is_some()
    }
}

/// Anything that can deliver a completion event to a user
#[async_trait]
pub trait CompletionSink: Send + Sync {
    /// Returns whether the event reached a live connection (or subscriber)
    async fn notify(&self, user_id: &str, event: &CompletionEvent) -> Result<bool, StoreError>;
}

/// Receiving half of a registered live connection
pub struct LiveConnection {
    pub id: ConnectionId,
    pub events: mpsc::UnboundedReceiver<CompletionEvent>,
}

/// In-process notifier owning the registry and each connection's sender
pub struct CompletionNotifier {
    registry: Arc<dyn ConnectionRegistry>,
    channels: DashMap<ConnectionId, mpsc::UnboundedSender<CompletionEvent>>,
}

impl CompletionNotifier {
    pub fn new(registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self {
            registry,
            channels: DashMap::new(),
        }
    }

    /// Register a new live connection for `user_id`, superseding any prior one
    pub fn connect(&self, user_id: &str) -> LiveConnection {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(id, tx);

        if let Some(previous) = self.registry.register(user_id, id) {
            // Dropping the sender ends the superseded connection's stream
            self.channels.remove(&previous);
            debug!("Connection {} for user {} superseded by {}", previous, user_id, id);
        }

        LiveConnection { id, events: rx }
    }

    pub fn disconnect(&self, user_id: &str, connection: ConnectionId) {
        self.registry.unregister_if(user_id, connection);
        self.channels.remove(&connection);
    }

    /// Push an event to the user's live connection. Returns false if dropped.
    pub fn push(&self, user_id: &str, event: &CompletionEvent) -> bool {
        let Some(connection) = self.registry.lookup(user_id) else {
            debug!("No live connection for user {}, dropping event", user_id);
            return false;
        };

        match self.channels.get(&connection) {
            Some(sender) => sender.send(event.clone()).is_ok(),
            None => false,
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.registry.lookup(user_id).is_some()
    }
}

impl Default for CompletionNotifier {
    fn default() -> Self {
        Self::new(Arc::new(MemoryConnectionRegistry::new()))
    }
}

#[async_trait]
impl CompletionSink for CompletionNotifier {
    async fn notify(&self, user_id: &str, event: &CompletionEvent) -> Result<bool, StoreError> {
        Ok(self.push(user_id, event))
    }
}

/// Message published on `COMPLETIONS_CHANNEL`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    pub user_id: String,
    pub event: CompletionEvent,
}

/// Publishes completion events for gateways subscribed to the channel
#[derive(Clone)]
pub struct RedisCompletionPublisher {
    conn: ConnectionManager,
}

impl RedisCompletionPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CompletionSink for RedisCompletionPublisher {
    async fn notify(&self, user_id: &str, event: &CompletionEvent) -> Result<bool, StoreError> {
        let message = CompletionMessage {
            user_id: user_id.to_string(),
            event: event.clone(),
        };
        let payload = serde_json::to_string(&message)?;
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(COMPLETIONS_CHANNEL, payload).await?;
        Ok(receivers > 0)
    }
}
