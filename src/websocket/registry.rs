//! Connection Registry
//!
//! Tracks every open relay socket, its role, and for consumers the
//! client-supplied key. All membership lives behind one lock, so each
//! operation sees and leaves a consistent view. Fan-out callers get a
//! snapshot of peers and send outside the lock.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Unique identifier for a relay connection
pub type ConnectionId = String;

/// Outbound queue of one connection; frames are shared between peers
pub type FrameSender = mpsc::UnboundedSender<Arc<str>>;

/// Role of a connection, set once by its announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unassigned,
    Device,
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Unassigned => write!(f, "unassigned"),
            Role::Device => write!(f, "device"),
            Role::Consumer => write!(f, "consumer"),
        }
    }
}

/// One open socket as the registry sees it
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub role: Role,
    pub consumer_key: Option<String>,
    pub opened_at: DateTime<Utc>,
    sender: FrameSender,
}

/// A live fan-out target
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: ConnectionId,
    sender: FrameSender,
}

impl Peer {
    /// Queue a frame; false when the connection's writer is gone
    pub fn send(&self, frame: Arc<str>) -> bool {
        self.sender.send(frame).is_ok()
    }
}

/// Configuration for the connection registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of concurrently open sockets
    pub max_connections: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
        }
    }
}

/// Connection counts for health output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub open: usize,
    pub devices: usize,
    pub consumers: usize,
}

#[derive(Default)]
struct Membership {
    connections: HashMap<ConnectionId, Connection>,
    devices: HashSet<ConnectionId>,
    consumers: HashMap<String, ConnectionId>,
}

impl Membership {
    fn peers<'a>(&self, ids: impl Iterator<Item = &'a ConnectionId>) -> Vec<Peer> {
        ids.filter_map(|id| self.connections.get(id))
            .map(|conn| Peer {
                id: conn.id.clone(),
                sender: conn.sender.clone(),
            })
            .collect()
    }

    fn unassigned_mut(&mut self, id: &str) -> Result<&mut Connection, RegistryError> {
        let conn = self
            .connections
            .get_mut(id)
            .ok_or(RegistryError::ConnectionNotFound)?;
        if conn.role != Role::Unassigned {
            return Err(RegistryError::RoleAlreadyAssigned(conn.role));
        }
        Ok(conn)
    }
}

/// Registry of open connections and their roles
pub struct ConnectionRegistry {
    inner: RwLock<Membership>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: RwLock::new(Membership::default()),
            config,
        }
    }

    /// Track a freshly accepted socket as `Unassigned`
    ///
    /// Unassigned connections are invisible to fan-out until they
    /// announce a role.
    pub async fn open(&self, sender: FrameSender) -> Result<ConnectionId, RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.connections.len() >= self.config.max_connections {
            return Err(RegistryError::TooManyConnections(self.config.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        inner.connections.insert(
            id.clone(),
            Connection {
                id: id.clone(),
                role: Role::Unassigned,
                consumer_key: None,
                opened_at: Utc::now(),
                sender,
            },
        );

        tracing::info!(connection_id = %id, "Relay connection opened");
        Ok(id)
    }

    /// Mark an unassigned connection as a device
    pub async fn register_device(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let conn = inner.unassigned_mut(id)?;
        conn.role = Role::Device;
        inner.devices.insert(id.to_string());

        tracing::info!(connection_id = %id, devices = inner.devices.len(), "Device registered");
        Ok(())
    }

    /// Mark an unassigned connection as a consumer under `key`
    ///
    /// A key already in use is taken over: the earlier connection stays
    /// open but is no longer reachable for fan-out. Its id is returned.
    pub async fn register_consumer(
        &self,
        id: &str,
        key: &str,
    ) -> Result<Option<ConnectionId>, RegistryError> {
        let mut inner = self.inner.write().await;
        let conn = inner.unassigned_mut(id)?;
        conn.role = Role::Consumer;
        conn.consumer_key = Some(key.to_string());

        let superseded = inner.consumers.insert(key.to_string(), id.to_string());
        if let Some(previous) = &superseded {
            tracing::warn!(
                connection_id = %id,
                superseded = %previous,
                key = %key,
                "Consumer key already registered, replacing earlier connection"
            );
        }

        tracing::info!(
            connection_id = %id,
            key = %key,
            consumers = inner.consumers.len(),
            "Consumer registered"
        );
        Ok(superseded)
    }

    /// Forget a connection; idempotent
    ///
    /// A consumer key mapping is only removed while it still points at
    /// this connection, so closing a superseded socket leaves its
    /// replacement registered. Returns the role the connection had.
    pub async fn unregister(&self, id: &str) -> Option<Role> {
        let mut inner = self.inner.write().await;
        let conn = inner.connections.remove(id)?;

        match conn.role {
            Role::Device => {
                inner.devices.remove(id);
            }
            Role::Consumer => {
                if let Some(key) = &conn.consumer_key {
                    if inner.consumers.get(key).map(String::as_str) == Some(id) {
                        inner.consumers.remove(key);
                    }
                }
            }
            Role::Unassigned => {}
        }

        tracing::info!(connection_id = %id, role = %conn.role, "Relay connection closed");
        Some(conn.role)
    }

    /// Current role, or None once the connection is gone
    pub async fn role(&self, id: &str) -> Option<Role> {
        self.inner.read().await.connections.get(id).map(|c| c.role)
    }

    /// Snapshot of registered devices, including ones whose writer has gone
    pub async fn devices(&self) -> Vec<Peer> {
        let inner = self.inner.read().await;
        inner.peers(inner.devices.iter())
    }

    /// Snapshot of consumers reachable by key, including ones whose writer has gone
    pub async fn consumers(&self) -> Vec<Peer> {
        let inner = self.inner.read().await;
        inner.peers(inner.consumers.values())
    }

    /// Visit every registered device; the lock is released before `f` runs
    pub async fn for_each_device<F: FnMut(&Peer)>(&self, f: F) {
        self.devices().await.iter().for_each(f);
    }

    /// Visit every registered consumer; the lock is released before `f` runs
    pub async fn for_each_consumer<F: FnMut(&Peer)>(&self, f: F) {
        self.consumers().await.iter().for_each(f);
    }

    /// Connection id currently registered under a consumer key
    pub async fn consumer_for_key(&self, key: &str) -> Option<ConnectionId> {
        self.inner.read().await.consumers.get(key).cloned()
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        RegistryStats {
            open: inner.connections.len(),
            devices: inner.devices.len(),
            consumers: inner.consumers.len(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

/// Errors returned by registry operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Connection already registered as {0}")]
    RoleAlreadyAssigned(Role),
}
