//! The table of live connections, shared with the operator console.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mazenet_protocol::EntityId;
use mazenet_transport::ConnectionId;

use crate::SessionState;

/// A console-facing summary of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub state: SessionState,
    pub name: Option<String>,
    pub entity: Option<EntityId>,
    /// Move intents accepted from this connection.
    pub moves: u64,
}

/// Shared registry of live sessions, keyed by connection.
///
/// Cloning is cheap; every clone sees the same table. Sessions update
/// their own entry on every transition and remove it when they close.
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<BTreeMap<ConnectionId, ConnectionInfo>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, ConnectionInfo>> {
        // Entries are replaced whole, so a poisoned table is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn upsert(&self, info: ConnectionInfo) {
        self.lock().insert(info.id, info);
    }

    pub(crate) fn remove(&self, id: ConnectionId) {
        self.lock().remove(&id);
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.lock().get(&id).cloned()
    }

    /// Every live connection, ordered by id.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
