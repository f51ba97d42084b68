//! Connection registry and capacity slots.
//!
//! A slot is reserved before the WebSocket upgrade completes and released
//! when its [`SlotGuard`] drops, so every exit path of a connection gives
//! the slot back exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

/// What the registry knows about an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
}

/// Open connections, capped at `max_connections`.
#[derive(Debug)]
pub struct ConnectionRegistry {
    max_connections: usize,
    reserved: AtomicUsize,
    connections: Mutex<HashMap<String, ConnectionInfo>>,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            reserved: AtomicUsize::new(0),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a slot, or `None` when the registry is full.
    pub fn try_reserve(self: &Arc<Self>) -> Option<SlotGuard> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_connections).then_some(n + 1)
            })
            .ok()?;
        Some(SlotGuard {
            registry: Arc::clone(self),
            connection_id: None,
        })
    }

    /// Reserved slots, including connections still upgrading.
    pub fn active_connections(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Registered connection ids.
    pub fn connection_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn get(&self, connection_id: &str) -> Option<ConnectionInfo> {
        self.lock().get(connection_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConnectionInfo>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A reserved connection slot.
#[derive(Debug)]
pub struct SlotGuard {
    registry: Arc<ConnectionRegistry>,
    connection_id: Option<String>,
}

impl SlotGuard {
    /// Record the connection in the registry once it is open.
    pub fn register(&mut self, connection_id: &str, user_id: &str) {
        self.registry.lock().insert(
            connection_id.to_string(),
            ConnectionInfo {
                user_id: user_id.to_string(),
                connected_at: Utc::now(),
            },
        );
        self.connection_id = Some(connection_id.to_string());
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(id) = self.connection_id.take() {
            self.registry.lock().remove(&id);
        }
        self.registry.reserved.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_up_to_capacity() {
        let registry = Arc::new(ConnectionRegistry::new(2));
        let a = registry.try_reserve().unwrap();
        let _b = registry.try_reserve().unwrap();
        assert!(registry.try_reserve().is_none());
        assert_eq!(registry.active_connections(), 2);

        drop(a);
        assert_eq!(registry.active_connections(), 1);
        assert!(registry.try_reserve().is_some());
    }

    #[test]
    fn test_register_and_release() {
        let registry = Arc::new(ConnectionRegistry::new(10));
        let mut slot = registry.try_reserve().unwrap();
        slot.register("conn-1", "user-1");
        assert_eq!(registry.connection_ids(), vec!["conn-1".to_string()]);
        assert_eq!(registry.get("conn-1").unwrap().user_id, "user-1");

        drop(slot);
        assert!(registry.connection_ids().is_empty());
        assert_eq!(registry.active_connections(), 0);
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let registry = Arc::new(ConnectionRegistry::new(0));
        assert!(registry.try_reserve().is_none());
        assert_eq!(registry.active_connections(), 0);
    }
}
