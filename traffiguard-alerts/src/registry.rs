//! Registry of live, location-tagged connections.
//!
//! Each connection owns a bounded mpsc receiver; the registry keeps the
//! matching sender. Fan-out never iterates the live map: callers take a
//! [`ConnectionRegistry::snapshot`] and work on the copy, so slow sends
//! never hold the lock that connect/disconnect need.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::geo::Coordinate;
use crate::protocol::AlertMessage;

/// Outbound sink for one connection.
pub type AlertSender = mpsc::Sender<AlertMessage>;

/// Receiving half handed back to the transport.
pub type AlertReceiver = mpsc::Receiver<AlertMessage>;

/// Opaque identifier of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionHandle(Uuid);

impl ConnectionHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0.simple())
    }
}

/// One element of a registry snapshot.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub handle: ConnectionHandle,
    pub location: Coordinate,
    pub channel: AlertSender,
}

#[derive(Debug, Clone)]
struct Registration {
    location: Coordinate,
    channel: AlertSender,
}

/// Registry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_connections: u64,
    pub active_connections: usize,
}

pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionHandle, Registration>>,
    /// Lifetime count, read without the lock
    total_connections: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            total_connections: AtomicU64::new(0),
        }
    }

    /// Register a connection at `location`. Never fails.
    pub async fn add(&self, location: Coordinate, channel: AlertSender) -> ConnectionHandle {
        let handle = ConnectionHandle::new();
        {
            let mut connections = self.connections.write().await;
            connections.insert(handle, Registration { location, channel });
        }
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        log::debug!("Registered {handle} at {location}");
        handle
    }

    /// Convenience: create a channel of `capacity` and register its sender.
    pub async fn open(&self, location: Coordinate, capacity: usize) -> (ConnectionHandle, AlertReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = self.add(location, tx).await;
        (handle, rx)
    }

    /// Remove a connection. Unknown or already-removed handles are ignored.
    ///
    /// Returns `true` only for the call that actually removed the entry.
    pub async fn remove(&self, handle: ConnectionHandle) -> bool {
        let removed = self.connections.write().await.remove(&handle).is_some();
        if removed {
            log::debug!("Unregistered {handle}");
        }
        removed
    }

    /// Point-in-time copy of every registered connection.
    pub async fn snapshot(&self) -> Vec<ConnectionEntry> {
        let connections = self.connections.read().await;
        connections
            .iter()
            .map(|(handle, reg)| ConnectionEntry {
                handle: *handle,
                location: reg.location,
                channel: reg.channel.clone(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn contains(&self, handle: ConnectionHandle) -> bool {
        self.connections.read().await.contains_key(&handle)
    }

    /// Location a connection registered with, if still present.
    pub async fn location_of(&self, handle: ConnectionHandle) -> Option<Coordinate> {
        self.connections.read().await.get(&handle).map(|r| r.location)
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.len().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn origin() -> Coordinate {
        Coordinate::new(0.0, 0.0)
    }

    #[tokio::test]
    async fn test_add_remove() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.open(origin(), 8).await;

        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(handle).await);

        assert!(registry.remove(handle).await);
        assert!(registry.is_empty().await);
        assert!(!registry.contains(handle).await);
        assert!(registry.snapshot().await.iter().all(|e| e.handle != handle));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (keep, _rx1) = registry.open(origin(), 8).await;
        let (gone, _rx2) = registry.open(origin(), 8).await;

        assert!(registry.remove(gone).await);
        assert!(!registry.remove(gone).await);
        assert!(!registry.remove(gone).await);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].handle, keep);
    }

    #[tokio::test]
    async fn test_remove_unknown_handle() {
        let registry = ConnectionRegistry::new();
        let (_handle, _rx) = registry.open(origin(), 8).await;
        assert!(!registry.remove(ConnectionHandle::new()).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_decoupled() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = registry.open(Coordinate::new(1.0, 1.0), 8).await;
        let (b, _rx_b) = registry.open(Coordinate::new(2.0, 2.0), 8).await;

        let snapshot = registry.snapshot().await;

        registry.remove(a).await;
        let (c, _rx_c) = registry.open(Coordinate::new(3.0, 3.0), 8).await;

        let handles: Vec<_> = snapshot.iter().map(|e| e.handle).collect();
        assert_eq!(handles.len(), 2);
        assert!(handles.contains(&a));
        assert!(handles.contains(&b));
        assert!(!handles.contains(&c));
    }

    #[tokio::test]
    async fn test_snapshot_channels_deliver() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx) = registry.open(Coordinate::new(5.0, 6.0), 8).await;

        let snapshot = registry.snapshot().await;
        let entry = &snapshot[0];
        assert_eq!(entry.handle, handle);
        assert_eq!(entry.location, Coordinate::new(5.0, 6.0));

        let alert = AlertMessage::new(7, Coordinate::new(5.0, 6.0), "debris");
        entry.channel.send(alert.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), alert);
    }

    #[tokio::test]
    async fn test_broken_channel_stays_registered() {
        let registry = ConnectionRegistry::new();
        let (handle, rx) = registry.open(origin(), 8).await;
        drop(rx);

        // Removal is the transport's job, not a side effect of a dead sink
        let snapshot = registry.snapshot().await;
        assert!(snapshot[0].channel.is_closed());
        assert!(registry.contains(handle).await);
    }

    #[tokio::test]
    async fn test_concurrent_add_remove() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();

        for i in 0..64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (handle, _rx) = registry.open(Coordinate::new(i as f64 * 0.1, 0.0), 4).await;
                let _ = registry.snapshot().await;
                if i % 2 == 0 {
                    registry.remove(handle).await;
                }
                handle
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.len().await, 32);
        let stats = registry.stats().await;
        assert_eq!(stats.total_connections, 64);
        assert_eq!(stats.active_connections, 32);
    }

    #[tokio::test]
    async fn test_location_of() {
        let registry = ConnectionRegistry::new();
        let here = Coordinate::new(12.97, 77.59);
        let (handle, _rx) = registry.open(here, 1).await;
        assert_eq!(registry.location_of(handle).await, Some(here));
        registry.remove(handle).await;
        assert_eq!(registry.location_of(handle).await, None);
    }

    #[test]
    fn test_handle_display() {
        let handle = ConnectionHandle::new();
        let shown = handle.to_string();
        assert!(shown.starts_with("conn-"));
        assert_eq!(shown.len(), "conn-".len() + 32);
    }
}
