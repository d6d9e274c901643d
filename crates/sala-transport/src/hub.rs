//! The connection hub.
//!
//! The hub tracks every registered connection's outbound queue and which
//! room group each connection belongs to, and fans server events out to
//! them using lock-free data structures. Delivery is best effort: a
//! connection whose receiver is gone is skipped, and the socket task's
//! cleanup path unregisters it.

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use async_trait::async_trait;
use sala_core::{ConnectionId, RoomDelivery};
use sala_protocol::ServerEvent;

/// Hub statistics.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Number of registered connections.
    pub connection_count: usize,
    /// Number of active room groups.
    pub group_count: usize,
}

/// Registry of connection outboxes and room groups.
pub struct Hub {
    /// Outbound queues indexed by connection.
    outboxes: DashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>,
    /// Room group membership (room code -> connection ids).
    groups: DashMap<String, DashSet<ConnectionId>>,
    /// Reverse membership (connection id -> room codes).
    memberships: DashMap<ConnectionId, DashSet<String>>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            outboxes: DashMap::new(),
            groups: DashMap::new(),
            memberships: DashMap::new(),
        }
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connection_count: self.outboxes.len(),
            group_count: self.groups.len(),
        }
    }

    /// Register a connection and get the receiving end of its outbox.
    ///
    /// The socket task drains the receiver and writes each event to the
    /// wire. Registering an id again replaces the previous outbox.
    pub fn register(&self, conn: &ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.outboxes.insert(conn.clone(), tx).is_some() {
            warn!(connection = %conn, "Replaced existing outbox");
        }
        debug!(connection = %conn, "Connection registered");
        rx
    }

    /// Unregister a connection, leaving all of its groups.
    pub fn unregister(&self, conn: &ConnectionId) {
        self.outboxes.remove(conn);
        if let Some((_, rooms)) = self.memberships.remove(conn) {
            for room in rooms.iter() {
                self.remove_from_group(conn, room.as_str());
            }
        }
        debug!(connection = %conn, "Connection unregistered");
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_registered(&self, conn: &ConnectionId) -> bool {
        self.outboxes.contains_key(conn)
    }

    /// Get the number of connections in a room group.
    #[must_use]
    pub fn group_size(&self, room_code: &str) -> usize {
        self.groups.get(room_code).map(|g| g.len()).unwrap_or(0)
    }

    fn remove_from_group(&self, conn: &ConnectionId, room_code: &str) {
        if let Some(group) = self.groups.get(room_code) {
            group.remove(conn);
            // Empty groups are dropped eagerly.
            if group.is_empty() {
                drop(group);
                self.groups
                    .remove_if(room_code, |_, members| members.is_empty());
            }
        }
    }

    fn push(&self, conn: &ConnectionId, event: ServerEvent) {
        let Some(tx) = self.outboxes.get(conn) else {
            trace!(connection = %conn, "Dropping event for unknown connection");
            return;
        };
        if tx.send(event).is_err() {
            debug!(connection = %conn, "Outbox closed, dropping event");
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomDelivery for Hub {
    async fn join_group(&self, conn: &ConnectionId, room_code: &str) {
        self.groups
            .entry(room_code.to_string())
            .or_default()
            .insert(conn.clone());
        self.memberships
            .entry(conn.clone())
            .or_default()
            .insert(room_code.to_string());
        debug!(connection = %conn, room = %room_code, "Joined group");
    }

    async fn leave_group(&self, conn: &ConnectionId, room_code: &str) {
        if let Some(rooms) = self.memberships.get(conn) {
            rooms.remove(room_code);
        }
        self.remove_from_group(conn, room_code);
        debug!(connection = %conn, room = %room_code, "Left group");
    }

    async fn send_to_one(&self, conn: &ConnectionId, event: ServerEvent) {
        self.push(conn, event);
    }

    async fn broadcast_to_room(&self, room_code: &str, event: ServerEvent) {
        let Some(group) = self.groups.get(room_code) else {
            trace!(room = %room_code, "Broadcast to empty group");
            return;
        };
        let members: Vec<ConnectionId> = group.iter().map(|c| c.clone()).collect();
        drop(group);

        trace!(room = %room_code, recipients = members.len(), "Broadcasting");
        for conn in &members {
            self.push(conn, event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_event(text: &str) -> ServerEvent {
        ServerEvent::Error {
            message: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_join_broadcast() {
        let hub = Hub::new();
        let c1 = ConnectionId::new("c1");
        let c2 = ConnectionId::new("c2");

        let mut rx1 = hub.register(&c1);
        let mut rx2 = hub.register(&c2);
        hub.join_group(&c1, "ABC").await;
        hub.join_group(&c2, "ABC").await;
        assert_eq!(hub.group_size("ABC"), 2);

        hub.broadcast_to_room("ABC", error_event("hola")).await;
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_send_to_one_targets_single_connection() {
        let hub = Hub::new();
        let c1 = ConnectionId::new("c1");
        let c2 = ConnectionId::new("c2");
        let mut rx1 = hub.register(&c1);
        let mut rx2 = hub.register(&c2);

        hub.send_to_one(&c1, error_event("solo")).await;
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_group_stops_delivery() {
        let hub = Hub::new();
        let c1 = ConnectionId::new("c1");
        let mut rx1 = hub.register(&c1);
        hub.join_group(&c1, "ABC").await;
        hub.leave_group(&c1, "ABC").await;

        // Empty group is dropped.
        assert_eq!(hub.group_size("ABC"), 0);
        assert_eq!(hub.stats().group_count, 0);

        hub.broadcast_to_room("ABC", error_event("nadie")).await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_leaves_all_groups() {
        let hub = Hub::new();
        let c1 = ConnectionId::new("c1");
        let _rx1 = hub.register(&c1);
        hub.join_group(&c1, "AAA").await;
        hub.join_group(&c1, "BBB").await;

        hub.unregister(&c1);
        assert!(!hub.is_registered(&c1));
        assert_eq!(hub.group_size("AAA"), 0);
        assert_eq!(hub.group_size("BBB"), 0);
        assert_eq!(hub.stats().connection_count, 0);
    }

    #[tokio::test]
    async fn test_closed_outbox_is_skipped() {
        let hub = Hub::new();
        let c1 = ConnectionId::new("c1");
        let c2 = ConnectionId::new("c2");
        let rx1 = hub.register(&c1);
        let mut rx2 = hub.register(&c2);
        hub.join_group(&c1, "ABC").await;
        hub.join_group(&c2, "ABC").await;

        // c1's socket task died without unregistering.
        drop(rx1);

        hub.broadcast_to_room("ABC", error_event("sigue")).await;
        assert!(rx2.try_recv().is_ok());
    }
}
