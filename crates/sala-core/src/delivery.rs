//! The delivery capability consumed from the transport layer.
//!
//! The coordinator never talks to sockets directly; everything it needs from
//! the transport is the small capability set below, implemented by an
//! in-process hub (or a recording stub in tests).

use std::fmt;

use async_trait::async_trait;
use sala_protocol::ServerEvent;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self(format!("conn_{timestamp:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Fire-and-forget delivery to connections and room groups.
///
/// Delivery is best-effort: sending to a closing connection is dropped
/// silently, never surfaced as an error to the coordinator.
#[async_trait]
pub trait RoomDelivery: Send + Sync {
    /// Associate a connection with a room's transport group.
    async fn join_group(&self, conn: &ConnectionId, room_code: &str);

    /// Remove a connection from a room's transport group.
    async fn leave_group(&self, conn: &ConnectionId, room_code: &str);

    /// Deliver an event to a single connection.
    async fn send_to_one(&self, conn: &ConnectionId, event: ServerEvent);

    /// Deliver an event to every connection in a room's transport group.
    async fn broadcast_to_room(&self, room_code: &str, event: ServerEvent);
}
