//! Shared payload types carried inside events.

use serde::{Deserialize, Serialize};

/// Status string for a participant that is connected and active.
pub const STATUS_ACTIVE: &str = "activo";

/// Status string for a participant that has dropped off.
pub const STATUS_DISCONNECTED: &str = "desconectado";

/// Delivery status label attached to chat messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Error,
}

/// One entry in a room's append-only history log.
///
/// Entries are never reordered or mutated after append; insertion order is
/// chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HistoryEntry {
    /// A system notification (join/leave).
    #[serde(rename = "notification")]
    Notification {
        /// Unix timestamp in milliseconds.
        timestamp: i64,
        /// Notification text.
        content: String,
    },

    /// A chat message from a participant.
    #[serde(rename = "chat")]
    Chat {
        /// Collision-resistant message id.
        id: String,
        /// Display name of the sender.
        sender: String,
        /// Unix timestamp in milliseconds.
        timestamp: i64,
        /// Raw message text.
        content: String,
        /// Display-formatted rendering (`"{sender} [{HH:MM}]: {content}"`).
        #[serde(rename = "formattedContent")]
        formatted_content: String,
        /// Delivery status label.
        status: MessageStatus,
    },
}

impl HistoryEntry {
    /// Timestamp of the entry, regardless of variant.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        match self {
            HistoryEntry::Notification { timestamp, .. } | HistoryEntry::Chat { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

/// One row of a room's presence listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    /// Display name.
    pub name: String,
    /// Status string (`"activo"`, `"desconectado"`, or client-provided).
    pub status: String,
    /// Whether the participant is currently typing.
    pub typing: bool,
    /// Whether the participant is currently connected.
    pub connected: bool,
    /// Last activity timestamp in unix milliseconds.
    #[serde(rename = "lastActivity")]
    pub last_activity: i64,
}
