//! Per-room append-only message history.
//!
//! Each room carries an ordered log of chat messages and system
//! notifications. Entries are appended with monotonic wall-clock timestamps
//! and never reordered or mutated, so a timestamp cursor is enough to
//! replay exactly the slice of history relevant to a participant's tenure.

use chrono::Local;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::registry::RoomCode;
use sala_protocol::{HistoryEntry, MessageStatus};

/// Length of the random id suffix.
const ID_SUFFIX_LEN: usize = 6;

/// Facts about a freshly appended chat message.
#[derive(Debug, Clone)]
pub struct AppendedMessage {
    /// Collision-resistant message id (`msg_{timestamp}_{suffix}`).
    pub id: String,
    /// Assigned timestamp in unix milliseconds.
    pub timestamp: i64,
    /// Display-formatted rendering.
    pub formatted: String,
}

/// Generate a collision-resistant message id from a timestamp and a random
/// suffix.
fn generate_message_id(timestamp: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("msg_{timestamp}_{suffix}")
}

/// Append-only history logs, one per room.
#[derive(Debug, Default)]
pub struct MessageHistoryStore {
    logs: DashMap<RoomCode, Vec<HistoryEntry>>,
}

impl MessageHistoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a log exists for a room code.
    pub fn ensure_room(&self, code: &str) {
        self.logs.entry(code.to_string()).or_default();
    }

    /// Drop a room's log.
    pub fn remove_room(&self, code: &str) {
        self.logs.remove(code);
    }

    /// Append an entry to a room's log, returning its timestamp.
    pub fn append(&self, code: &str, entry: HistoryEntry) -> i64 {
        let timestamp = entry.timestamp();
        self.logs.entry(code.to_string()).or_default().push(entry);
        timestamp
    }

    /// Construct, append, and return a chat message.
    ///
    /// The id combines the timestamp with a random suffix; the formatted
    /// rendering is `"{sender} [{HH:MM}]: {content}"` in local time. The
    /// delivery status label is always DELIVERED.
    pub fn chat_message(&self, code: &str, sender: &str, content: &str) -> AppendedMessage {
        let now = Local::now();
        let timestamp = now.timestamp_millis();
        let id = generate_message_id(timestamp);
        let formatted = format!("{sender} [{}]: {content}", now.format("%H:%M"));

        self.append(
            code,
            HistoryEntry::Chat {
                id: id.clone(),
                sender: sender.to_string(),
                timestamp,
                content: content.to_string(),
                formatted_content: formatted.clone(),
                status: MessageStatus::Delivered,
            },
        );

        AppendedMessage {
            id,
            timestamp,
            formatted,
        }
    }

    /// Append a system notification, returning its timestamp.
    pub fn notification(&self, code: &str, content: impl Into<String>) -> i64 {
        let timestamp = crate::time::now_millis();
        self.append(
            code,
            HistoryEntry::Notification {
                timestamp,
                content: content.into(),
            },
        )
    }

    /// Entries with `timestamp >= since`, in append order.
    ///
    /// The caller decides whether a replay applies at all; first-time
    /// joiners never get one.
    #[must_use]
    pub fn replay_since(&self, code: &str, since: i64) -> Vec<HistoryEntry> {
        let Some(log) = self.logs.get(code) else {
            return Vec::new();
        };
        let relevant: Vec<HistoryEntry> = log
            .iter()
            .filter(|entry| entry.timestamp() >= since)
            .cloned()
            .collect();
        debug!(
            room = %code,
            since,
            entries = relevant.len(),
            "History replay computed"
        );
        relevant
    }

    /// Check whether a room's log is empty (a missing log counts as empty).
    #[must_use]
    pub fn is_empty(&self, code: &str) -> bool {
        self.logs.get(code).map_or(true, |log| log.is_empty())
    }

    /// Number of entries in a room's log.
    #[must_use]
    pub fn len(&self, code: &str) -> usize {
        self.logs.get(code).map_or(0, |log| log.len())
    }
}
