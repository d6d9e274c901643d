//! Reconnection tracking.
//!
//! A disconnect within the grace window is presumed transient; a join that
//! consumes a fresh record is a reconnection and suppresses the join
//! notification. Records expire on their own shortly after the window
//! closes so the map never accumulates stale keys.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Grace window during which a disconnect is presumed transient.
pub const RECONNECTION_WINDOW: Duration = Duration::from_millis(10_000);

/// Extra time a record is kept beyond the window before self-expiring.
pub const EXPIRY_SLACK: Duration = Duration::from_millis(1_000);

#[derive(Debug)]
struct DisconnectRecord {
    at: Instant,
    expiry: JoinHandle<()>,
}

/// Tracks recent involuntary disconnects by participant key.
#[derive(Debug)]
pub struct ReconnectionTracker {
    window: Duration,
    slack: Duration,
    records: Arc<DashMap<String, DisconnectRecord>>,
}

impl Default for ReconnectionTracker {
    fn default() -> Self {
        Self::new(RECONNECTION_WINDOW, EXPIRY_SLACK)
    }
}

impl ReconnectionTracker {
    /// Create a tracker with a custom window and expiry slack.
    #[must_use]
    pub fn new(window: Duration, slack: Duration) -> Self {
        Self {
            window,
            slack,
            records: Arc::new(DashMap::new()),
        }
    }

    /// Record a disconnect at the current time.
    ///
    /// Arms a one-shot expiry at window + slack; a newer record for the same
    /// key supersedes the old one and its expiry.
    pub fn record_disconnect(&self, key: impl Into<String>) {
        let key = key.into();
        let records = Arc::clone(&self.records);
        let ttl = self.window + self.slack;
        let expiry_key = key.clone();
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if records.remove(&expiry_key).is_some() {
                debug!(key = %expiry_key, "Reconnection record expired");
            }
        });

        if let Some(old) = self.records.insert(
            key,
            DisconnectRecord {
                at: Instant::now(),
                expiry,
            },
        ) {
            old.expiry.abort();
        }
    }

    /// Consume a fresh disconnect record, if one exists.
    ///
    /// Returns true iff a record exists and is younger than the grace
    /// window. A successful check removes the record, so a reconnection is
    /// recognized at most once per disconnect.
    pub fn take_recent(&self, key: &str) -> bool {
        let fresh = self
            .records
            .get(key)
            .is_some_and(|record| record.at.elapsed() < self.window);

        if fresh {
            if let Some((_, record)) = self.records.remove(key) {
                record.expiry.abort();
                debug!(key = %key, "Reconnection detected");
            }
        }
        fresh
    }

    /// Number of outstanding records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check whether no records are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
