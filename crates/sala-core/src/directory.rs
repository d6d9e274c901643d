//! Membership bookkeeping: ghosts, join records, and the live/ghost bridge.
//!
//! The directory owns the durable side of membership. A ghost participant
//! outlives disconnection and keeps the join timestamp stable across
//! reconnects; a join record is the replay cursor bounding which history a
//! returning participant receives. Live members live in the
//! [`Room`](crate::registry::Room) and are mutated here through `&mut Room`
//! so the single-writer-per-room discipline carries over.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::debug;

use crate::delivery::ConnectionId;
use crate::registry::{LiveMember, Room, RoomCode};
use sala_protocol::{PresenceEntry, STATUS_ACTIVE, STATUS_DISCONNECTED};

/// Key identifying a participant within a room, shared with the
/// reconnection tracker.
#[must_use]
pub fn participant_key(display_name: &str, room_code: &str) -> String {
    format!("{display_name}_{room_code}")
}

/// A participant record retained after disconnection.
#[derive(Debug, Clone)]
pub struct GhostParticipant {
    /// Presence status string.
    pub status: String,
    /// Whether the participant is currently connected.
    pub connected: bool,
    /// Last seen timestamp in unix milliseconds.
    pub last_seen: i64,
    /// First-join timestamp, stable across reconnections.
    pub joined_at: i64,
    /// Last known transport connection.
    pub handle: ConnectionId,
}

/// Facts about a join, consumed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// A live member was created (rather than updated in place).
    pub is_new_user: bool,
    /// The participant had previously left voluntarily and is returning.
    pub had_left_voluntarily: bool,
    /// This join created (or recreated) the join record; the participant
    /// starts fresh and receives no replay.
    pub first_time: bool,
    /// The replay cursor: history from this timestamp onward is relevant.
    pub joined_at: i64,
}

/// Per-room ghost registries and join records.
#[derive(Debug, Default)]
pub struct ParticipantDirectory {
    ghosts: DashMap<RoomCode, HashMap<String, GhostParticipant>>,
    join_records: DashMap<String, i64>,
}

impl ParticipantDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a ghost directory exists for a room code.
    pub fn ensure_room(&self, code: &str) {
        self.ghosts.entry(code.to_string()).or_default();
    }

    /// Check whether a ghost directory exists for a room code.
    ///
    /// A code that has ever had a participant keeps its directory until the
    /// room is destroyed, even when every ghost inside is disconnected.
    #[must_use]
    pub fn has_room(&self, code: &str) -> bool {
        self.ghosts.contains_key(code)
    }

    /// Drop a room's ghost directory and its join records.
    pub fn remove_room(&self, code: &str) {
        self.ghosts.remove(code);
        let suffix = format!("_{code}");
        self.join_records.retain(|key, _| !key.ends_with(&suffix));
    }

    /// Check whether a join record exists for a participant.
    #[must_use]
    pub fn has_join_record(&self, display_name: &str, code: &str) -> bool {
        self.join_records
            .contains_key(&participant_key(display_name, code))
    }

    /// Look at a room's ghost record for a display name.
    #[must_use]
    pub fn ghost(&self, code: &str, display_name: &str) -> Option<GhostParticipant> {
        self.ghosts
            .get(code)
            .and_then(|g| g.get(display_name).cloned())
    }

    /// Register a join, reconciling live and ghost state.
    ///
    /// Distinguishes three paths: a first-time join (ghost and record both
    /// created), a return after a voluntary leave (record recreated), and a
    /// reconnection (record intact, live member recreated). All paths
    /// refresh `last_seen`, `last_activity`, and the transport handle.
    pub fn join(
        &self,
        room: &mut Room,
        code: &str,
        display_name: &str,
        handle: ConnectionId,
        now: i64,
    ) -> JoinOutcome {
        let key = participant_key(display_name, code);
        let has_record = self.join_records.contains_key(&key);
        let ghost_exists = self
            .ghosts
            .get(code)
            .is_some_and(|g| g.contains_key(display_name));

        let had_left_voluntarily = ghost_exists && !has_record;
        let first_time = !has_record;

        let joined_at = if first_time {
            self.join_records.insert(key, now);
            debug!(room = %code, user = %display_name, "Join record created");
            now
        } else {
            self.join_records
                .get(&participant_key(display_name, code))
                .map(|r| *r)
                .unwrap_or(now)
        };

        let mut ghosts = self.ghosts.entry(code.to_string()).or_default();
        match ghosts.get_mut(display_name) {
            Some(ghost) => {
                ghost.connected = true;
                ghost.status = STATUS_ACTIVE.to_string();
                ghost.last_seen = now;
                ghost.joined_at = joined_at;
                ghost.handle = handle.clone();
            }
            None => {
                ghosts.insert(
                    display_name.to_string(),
                    GhostParticipant {
                        status: STATUS_ACTIVE.to_string(),
                        connected: true,
                        last_seen: now,
                        joined_at,
                        handle: handle.clone(),
                    },
                );
            }
        }
        drop(ghosts);

        let is_new_user = match room.member_mut(display_name) {
            Some(member) => {
                member.connected = true;
                member.status = STATUS_ACTIVE.to_string();
                member.last_activity = now;
                member.handle = handle;
                false
            }
            None => {
                room.insert_member(
                    display_name,
                    LiveMember {
                        status: STATUS_ACTIVE.to_string(),
                        typing: false,
                        connected: true,
                        last_activity: now,
                        handle,
                    },
                );
                true
            }
        };

        JoinOutcome {
            is_new_user,
            had_left_voluntarily,
            first_time,
            joined_at,
        }
    }

    /// Record an involuntary drop.
    ///
    /// The live member leaves the live set (a disconnect is equivalent to
    /// leaving it); the ghost is retained, marked disconnected. Returns
    /// whether the display name was live.
    pub fn mark_disconnected(
        &self,
        room: &mut Room,
        code: &str,
        display_name: &str,
        now: i64,
    ) -> bool {
        let was_live = room.remove_member(display_name).is_some();

        if let Some(mut ghosts) = self.ghosts.get_mut(code) {
            if let Some(ghost) = ghosts.get_mut(display_name) {
                ghost.connected = false;
                ghost.status = STATUS_DISCONNECTED.to_string();
                ghost.last_seen = now;
            }
        }

        if was_live {
            debug!(room = %code, user = %display_name, "Marked disconnected");
        }
        was_live
    }

    /// Record a deliberate exit.
    ///
    /// Removes the live member, the ghost, and the join record, so a later
    /// join by the same display name is treated as fresh. Returns whether
    /// the display name was live.
    pub fn leave_voluntarily(&self, room: &mut Room, code: &str, display_name: &str) -> bool {
        let was_live = room.remove_member(display_name).is_some();
        if !was_live {
            return false;
        }

        if let Some(mut ghosts) = self.ghosts.get_mut(code) {
            ghosts.remove(display_name);
        }
        self.join_records
            .remove(&participant_key(display_name, code));

        debug!(room = %code, user = %display_name, "Left voluntarily");
        true
    }

    /// Build the presence listing for a room.
    ///
    /// Live members come first, then ghosts with no live entry as
    /// disconnected rows, one entry per display name ever seen in the room.
    /// Returns the listing and the connected count, both sorted by name for
    /// consistent ordering.
    #[must_use]
    pub fn list_presence(&self, room: &Room, code: &str) -> (Vec<PresenceEntry>, usize) {
        let mut entries: Vec<PresenceEntry> = Vec::with_capacity(room.member_count());
        let mut connected_count = 0;

        for (name, member) in room.members() {
            let status = if member.connected {
                connected_count += 1;
                member.status.clone()
            } else {
                STATUS_DISCONNECTED.to_string()
            };
            entries.push(PresenceEntry {
                name: name.clone(),
                status,
                typing: member.typing,
                connected: member.connected,
                last_activity: member.last_activity,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut ghost_entries: Vec<PresenceEntry> = Vec::new();
        if let Some(ghosts) = self.ghosts.get(code) {
            for (name, ghost) in ghosts.iter() {
                if !room.is_member(name) {
                    ghost_entries.push(PresenceEntry {
                        name: name.clone(),
                        status: STATUS_DISCONNECTED.to_string(),
                        typing: false,
                        connected: false,
                        last_activity: ghost.last_seen,
                    });
                }
            }
        }
        ghost_entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries.extend(ghost_entries);

        (entries, connected_count)
    }

    /// Flip a live member's typing flag, refreshing activity. Returns
    /// whether the display name was live.
    pub fn set_typing(&self, room: &mut Room, display_name: &str, is_typing: bool, now: i64) -> bool {
        match room.member_mut(display_name) {
            Some(member) => {
                member.typing = is_typing;
                member.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Update a participant's status string on both the live member and the
    /// ghost.
    pub fn set_status(&self, room: &mut Room, code: &str, display_name: &str, status: &str, now: i64) {
        if let Some(member) = room.member_mut(display_name) {
            member.status = status.to_string();
            member.last_activity = now;
        }
        if let Some(mut ghosts) = self.ghosts.get_mut(code) {
            if let Some(ghost) = ghosts.get_mut(display_name) {
                ghost.status = status.to_string();
                ghost.last_seen = now;
            }
        }
    }
}
