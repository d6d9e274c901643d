//! Room lifecycle and live membership.
//!
//! A [`Room`] holds the live member map for one room code. The
//! [`RoomRegistry`] is the sole owner of room lifetime: rooms are created on
//! first join and removed only through the registry once both the live set
//! and the history log are empty.

use std::collections::HashMap;

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::delivery::ConnectionId;

/// A room identifier.
pub type RoomCode = String;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The room already exists; callers must check before creating.
    #[error("Room already exists: {0}")]
    AlreadyExists(String),
}

/// A member currently in a room's live set.
#[derive(Debug, Clone)]
pub struct LiveMember {
    /// Presence status string.
    pub status: String,
    /// Whether the member is currently typing.
    pub typing: bool,
    /// Whether the member is connected. Disconnects remove the member from
    /// the live set, so this is true for every live entry.
    pub connected: bool,
    /// Last activity timestamp in unix milliseconds.
    pub last_activity: i64,
    /// The current transport connection, replaced on reconnection.
    pub handle: ConnectionId,
}

/// A room's live membership state.
#[derive(Debug)]
pub struct Room {
    code: RoomCode,
    members: HashMap<String, LiveMember>,
}

impl Room {
    fn new(code: impl Into<RoomCode>) -> Self {
        Self {
            code: code.into(),
            members: HashMap::new(),
        }
    }

    /// Get the room code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Number of live members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check whether a display name is in the live set.
    #[must_use]
    pub fn is_member(&self, display_name: &str) -> bool {
        self.members.contains_key(display_name)
    }

    /// Get a live member.
    #[must_use]
    pub fn member(&self, display_name: &str) -> Option<&LiveMember> {
        self.members.get(display_name)
    }

    /// Get a live member mutably.
    pub fn member_mut(&mut self, display_name: &str) -> Option<&mut LiveMember> {
        self.members.get_mut(display_name)
    }

    /// Insert or replace a live member.
    pub fn insert_member(&mut self, display_name: impl Into<String>, member: LiveMember) {
        self.members.insert(display_name.into(), member);
    }

    /// Remove a live member, returning it if present.
    pub fn remove_member(&mut self, display_name: &str) -> Option<LiveMember> {
        self.members.remove(display_name)
    }

    /// Iterate over live members.
    pub fn members(&self) -> impl Iterator<Item = (&String, &LiveMember)> {
        self.members.iter()
    }

    /// Check if the live set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// The room registry.
///
/// Rooms are indexed by code; cross-room access is lock-free, while
/// per-room mutation goes through [`RoomRegistry::with_room`] so a room is
/// only ever touched by one writer at a time.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomCode, Room>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a room is currently open.
    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    /// Number of open rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Total live members across all rooms.
    #[must_use]
    pub fn total_members(&self) -> usize {
        self.rooms.iter().map(|r| r.member_count()).sum()
    }

    /// Create a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the room already exists; callers are expected to
    /// check [`RoomRegistry::contains`] first.
    pub fn create(&self, code: impl Into<RoomCode>) -> Result<(), RegistryError> {
        let code = code.into();
        if self.rooms.contains_key(&code) {
            return Err(RegistryError::AlreadyExists(code));
        }
        debug!(room = %code, "Creating room");
        self.rooms.insert(code.clone(), Room::new(code));
        Ok(())
    }

    /// Run a closure against a room's state, if the room exists.
    pub fn with_room<R>(&self, code: &str, f: impl FnOnce(&mut Room) -> R) -> Option<R> {
        self.rooms.get_mut(code).map(|mut room| f(&mut room))
    }

    /// Remove a room outright. Only the destroy-if-empty path calls this.
    pub fn remove(&self, code: &str) -> Option<Room> {
        self.rooms.remove(code).map(|(_, room)| room)
    }
}
