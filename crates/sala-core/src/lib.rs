//! # sala-core
//!
//! Presence, membership, and history-replay coordination for the Sala
//! multi-room chat service.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **RoomRegistry** - room lifecycle and live membership
//! - **ParticipantDirectory** - ghost registry and join records
//! - **MessageHistoryStore** - per-room append-only history with a replay cursor
//! - **ReconnectionTracker** - transient-drop detection within a grace window
//! - **ChatService** - the orchestrator driving notifications and broadcasts
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│ ChatService │────▶│ RoomDelivery│
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!              ┌─────────────┼────────────────┐
//!              ▼             ▼                ▼
//!       ┌────────────┐ ┌────────────┐ ┌──────────────┐
//!       │  Registry  │ │ Directory  │ │ HistoryStore │
//!       └────────────┘ └────────────┘ └──────────────┘
//! ```
//!
//! The transport layer is a collaborator behind the [`RoomDelivery`] trait;
//! this crate owns every room/user/message decision above it.

pub mod delivery;
pub mod directory;
pub mod history;
pub mod reconnect;
pub mod registry;
pub mod service;
pub mod time;
pub mod typing;

pub use delivery::{ConnectionId, RoomDelivery};
pub use directory::{participant_key, GhostParticipant, JoinOutcome, ParticipantDirectory};
pub use history::{AppendedMessage, MessageHistoryStore};
pub use reconnect::ReconnectionTracker;
pub use registry::{LiveMember, Room, RoomCode, RoomRegistry};
pub use service::{ChatConfig, ChatService, ServiceStats};
pub use typing::{ConnContext, TypingTimer};
