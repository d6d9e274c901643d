//! # sala-protocol
//!
//! Wire event definitions for the Sala chat coordinator.
//!
//! Events are JSON objects tagged by a `type` field, one event per text
//! frame. The names and payload shapes are a stable contract shared with
//! clients:
//!
//! - inbound: `joinRoom`, `sendMessage`, `leaveRoom`, `typing`,
//!   `stopTyping`, `updateStatus`
//! - outbound: `message`, `messageHistory`, `userList`, `typingStatus`,
//!   `error`

pub mod codec;
pub mod events;
pub mod types;

pub use codec::{decode_client_event, encode_server_event, ProtocolError};
pub use events::{resolve_display_name, ClientEvent, ServerEvent};
pub use types::{HistoryEntry, MessageStatus, PresenceEntry, STATUS_ACTIVE, STATUS_DISCONNECTED};
