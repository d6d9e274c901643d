//! Inbound and outbound event types.
//!
//! Each direction is a single serde enum internally tagged by `type`, so a
//! decoded frame is already dispatched by variant.

use serde::{Deserialize, Serialize};

use crate::types::{HistoryEntry, MessageStatus, PresenceEntry};

/// Resolve the display name for an event.
///
/// An explicit `displayName` wins; otherwise the substring of `userName`
/// before the first `_` separator is used.
#[must_use]
pub fn resolve_display_name(user_name: &str, display_name: Option<&str>) -> String {
    match display_name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => user_name
            .split('_')
            .next()
            .unwrap_or(user_name)
            .to_string(),
    }
}

/// An event received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Join (or create) a room.
    #[serde(rename = "joinRoom")]
    JoinRoom {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },

    /// Send a chat message to the current room.
    #[serde(rename = "sendMessage")]
    SendMessage {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        message: String,
    },

    /// Leave a room voluntarily.
    #[serde(rename = "leaveRoom")]
    LeaveRoom {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },

    /// The client started typing.
    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },

    /// The client stopped typing.
    #[serde(rename = "stopTyping")]
    StopTyping {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },

    /// Update the client's presence status.
    #[serde(rename = "updateStatus")]
    UpdateStatus {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
}

impl ClientEvent {
    /// Room code the event refers to.
    #[must_use]
    pub fn room_code(&self) -> &str {
        match self {
            ClientEvent::JoinRoom { room_code, .. }
            | ClientEvent::SendMessage { room_code, .. }
            | ClientEvent::LeaveRoom { room_code, .. }
            | ClientEvent::Typing { room_code, .. }
            | ClientEvent::StopTyping { room_code, .. }
            | ClientEvent::UpdateStatus { room_code, .. } => room_code,
        }
    }

    /// Resolved display name for the event's sender.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ClientEvent::JoinRoom {
                user_name,
                display_name,
                ..
            }
            | ClientEvent::SendMessage {
                user_name,
                display_name,
                ..
            }
            | ClientEvent::LeaveRoom {
                user_name,
                display_name,
                ..
            }
            | ClientEvent::Typing {
                user_name,
                display_name,
                ..
            }
            | ClientEvent::StopTyping {
                user_name,
                display_name,
                ..
            }
            | ClientEvent::UpdateStatus {
                user_name,
                display_name,
                ..
            } => resolve_display_name(user_name, display_name.as_deref()),
        }
    }
}

/// An event emitted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A chat message or system notification broadcast to a room.
    ///
    /// Notifications carry only `message` and `timestamp`; chat messages
    /// also carry `id`, `sender`, and `status`.
    #[serde(rename = "message")]
    Message {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<MessageStatus>,
        message: String,
    },

    /// History replay sent to a single joining connection.
    #[serde(rename = "messageHistory")]
    MessageHistory {
        #[serde(rename = "roomCode")]
        room_code: String,
        messages: Vec<HistoryEntry>,
    },

    /// Updated presence listing for a room.
    #[serde(rename = "userList")]
    UserList {
        #[serde(rename = "roomCode")]
        room_code: String,
        /// Number of live members.
        count: usize,
        /// Number of connected members.
        #[serde(rename = "activeCount")]
        active_count: usize,
        users: Vec<PresenceEntry>,
    },

    /// A typing indicator change.
    #[serde(rename = "typingStatus")]
    TypingStatus {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },

    /// An error reported to a single connection.
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_display_name_explicit() {
        assert_eq!(resolve_display_name("alice_1234", Some("Alicia")), "Alicia");
    }

    #[test]
    fn test_resolve_display_name_derived() {
        assert_eq!(resolve_display_name("alice_1234", None), "alice");
        assert_eq!(resolve_display_name("bob", None), "bob");
        assert_eq!(resolve_display_name("carol_x_y", None), "carol");
    }

    #[test]
    fn test_client_event_decode() {
        let json = r#"{"type":"joinRoom","roomCode":"ABC","userName":"alice_99"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.room_code(), "ABC");
        assert_eq!(event.display_name(), "alice");
    }

    #[test]
    fn test_update_status_optional_field() {
        let json = r#"{"type":"updateStatus","roomCode":"ABC","userName":"bob"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            ClientEvent::UpdateStatus { status: None, .. }
        ));
    }

    #[test]
    fn test_notification_omits_chat_fields() {
        let event = ServerEvent::Message {
            room_code: "ABC".to_string(),
            id: None,
            sender: None,
            timestamp: 42,
            status: None,
            message: "bob ha ingresado a la sala.".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message");
        assert!(json.get("id").is_none());
        assert!(json.get("sender").is_none());
        assert!(json.get("status").is_none());
    }

    #[test]
    fn test_user_list_wire_shape() {
        let event = ServerEvent::UserList {
            room_code: "ABC".to_string(),
            count: 2,
            active_count: 1,
            users: vec![],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["activeCount"], 1);
        assert_eq!(json["roomCode"], "ABC");
    }
}
