//! JSON codec for Sala events.
//!
//! One event per text frame, tagged by `type`. Oversized frames are
//! rejected before parsing.

use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Maximum accepted frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a client event from a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a recognized event.
pub fn decode_client_event(text: &str) -> Result<ClientEvent, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a server event to a text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_server_event(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}
