//! Socket envelopes exchanged with connected clients.
//!
//! Every envelope is an object tagged by `type`, with camelCase fields.

use crate::api::ErrorKind;
use crate::ids::{MessageId, UserId};
use serde::{Deserialize, Serialize};

/// A chat message as delivered to consumers over either transport.
///
/// Consumers receiving from both the push and the poll path must dedupe by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Caller-supplied message id.
    pub id: MessageId,
    /// Message text, verbatim.
    pub text: String,
    /// Sending member.
    pub sender_id: UserId,
    /// Room the message belongs to.
    pub room_code: String,
    /// Sender's timestamp in Unix milliseconds.
    pub timestamp: u64,
    /// When the consumer should destroy the message in its UI (Unix ms).
    pub expires_at: u64,
}

/// Envelopes sent by clients over the push transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Attach this connection to a room the user is a member of.
    JoinRoom {
        room_code: String,
        user_id: UserId,
        /// Display metadata from the identity provider, relayed as-is.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_info: Option<serde_json::Value>,
    },

    /// Detach this connection from a room.
    LeaveRoom { room_code: String, user_id: UserId },

    /// The user started typing.
    TypingStart { room_code: String, user_id: UserId },

    /// The user stopped typing.
    TypingStop { room_code: String, user_id: UserId },

    /// Free-form status relayed to the other members.
    UserStatus {
        room_code: String,
        user_id: UserId,
        status: String,
    },
}

impl ClientEvent {
    /// The room this envelope addresses.
    #[must_use]
    pub fn room_code(&self) -> &str {
        match self {
            ClientEvent::JoinRoom { room_code, .. }
            | ClientEvent::LeaveRoom { room_code, .. }
            | ClientEvent::TypingStart { room_code, .. }
            | ClientEvent::TypingStop { room_code, .. }
            | ClientEvent::UserStatus { room_code, .. } => room_code,
        }
    }

    /// The user this envelope speaks for.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        match self {
            ClientEvent::JoinRoom { user_id, .. }
            | ClientEvent::LeaveRoom { user_id, .. }
            | ClientEvent::TypingStart { user_id, .. }
            | ClientEvent::TypingStop { user_id, .. }
            | ClientEvent::UserStatus { user_id, .. } => user_id,
        }
    }
}

/// Envelopes pushed by the broker to connected handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Acknowledges a socket `join_room` to the joining connection only.
    RoomJoined { room_code: String, user_count: usize },

    /// Another user joined the room.
    UserJoined {
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_info: Option<serde_json::Value>,
        timestamp: u64,
    },

    /// Another user left the room or disconnected.
    UserLeft {
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_info: Option<serde_json::Value>,
    },

    /// A message was sent to the room.
    NewMessage { message: MessagePayload },

    /// A member started typing.
    TypingStart { user_id: UserId },

    /// A member stopped typing, explicitly or by timeout.
    TypingStop { user_id: UserId },

    /// A member's relayed status.
    UserStatus { user_id: UserId, status: String },

    /// The room was torn down. The connection stays open for its other rooms.
    RoomClosed { room_code: String },

    /// A socket request failed.
    Error { error: ErrorKind, message: String },
}

impl ServerEvent {
    /// The `type` tag of this envelope, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::RoomJoined { .. } => "room_joined",
            ServerEvent::UserJoined { .. } => "user_joined",
            ServerEvent::UserLeft { .. } => "user_left",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::TypingStart { .. } => "typing_start",
            ServerEvent::TypingStop { .. } => "typing_stop",
            ServerEvent::UserStatus { .. } => "user_status",
            ServerEvent::RoomClosed { .. } => "room_closed",
            ServerEvent::Error { .. } => "error",
        }
    }
}
