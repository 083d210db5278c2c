//! HTTP request and response bodies.
//!
//! Request fields are optional at the serde level so that a missing field
//! surfaces as [`ErrorKind::InvalidInput`] from the broker rather than as a
//! framework-level deserialization failure.

use crate::events::MessagePayload;
use crate::ids::{MessageId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of failures the broker reports to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Room code collision on create.
    AlreadyExists,
    /// Unknown or expired room.
    NotFound,
    /// Room at member capacity.
    Full,
    /// Actor is not a member of the room.
    Forbidden,
    /// Missing or malformed required fields.
    InvalidInput,
}

impl ErrorKind {
    /// Stable string form, used as a metrics label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Full => "full",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidInput => "invalid_input",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `POST /api/rooms/create`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub room_code: Option<String>,
    pub creator_id: Option<UserId>,
}

/// `POST /api/rooms/join`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_code: Option<String>,
    pub user_id: Option<UserId>,
    /// Display metadata relayed to the other member in `user_joined`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<serde_json::Value>,
    /// Plain display name; used as `firstName` when no `userInfo` is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// `POST /api/messages/send`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub id: Option<MessageId>,
    pub text: Option<String>,
    pub sender_id: Option<UserId>,
    pub room_code: Option<String>,
    pub timestamp: Option<u64>,
}

/// Query string of `GET /api/rooms/:roomCode/messages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollQuery {
    pub user_id: Option<UserId>,
}

/// Room details returned by create and join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub code: String,
    pub user_count: usize,
    /// Unix milliseconds.
    pub created_at: u64,
}

/// Successful create or join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomResponse {
    pub success: bool,
    pub room: RoomSummary,
}

impl RoomResponse {
    #[must_use]
    pub fn ok(room: RoomSummary) -> Self {
        Self {
            success: true,
            room,
        }
    }
}

/// Successful poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub success: bool,
    pub messages: Vec<MessagePayload>,
    pub typing_users: Vec<UserId>,
    pub user_count: usize,
}

/// Successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message_id: MessageId,
}

/// Any failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorKind,
    pub message: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error,
            message: message.into(),
        }
    }
}
