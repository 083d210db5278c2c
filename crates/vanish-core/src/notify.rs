//! Out-of-band notifications for user-facing confirmations.
//!
//! A sink (a chat bot, typically) hears about room creation and joins. The
//! broker fires these off in the background and never waits on or depends on
//! the sink's success.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use vanish_protocol::UserId;

/// An event worth telling the outside world about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A room was created.
    RoomCreated { room_code: String, creator_id: UserId },
    /// A user joined a room.
    UserJoined {
        room_code: String,
        user_id: UserId,
        user_info: Option<Value>,
    },
}

impl Notification {
    /// The wire name of this notification.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::RoomCreated { .. } => "room_created",
            Notification::UserJoined { .. } => "user_joined",
        }
    }
}

/// A sink failure. Logged, never surfaced.
#[derive(Debug, Error)]
#[error("Notification sink failed: {0}")]
pub struct SinkError(pub String);

/// Receives broker notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification.
    async fn notify(&self, notification: Notification) -> Result<(), SinkError>;
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn notify(&self, _notification: Notification) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, notification: Notification) -> Result<(), SinkError> {
        match notification {
            Notification::RoomCreated {
                room_code,
                creator_id,
            } => info!(room = %room_code, creator = %creator_id, "Notify: room created"),
            Notification::UserJoined {
                room_code, user_id, ..
            } => info!(room = %room_code, user = %user_id, "Notify: user joined"),
        }
        Ok(())
    }
}
