//! Ephemeral chat messages and the per-room buffer that holds them.
//!
//! Two expiry contracts apply to every message and they are kept apart on
//! purpose: the poll window bounds how long the server keeps returning a
//! message to pollers, while the display TTL tells consumers how long to keep
//! it on screen.

use crate::room::RoomCode;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;
use vanish_protocol::{MessageId, MessagePayload, UserId};

/// A stored chat message. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Caller-supplied id, unique within the room.
    pub id: MessageId,
    /// Text, stored verbatim.
    pub text: String,
    /// Sending member.
    pub sender_id: UserId,
    /// Owning room.
    pub room_code: RoomCode,
    /// Sender's timestamp in Unix milliseconds.
    pub timestamp: u64,
    /// Server receipt time.
    pub created_at: Instant,
    /// How long consumers should display the message.
    pub display_ttl: Duration,
}

impl ChatMessage {
    /// Whether the message is still inside `window` at `now`.
    #[must_use]
    pub fn is_visible(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < window
    }

    /// The wire form delivered to consumers.
    #[must_use]
    pub fn to_payload(&self) -> MessagePayload {
        MessagePayload {
            id: self.id.clone(),
            text: self.text.clone(),
            sender_id: self.sender_id.clone(),
            room_code: self.room_code.to_string(),
            timestamp: self.timestamp,
            expires_at: self
                .timestamp
                .saturating_add(self.display_ttl.as_millis() as u64),
        }
    }
}

/// Insertion-ordered message buffer for one room.
///
/// Messages are appended with a monotonic receipt time, so the oldest message
/// is always at the front.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    messages: VecDeque<ChatMessage>,
}

impl MessageBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether a message with this id is still buffered.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    /// Append a message.
    ///
    /// Returns `false` without storing anything if a message with the same id
    /// is still buffered.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.messages.push_back(message);
        true
    }

    /// Messages received less than `window` before `now`, oldest first.
    pub fn visible_since(
        &self,
        window: Duration,
        now: Instant,
    ) -> impl Iterator<Item = &ChatMessage> + '_ {
        self.messages
            .iter()
            .filter(move |m| m.is_visible(window, now))
    }

    /// Drop messages that fell out of `window`. Returns how many were dropped.
    pub fn sweep(&mut self, window: Duration, now: Instant) -> usize {
        let mut dropped = 0;
        while self
            .messages
            .front()
            .is_some_and(|m| !m.is_visible(window, now))
        {
            self.messages.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            trace!(dropped, remaining = self.messages.len(), "Swept expired messages");
        }
        dropped
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(5000);

    fn message(id: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            text: "hi".into(),
            sender_id: "1".into(),
            room_code: RoomCode::parse("AB-1234").unwrap(),
            timestamp: 1_000,
            created_at: Instant::now(),
            display_ttl: Duration::from_secs(15),
        }
    }

    #[test]
    fn test_payload_carries_display_ttl() {
        let payload = message("m1").to_payload();
        assert_eq!(payload.expires_at, 16_000);
        assert_eq!(payload.room_code, "AB-1234");
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut buffer = MessageBuffer::new();
        assert!(buffer.append(message("m1")));
        assert!(!buffer.append(message("m1")));
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_window_edges() {
        let mut buffer = MessageBuffer::new();
        buffer.append(message("m1"));
        let created = Instant::now();

        assert_eq!(buffer.visible_since(WINDOW, created + Duration::from_millis(4999)).count(), 1);
        assert_eq!(buffer.visible_since(WINDOW, created + Duration::from_millis(5000)).count(), 0);
        assert_eq!(buffer.visible_since(WINDOW, created + Duration::from_millis(5001)).count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_insertion_order() {
        let mut buffer = MessageBuffer::new();
        buffer.append(message("m1"));
        tokio::time::advance(Duration::from_secs(3)).await;
        buffer.append(message("m2"));
        tokio::time::advance(Duration::from_secs(1)).await;
        buffer.append(message("m3"));

        tokio::time::advance(Duration::from_millis(1500)).await;
        let now = Instant::now();
        assert_eq!(buffer.sweep(WINDOW, now), 1);

        let ids: Vec<&str> = buffer
            .visible_since(WINDOW, now)
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m2", "m3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swept_id_can_be_reused() {
        let mut buffer = MessageBuffer::new();
        buffer.append(message("m1"));
        tokio::time::advance(Duration::from_secs(6)).await;
        buffer.sweep(WINDOW, Instant::now());
        assert!(buffer.is_empty());
        assert!(buffer.append(message("m1")));
    }
}
