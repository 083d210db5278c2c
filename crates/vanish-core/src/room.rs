//! Room records and membership.
//!
//! A room is a two-party conversation addressed by a short code. It starts
//! active and expires exactly once; an expired code is never handed out again.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;
use vanish_protocol::{RoomSummary, UserId};

/// Maximum room code length.
pub const MAX_ROOM_CODE_LENGTH: usize = 32;

/// Members a room can hold. Fixed: rooms are strictly two-party.
pub const MAX_MEMBERS: usize = 2;

/// Current wall-clock time in Unix milliseconds.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Validate a room code.
///
/// # Errors
///
/// Returns an error message if the code is invalid.
pub fn validate_room_code(code: &str) -> Result<(), &'static str> {
    if code.is_empty() {
        return Err("Room code cannot be empty");
    }
    if code.len() > MAX_ROOM_CODE_LENGTH {
        return Err("Room code too long");
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("Room code may only contain letters, digits and '-'");
    }
    if !code.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err("Room code must contain a letter or digit");
    }
    Ok(())
}

/// A validated, case-normalized room code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Parse and normalize a code. Codes compare case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error message if the code is invalid.
    pub fn parse(raw: &str) -> Result<Self, &'static str> {
        let trimmed = raw.trim();
        validate_room_code(trimmed)?;
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Get the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Room lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Active,
    Expired,
}

/// Room store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// The code is taken by a live room or was used by an expired one.
    #[error("Room already exists: {0}")]
    AlreadyExists(RoomCode),

    /// No room with this code.
    #[error("Room not found: {0}")]
    NotFound(RoomCode),

    /// The room has expired.
    #[error("Room is no longer active: {0}")]
    Inactive(RoomCode),

    /// The room is at member capacity.
    #[error("Room is full: {0}")]
    Full(RoomCode),
}

/// A room record.
#[derive(Debug)]
pub struct Room {
    code: RoomCode,
    creator_id: UserId,
    members: HashSet<UserId>,
    created_at: Instant,
    created_at_ms: u64,
    last_activity: Instant,
    status: RoomStatus,
}

impl Room {
    /// Create an active room with no members.
    #[must_use]
    pub fn new(code: RoomCode, creator_id: UserId) -> Self {
        let now = Instant::now();
        Self {
            code,
            creator_id,
            members: HashSet::with_capacity(MAX_MEMBERS),
            created_at: now,
            created_at_ms: unix_millis(),
            last_activity: now,
            status: RoomStatus::Active,
        }
    }

    #[must_use]
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    #[must_use]
    pub fn creator_id(&self) -> &UserId {
        &self.creator_id
    }

    #[must_use]
    pub fn status(&self) -> RoomStatus {
        self.status
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == RoomStatus::Active
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.members.contains(user_id)
    }

    /// Add a member.
    ///
    /// Re-joining as an existing member succeeds without changing the member
    /// set. Returns `true` if the user was newly added.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Inactive`] for an expired room and
    /// [`RoomError::Full`] when no slot is left.
    pub fn join(&mut self, user_id: &UserId) -> Result<bool, RoomError> {
        if !self.is_active() {
            return Err(RoomError::Inactive(self.code.clone()));
        }
        if self.members.contains(user_id) {
            self.touch();
            return Ok(false);
        }
        if self.members.len() >= MAX_MEMBERS {
            return Err(RoomError::Full(self.code.clone()));
        }

        self.members.insert(user_id.clone());
        self.touch();
        debug!(room = %self.code, user = %user_id, members = self.members.len(), "Member joined");
        Ok(true)
    }

    /// Record activity.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Expire the room. Returns `true` on the active-to-expired transition.
    pub fn mark_expired(&mut self) -> bool {
        if self.status == RoomStatus::Expired {
            return false;
        }
        self.status = RoomStatus::Expired;
        debug!(room = %self.code, "Room expired");
        true
    }

    /// Time since the last activity.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Members in a stable order.
    #[must_use]
    pub fn members(&self) -> Vec<UserId> {
        let mut members: Vec<UserId> = self.members.iter().cloned().collect();
        members.sort();
        members
    }

    /// Wire summary of this room.
    #[must_use]
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            code: self.code.to_string(),
            user_count: self.members.len(),
            created_at: self.created_at_ms,
        }
    }
}
