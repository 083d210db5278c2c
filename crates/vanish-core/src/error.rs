//! The error taxonomy reported by the broker.

use crate::room::RoomError;
use thiserror::Error;
use vanish_protocol::ErrorKind;

/// Errors returned to callers of the [`Broker`](crate::Broker).
///
/// Every variant is recoverable; none of them indicate broker failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// A room with this code exists or existed.
    #[error("Room already exists: {0}")]
    AlreadyExists(String),

    /// No live room with this code.
    #[error("Room not found: {0}")]
    NotFound(String),

    /// The room has no free member slot.
    #[error("Room is full: {0}")]
    Full(String),

    /// The actor is not a member of the room.
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Missing or malformed input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BrokerError {
    /// The wire-level kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            BrokerError::NotFound(_) => ErrorKind::NotFound,
            BrokerError::Full(_) => ErrorKind::Full,
            BrokerError::Forbidden(_) => ErrorKind::Forbidden,
            BrokerError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    pub(crate) fn missing(field: &str) -> Self {
        BrokerError::InvalidInput(format!("{field} is required"))
    }
}

impl From<RoomError> for BrokerError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::AlreadyExists(code) => BrokerError::AlreadyExists(code.to_string()),
            // Expired rooms are indistinguishable from unknown ones to callers.
            RoomError::NotFound(code) | RoomError::Inactive(code) => {
                BrokerError::NotFound(code.to_string())
            }
            RoomError::Full(code) => BrokerError::Full(code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomCode;

    #[test]
    fn test_inactive_surfaces_as_not_found() {
        let code = RoomCode::parse("ab12").unwrap();
        let err: BrokerError = RoomError::Inactive(code).into();
        assert_eq!(err, BrokerError::NotFound("AB12".into()));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(BrokerError::missing("text").kind(), ErrorKind::InvalidInput);
        assert_eq!(
            BrokerError::Forbidden("x".into()).to_string(),
            "Access denied: x"
        );
    }
}
