//! Per-connection socket state.
//!
//! A [`Session`] owns one delivery handle and remembers which (room, user)
//! pairs the connection joined. Typing and status events are only accepted
//! for those pairs. Each room gets its own scoped copy of the handle, so a
//! room teardown ends only that room's attachments. Dropping the session
//! disconnects all of them.

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::presence::{ConnectionId, Handle, HandleReceiver};
use crate::room::RoomCode;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use vanish_protocol::{ClientEvent, ServerEvent, UserId};

/// One transport connection's view of the broker.
#[derive(Debug)]
pub struct Session {
    broker: Broker,
    handle: Handle,
    attachments: HashSet<(RoomCode, UserId)>,
}

impl Session {
    /// Open a session. The transport drains the returned receiver.
    #[must_use]
    pub fn new(broker: Broker) -> (Session, HandleReceiver) {
        let (handle, receiver) = Handle::channel(broker.config().handle_capacity);
        debug!(connection = %handle.connection_id(), "Session opened");
        (
            Session {
                broker,
                handle,
                attachments: HashSet::new(),
            },
            receiver,
        )
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.handle.connection_id()
    }

    /// Number of (room, user) pairs this connection is joined as.
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// Apply one client event.
    ///
    /// # Errors
    ///
    /// Any [`BrokerError`] from the broker, or `Forbidden` for events about a
    /// room this connection has not joined.
    pub fn handle(&mut self, event: ClientEvent) -> Result<(), BrokerError> {
        match event {
            ClientEvent::JoinRoom {
                room_code,
                user_id,
                user_info,
            } => {
                let code = RoomCode::parse(&room_code)
                    .map_err(|reason| BrokerError::InvalidInput(reason.to_string()))?;
                self.broker
                    .attach(code.as_str(), &user_id, user_info, &self.handle.scoped())?;
                self.attachments.insert((code, user_id));
            }
            ClientEvent::LeaveRoom { room_code, user_id } => {
                let key = self.attached(&room_code, user_id)?;
                self.attachments.remove(&key);
                self.broker
                    .leave(key.0.as_str(), &key.1, self.connection_id())?;
            }
            ClientEvent::TypingStart { room_code, user_id } => {
                let (code, user_id) = self.attached(&room_code, user_id)?;
                self.broker.typing_start(code.as_str(), &user_id)?;
            }
            ClientEvent::TypingStop { room_code, user_id } => {
                let (code, user_id) = self.attached(&room_code, user_id)?;
                self.broker.typing_stop(code.as_str(), &user_id)?;
            }
            ClientEvent::UserStatus {
                room_code,
                user_id,
                status,
            } => {
                let (code, user_id) = self.attached(&room_code, user_id)?;
                self.broker.user_status(code.as_str(), &user_id, status)?;
            }
        }
        Ok(())
    }

    /// Forget every attachment to a room that was torn down.
    ///
    /// The transport calls this when it forwards `room_closed`.
    pub fn room_closed(&mut self, room_code: &str) -> usize {
        let Ok(code) = RoomCode::parse(room_code) else {
            return 0;
        };
        let before = self.attachments.len();
        self.attachments.retain(|(attached, _)| *attached != code);
        let forgotten = before - self.attachments.len();
        if forgotten > 0 {
            debug!(connection = %self.connection_id(), room = %code, "Room closed under session");
        }
        forgotten
    }

    /// Report a failed event back to this connection.
    pub fn reply_error(&self, err: &BrokerError) {
        let event = ServerEvent::Error {
            error: err.kind(),
            message: err.to_string(),
        };
        self.handle.try_deliver(Arc::new(event));
    }

    fn attached(&self, room_code: &str, user_id: UserId) -> Result<(RoomCode, UserId), BrokerError> {
        let code = RoomCode::parse(room_code)
            .map_err(|reason| BrokerError::InvalidInput(reason.to_string()))?;
        let key = (code, user_id);
        if self.attachments.contains(&key) {
            Ok(key)
        } else {
            Err(BrokerError::Forbidden(format!(
                "connection has not joined {} as {}",
                key.0, key.1
            )))
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let connection = self.connection_id();
        for (code, user_id) in self.attachments.drain() {
            self.broker.disconnect(&code, &user_id, connection);
        }
        debug!(connection = %connection, "Session closed");
    }
}
