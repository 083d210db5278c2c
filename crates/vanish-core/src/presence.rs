//! Delivery handles and per-room presence.
//!
//! A [`Handle`] is the broker's end of a connection's outbound queue. The
//! transport keeps the matching [`HandleReceiver`] and drains it onto the
//! wire. Each room keeps at most one handle per user.
//!
//! A connection that serves several rooms registers a [`Handle::scoped`] copy
//! in each of them, so tearing one room down cannot end the connection.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::debug;
use vanish_protocol::{ServerEvent, UserId};

/// Counter for process-unique connection ids.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection id.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the transport.
    Delivered,
    /// The queue was full; the event was discarded.
    Dropped,
    /// The transport side is gone.
    Closed,
}

/// The broker's side of a connection.
#[derive(Debug, Clone)]
pub struct Handle {
    connection_id: ConnectionId,
    sender: mpsc::Sender<Arc<ServerEvent>>,
    close: Arc<Notify>,
}

/// The transport's side of a connection.
#[derive(Debug)]
pub struct HandleReceiver {
    connection_id: ConnectionId,
    events: mpsc::Receiver<Arc<ServerEvent>>,
    close: Arc<Notify>,
    closed: bool,
}

impl Handle {
    /// Create a handle with a bounded outbound queue.
    #[must_use]
    pub fn channel(capacity: usize) -> (Handle, HandleReceiver) {
        let connection_id = ConnectionId::next();
        let (sender, events) = mpsc::channel(capacity.max(1));
        let close = Arc::new(Notify::new());

        (
            Handle {
                connection_id,
                sender,
                close: close.clone(),
            },
            HandleReceiver {
                connection_id,
                events,
                close,
                closed: false,
            },
        )
    }

    /// A copy for one room attachment. It shares the queue and connection id,
    /// but closing it leaves the receiver open.
    #[must_use]
    pub fn scoped(&self) -> Handle {
        Handle {
            connection_id: self.connection_id,
            sender: self.sender.clone(),
            close: Arc::new(Notify::new()),
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queue an event without waiting.
    pub fn try_deliver(&self, event: Arc<ServerEvent>) -> Delivery {
        match self.sender.try_send(event) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Ask the transport to close the connection.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Whether the transport side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl HandleReceiver {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Wait for the next outbound event.
    ///
    /// Returns `None` once the broker has asked for the connection to close.
    pub async fn recv(&mut self) -> Option<Arc<ServerEvent>> {
        if self.closed {
            return None;
        }

        tokio::select! {
            biased;

            () = self.close.notified() => {
                self.closed = true;
                None
            }
            event = self.events.recv() => event,
        }
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<ServerEvent>> {
        if self.closed {
            return None;
        }
        self.events.try_recv().ok()
    }
}

/// A live registration of a user in a room.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The user's delivery handle.
    pub handle: Handle,
    /// Display metadata supplied at join time.
    pub user_info: Option<Value>,
}

/// Connected handles for a single room, keyed by user.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: HashMap<UserId, Registration>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_connected(&self, user_id: &UserId) -> bool {
        self.entries.contains_key(user_id)
    }

    #[must_use]
    pub fn get(&self, user_id: &UserId) -> Option<&Registration> {
        self.entries.get(user_id)
    }

    /// Register a handle, replacing any previous one for this user.
    ///
    /// The replaced handle is returned but not notified.
    pub fn register(
        &mut self,
        user_id: UserId,
        handle: Handle,
        user_info: Option<Value>,
    ) -> Option<Handle> {
        let connection = handle.connection_id();
        let previous = self.entries.insert(
            user_id.clone(),
            Registration { handle, user_info },
        );

        debug!(user = %user_id, connection = %connection, replaced = previous.is_some(), "Handle registered");
        previous.map(|r| r.handle)
    }

    /// Remove the user's registration, whichever connection owns it.
    pub fn unregister(&mut self, user_id: &UserId) -> Option<Registration> {
        let removed = self.entries.remove(user_id);
        if removed.is_some() {
            debug!(user = %user_id, "Handle unregistered");
            self.release_if_empty();
        }
        removed
    }

    /// Remove the user's registration only if it belongs to `connection`.
    ///
    /// A connection that was replaced by a newer one must not unregister it.
    pub fn unregister_connection(
        &mut self,
        user_id: &UserId,
        connection: ConnectionId,
    ) -> Option<Registration> {
        match self.entries.get(user_id) {
            Some(reg) if reg.handle.connection_id() == connection => self.unregister(user_id),
            _ => None,
        }
    }

    /// Connected users in a stable order.
    #[must_use]
    pub fn connected_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.entries.keys().cloned().collect();
        users.sort();
        users
    }

    /// Iterate over registrations.
    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &Registration)> {
        self.entries.iter()
    }

    /// Send `room_closed` to every handle, close them and clear the registry.
    /// Returns how many were closed.
    pub fn close_all(&mut self, room_code: &str) -> usize {
        let count = self.entries.len();
        let event = Arc::new(ServerEvent::RoomClosed {
            room_code: room_code.to_string(),
        });
        for reg in self.entries.values() {
            reg.handle.try_deliver(event.clone());
            reg.handle.close();
        }
        self.entries = HashMap::new();
        count
    }

    fn release_if_empty(&mut self) {
        if self.entries.is_empty() {
            self.entries = HashMap::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn typing(user: &str) -> Arc<ServerEvent> {
        Arc::new(ServerEvent::TypingStart {
            user_id: user.into(),
        })
    }

    #[test]
    fn test_connection_ids_unique() {
        assert_ne!(ConnectionId::next(), ConnectionId::next());
    }

    #[tokio::test]
    async fn test_handle_delivery() {
        let (handle, mut rx) = Handle::channel(4);
        assert_eq!(handle.try_deliver(typing("1")), Delivery::Delivered);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "typing_start");
    }

    #[test]
    fn test_full_queue_drops() {
        let (handle, _rx) = Handle::channel(1);
        assert_eq!(handle.try_deliver(typing("1")), Delivery::Delivered);
        assert_eq!(handle.try_deliver(typing("1")), Delivery::Dropped);
    }

    #[test]
    fn test_closed_receiver() {
        let (handle, rx) = Handle::channel(1);
        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(handle.try_deliver(typing("1")), Delivery::Closed);
    }

    #[tokio::test]
    async fn test_close_ends_receiver() {
        let (handle, mut rx) = Handle::channel(4);
        handle.try_deliver(typing("1"));
        handle.close();

        assert!(rx.recv().await.is_none());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_register_replaces() {
        let mut presence = PresenceRegistry::new();
        let (first, _rx1) = Handle::channel(1);
        let (second, _rx2) = Handle::channel(1);
        let first_id = first.connection_id();

        assert!(presence.register("1".into(), first, None).is_none());
        let replaced = presence.register("1".into(), second, Some(json!({"firstName": "Ann"})));

        assert_eq!(replaced.unwrap().connection_id(), first_id);
        assert_eq!(presence.count(), 1);
        assert!(presence.get(&"1".into()).unwrap().user_info.is_some());
    }

    #[test]
    fn test_stale_connection_cannot_unregister_replacement() {
        let mut presence = PresenceRegistry::new();
        let (first, _rx1) = Handle::channel(1);
        let (second, _rx2) = Handle::channel(1);
        let first_id = first.connection_id();
        let second_id = second.connection_id();

        presence.register("1".into(), first, None);
        presence.register("1".into(), second, None);

        assert!(presence.unregister_connection(&"1".into(), first_id).is_none());
        assert!(presence.is_connected(&"1".into()));
        assert!(presence.unregister_connection(&"1".into(), second_id).is_some());
        assert!(presence.is_empty());
    }

    #[tokio::test]
    async fn test_close_all() {
        let mut presence = PresenceRegistry::new();
        let (a, mut rx_a) = Handle::channel(1);
        let (b, mut rx_b) = Handle::channel(1);
        presence.register("1".into(), a, None);
        presence.register("2".into(), b, None);

        assert_eq!(presence.close_all("R1"), 2);
        assert!(presence.is_empty());
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closing_scoped_handle_keeps_connection() {
        let (handle, mut rx) = Handle::channel(4);
        let mut first = PresenceRegistry::new();
        let mut second = PresenceRegistry::new();
        first.register("1".into(), handle.scoped(), None);
        second.register("1".into(), handle.scoped(), None);
        assert_eq!(
            first.get(&"1".into()).unwrap().handle.connection_id(),
            handle.connection_id()
        );

        first.close_all("R1");
        match rx.recv().await.as_deref() {
            Some(ServerEvent::RoomClosed { room_code }) => assert_eq!(room_code, "R1"),
            other => panic!("unexpected {other:?}"),
        }

        let reg = second.get(&"1".into()).unwrap();
        assert_eq!(reg.handle.try_deliver(typing("2")), Delivery::Delivered);
        assert_eq!(rx.recv().await.unwrap().kind(), "typing_start");
    }

    #[test]
    fn test_connected_users_sorted() {
        let mut presence = PresenceRegistry::new();
        let (a, _rx_a) = Handle::channel(1);
        let (b, _rx_b) = Handle::channel(1);
        presence.register("2".into(), a, None);
        presence.register("1".into(), b, None);
        assert_eq!(presence.connected_users(), vec![UserId::from("1"), UserId::from("2")]);
    }
}
