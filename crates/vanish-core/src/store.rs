//! The per-room lock table.
//!
//! Every room's record, message buffer, presence and typing state live in a
//! single [`RoomEntry`] inside a sharded map keyed by room code. Holding an
//! entry serializes all work on that room while other rooms proceed on their
//! own shards. Nothing here awaits while holding an entry.

use crate::config::BrokerConfig;
use crate::message::MessageBuffer;
use crate::presence::PresenceRegistry;
use crate::reaper::{self, ReapOutcome};
use crate::room::{Room, RoomCode, RoomError, RoomStatus};
use crate::router::BroadcastRouter;
use crate::typing::TypingCoordinator;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use vanish_protocol::{RoomSummary, ServerEvent, UserId};

/// Everything the broker keeps for one room.
#[derive(Debug)]
pub struct RoomEntry {
    pub room: Room,
    pub messages: MessageBuffer,
    pub presence: PresenceRegistry,
    pub typing: TypingCoordinator,
    reaper: Option<JoinHandle<()>>,
}

impl RoomEntry {
    fn new(room: Room) -> Self {
        Self {
            room,
            messages: MessageBuffer::new(),
            presence: PresenceRegistry::new(),
            typing: TypingCoordinator::new(),
            reaper: None,
        }
    }

    /// Release everything the room holds. Handles are told to close.
    fn dispose(mut self) -> Teardown {
        let teardown = Teardown {
            closed_handles: self.presence.close_all(self.room.code().as_str()),
            cancelled_typing: self.typing.cancel_all(),
            dropped_messages: self.messages.len(),
        };
        self.messages.clear();
        teardown
    }
}

/// What a teardown released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Teardown {
    pub closed_handles: usize,
    pub cancelled_typing: usize,
    pub dropped_messages: usize,
}

/// Authoritative store of live rooms.
pub struct RoomStore {
    rooms: DashMap<RoomCode, RoomEntry>,
    /// Codes of expired rooms. Never handed out again.
    retired: DashSet<RoomCode>,
    router: BroadcastRouter,
    reaped: AtomicU64,
    config: BrokerConfig,
    this: Weak<RoomStore>,
}

impl RoomStore {
    /// Create a new store.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        info!("Creating room store with config: {:?}", config);
        Arc::new_cyclic(|this| Self {
            rooms: DashMap::new(),
            retired: DashSet::new(),
            router: BroadcastRouter::new(),
            reaped: AtomicU64::new(0),
            config,
            this: this.clone(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    #[must_use]
    pub fn router(&self) -> &BroadcastRouter {
        &self.router
    }

    /// A weak reference for timer tasks.
    #[must_use]
    pub fn downgrade(&self) -> Weak<RoomStore> {
        self.this.clone()
    }

    /// Create a room with `creator_id` as its first member and arm its
    /// inactivity timer.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::AlreadyExists`] if the code is live or retired.
    pub fn create_room(
        &self,
        code: &RoomCode,
        creator_id: &UserId,
    ) -> Result<RoomSummary, RoomError> {
        match self.rooms.entry(code.clone()) {
            Entry::Occupied(_) => Err(RoomError::AlreadyExists(code.clone())),
            Entry::Vacant(vacant) => {
                if self.retired.contains(code) {
                    return Err(RoomError::AlreadyExists(code.clone()));
                }

                let mut room = Room::new(code.clone(), creator_id.clone());
                room.join(creator_id)?;
                let summary = room.summary();

                let mut entry = RoomEntry::new(room);
                entry.reaper = Some(reaper::spawn_inactivity_timer(
                    self.downgrade(),
                    code.clone(),
                    self.config.idle_timeout,
                ));
                vacant.insert(entry);

                info!(room = %code, creator = %creator_id, "Room created");
                Ok(summary)
            }
        }
    }

    /// Add a member. Returns the updated summary and whether the user is new.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Inactive` or `Full`.
    pub fn join_room(
        &self,
        code: &RoomCode,
        user_id: &UserId,
    ) -> Result<(RoomSummary, bool), RoomError> {
        self.with_room_mut(code, |entry| {
            let added = entry.room.join(user_id)?;
            Ok((entry.room.summary(), added))
        })?
    }

    /// Record activity on a room. Returns `false` if it is not live.
    pub fn touch(&self, code: &RoomCode) -> bool {
        self.with_room_mut(code, |entry| entry.room.touch()).is_ok()
    }

    /// Expire a room and retire its code. Irreversible.
    ///
    /// The entry stays in the table until the caller removes it; every
    /// operation on it fails with `Inactive` meanwhile.
    pub(crate) fn mark_expired(&self, code: &RoomCode) -> bool {
        let Some(mut entry) = self.rooms.get_mut(code) else {
            return false;
        };
        self.retired.insert(code.clone());
        entry.room.mark_expired()
    }

    /// Run `f` with shared access to a live room.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown rooms and `Inactive` for expired ones.
    pub fn with_room<R>(
        &self,
        code: &RoomCode,
        f: impl FnOnce(&RoomEntry) -> R,
    ) -> Result<R, RoomError> {
        let entry = self
            .rooms
            .get(code)
            .ok_or_else(|| RoomError::NotFound(code.clone()))?;
        if entry.room.status() == RoomStatus::Expired {
            return Err(RoomError::Inactive(code.clone()));
        }
        Ok(f(&entry))
    }

    /// Run `f` with exclusive access to a live room.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown rooms and `Inactive` for expired ones.
    pub fn with_room_mut<R>(
        &self,
        code: &RoomCode,
        f: impl FnOnce(&mut RoomEntry) -> R,
    ) -> Result<R, RoomError> {
        let mut entry = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::NotFound(code.clone()))?;
        if entry.room.status() == RoomStatus::Expired {
            return Err(RoomError::Inactive(code.clone()));
        }
        Ok(f(&mut entry))
    }

    /// Tear a room down now, whatever its activity.
    ///
    /// Cancels the inactivity timer. Returns `None` if the room is not live.
    pub fn close_room(&self, code: &RoomCode) -> Option<Teardown> {
        if !self.mark_expired(code) {
            return None;
        }
        let (_, mut entry) = self.rooms.remove(code)?;
        if let Some(task) = entry.reaper.take() {
            task.abort();
        }
        let teardown = entry.dispose();
        info!(room = %code, ?teardown, "Room closed");
        Some(teardown)
    }

    /// Tear the room down if it has been idle for the configured timeout.
    ///
    /// Called from the room's own inactivity timer.
    pub(crate) fn reap_if_idle(&self, code: &RoomCode) -> ReapOutcome {
        let idle_timeout = self.config.idle_timeout;
        {
            let Some(mut entry) = self.rooms.get_mut(code) else {
                return ReapOutcome::Gone;
            };
            if entry.room.status() == RoomStatus::Expired {
                return ReapOutcome::Gone;
            }
            if entry.room.idle_for(Instant::now()) < idle_timeout {
                return ReapOutcome::Active {
                    last_activity: entry.room.last_activity(),
                };
            }

            // Our own task; dropping the handle detaches rather than aborts.
            entry.reaper.take();
            self.retired.insert(code.clone());
            entry.room.mark_expired();
        }

        match self.rooms.remove(code) {
            Some((_, entry)) => {
                self.reaped.fetch_add(1, Ordering::Relaxed);
                ReapOutcome::Reaped(entry.dispose())
            }
            None => ReapOutcome::Gone,
        }
    }

    /// Handle a fired typing timer: go idle and tell the other members.
    pub(crate) fn expire_typing(&self, code: &RoomCode, user_id: &UserId, generation: u64) {
        let result = self.with_room_mut(code, |entry| {
            if entry.typing.expire(user_id, generation) {
                self.router.broadcast(
                    code,
                    &mut entry.presence,
                    ServerEvent::TypingStop {
                        user_id: user_id.clone(),
                    },
                    Some(user_id),
                );
            }
        });
        if let Err(err) = result {
            debug!(room = %code, user = %user_id, error = %err, "Typing timer outlived its room");
        }
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of retired codes.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Rooms torn down for inactivity since start.
    #[must_use]
    pub fn reaped_total(&self) -> u64 {
        self.reaped.load(Ordering::Relaxed)
    }

    /// Whether a live room with this code exists.
    #[must_use]
    pub fn contains(&self, code: &RoomCode) -> bool {
        self.with_room(code, |_| ()).is_ok()
    }

    /// Total connected handles and buffered messages across rooms.
    #[must_use]
    pub fn totals(&self) -> (usize, usize) {
        self.rooms.iter().fold((0, 0), |(handles, messages), entry| {
            (
                handles + entry.presence.count(),
                messages + entry.messages.len(),
            )
        })
    }
}

impl std::fmt::Debug for RoomStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomStore")
            .field("rooms", &self.rooms.len())
            .field("retired", &self.retired.len())
            .finish()
    }
}

impl Drop for RoomStore {
    fn drop(&mut self) {
        for mut entry in self.rooms.iter_mut() {
            if let Some(task) = entry.reaper.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::Handle;
    use std::time::Duration;

    fn code(raw: &str) -> RoomCode {
        RoomCode::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_create_joins_creator() {
        let store = RoomStore::new(BrokerConfig::default());
        let summary = store.create_room(&code("ab12"), &"1".into()).unwrap();

        assert_eq!(summary.code, "AB12");
        assert_eq!(summary.user_count, 1);
        assert!(store.contains(&code("AB12")));
    }

    #[tokio::test]
    async fn test_create_collision_is_case_insensitive() {
        let store = RoomStore::new(BrokerConfig::default());
        store.create_room(&code("ab12"), &"1".into()).unwrap();
        assert!(matches!(
            store.create_room(&code("AB12"), &"2".into()),
            Err(RoomError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_join_capacity() {
        let store = RoomStore::new(BrokerConfig::default());
        let room = code("R1");
        store.create_room(&room, &"1".into()).unwrap();

        let (summary, added) = store.join_room(&room, &"2".into()).unwrap();
        assert!(added);
        assert_eq!(summary.user_count, 2);

        let (summary, added) = store.join_room(&room, &"2".into()).unwrap();
        assert!(!added);
        assert_eq!(summary.user_count, 2);

        assert!(matches!(
            store.join_room(&room, &"3".into()),
            Err(RoomError::Full(_))
        ));
        assert!(matches!(
            store.join_room(&code("NOPE"), &"3".into()),
            Err(RoomError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_room_retires_code() {
        let store = RoomStore::new(BrokerConfig::default());
        let room = code("R1");
        store.create_room(&room, &"1".into()).unwrap();

        let (handle, mut rx) = Handle::channel(4);
        store
            .with_room_mut(&room, |entry| {
                entry.presence.register("1".into(), handle, None);
            })
            .unwrap();

        let teardown = store.close_room(&room).unwrap();
        assert_eq!(teardown.closed_handles, 1);
        assert!(rx.recv().await.is_none());

        assert!(store.close_room(&room).is_none());
        assert!(matches!(
            store.join_room(&room, &"1".into()),
            Err(RoomError::NotFound(_))
        ));
        assert!(matches!(
            store.create_room(&room, &"1".into()),
            Err(RoomError::AlreadyExists(_))
        ));
        assert_eq!(store.retired_count(), 1);
    }

    #[tokio::test]
    async fn test_marked_room_is_inactive() {
        let store = RoomStore::new(BrokerConfig::default());
        let room = code("R1");
        store.create_room(&room, &"1".into()).unwrap();

        assert!(store.mark_expired(&room));
        assert!(!store.mark_expired(&room));
        assert!(matches!(
            store.join_room(&room, &"2".into()),
            Err(RoomError::Inactive(_))
        ));
        assert!(!store.touch(&room));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_if_idle() {
        let store = RoomStore::new(BrokerConfig {
            idle_timeout: Duration::from_secs(60),
            ..Default::default()
        });
        let room = code("R1");
        store.create_room(&room, &"1".into()).unwrap();
        // Drive the sweep by hand.
        store
            .with_room_mut(&room, |entry| entry.reaper.take().map(|task| task.abort()))
            .unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(matches!(
            store.reap_if_idle(&room),
            ReapOutcome::Active { .. }
        ));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(matches!(store.reap_if_idle(&room), ReapOutcome::Reaped(_)));
        assert!(matches!(store.reap_if_idle(&room), ReapOutcome::Gone));
        assert_eq!(store.room_count(), 0);
        assert_eq!(store.reaped_total(), 1);
    }

    #[tokio::test]
    async fn test_totals() {
        let store = RoomStore::new(BrokerConfig::default());
        store.create_room(&code("R1"), &"1".into()).unwrap();
        store.create_room(&code("R2"), &"2".into()).unwrap();

        let (handle, _rx) = Handle::channel(4);
        store
            .with_room_mut(&code("R2"), |entry| {
                entry.presence.register("2".into(), handle, None);
            })
            .unwrap();

        assert_eq!(store.room_count(), 2);
        assert_eq!(store.totals(), (1, 0));
    }
}
