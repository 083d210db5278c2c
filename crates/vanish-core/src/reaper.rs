//! Inactivity teardown of idle rooms.
//!
//! Each room gets its own one-shot timer at creation, aimed at
//! `last_activity + idle_timeout`. When it fires on a room that saw activity
//! in the meantime it re-aims at the new deadline; otherwise it tears the room
//! down and exits. A room destroyed by any other path aborts its timer.
//!
//! Message expiry is not driven from here: the message buffer is swept after
//! every append.

use crate::room::RoomCode;
use crate::store::{RoomStore, Teardown};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};

/// Result of checking a room for inactivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReapOutcome {
    /// The room was idle and has been torn down.
    Reaped(Teardown),
    /// The room saw activity; check again relative to this instant.
    Active { last_activity: Instant },
    /// The room no longer exists.
    Gone,
}

/// Spawn the inactivity timer for a room.
pub(crate) fn spawn_inactivity_timer(
    store: Weak<RoomStore>,
    code: RoomCode,
    idle_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut deadline = Instant::now() + idle_timeout;
        loop {
            time::sleep_until(deadline).await;

            let Some(store) = store.upgrade() else {
                return;
            };
            match store.reap_if_idle(&code) {
                ReapOutcome::Reaped(teardown) => {
                    info!(
                        room = %code,
                        closed_handles = teardown.closed_handles,
                        dropped_messages = teardown.dropped_messages,
                        "Reaped idle room"
                    );
                    return;
                }
                ReapOutcome::Active { last_activity } => {
                    deadline = last_activity + idle_timeout;
                    debug!(room = %code, "Room still active, re-arming inactivity timer");
                }
                ReapOutcome::Gone => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::presence::Handle;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn store(idle: u64) -> std::sync::Arc<RoomStore> {
        RoomStore::new(BrokerConfig {
            idle_timeout: Duration::from_secs(idle),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_room_is_reaped() {
        let store = store(3600);
        let room = RoomCode::parse("R1").unwrap();
        store.create_room(&room, &"1".into()).unwrap();

        let (handle, mut rx) = Handle::channel(4);
        store
            .with_room_mut(&room, |entry| {
                entry.presence.register("1".into(), handle, None);
            })
            .unwrap();

        time::advance(Duration::from_secs(3599)).await;
        settle().await;
        assert!(store.contains(&room));

        time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(!store.contains(&room));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_rearms_timer() {
        let store = store(3600);
        let room = RoomCode::parse("R1").unwrap();
        store.create_room(&room, &"1".into()).unwrap();

        time::advance(Duration::from_secs(3599)).await;
        assert!(store.touch(&room));

        // First deadline passes; the room was touched a second ago.
        time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(store.contains(&room));

        // Second deadline: an hour after the touch.
        time::advance(Duration::from_secs(3598)).await;
        settle().await;
        assert!(!store.contains(&room));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_stops_with_store() {
        let store = store(10);
        let room = RoomCode::parse("R1").unwrap();
        store.create_room(&room, &"1".into()).unwrap();
        let weak = store.downgrade();
        drop(store);

        time::advance(Duration::from_secs(11)).await;
        settle().await;
        assert!(weak.upgrade().is_none());
    }
}
