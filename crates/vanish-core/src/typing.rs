//! Typing state with server-enforced auto-stop.
//!
//! Each (room, user) pair is either idle or typing. A `typing_start` arms a
//! one-shot timer; a repeated start replaces it. When the timer fires the
//! broker broadcasts the same `typing_stop` an explicit stop would produce.

use crate::room::RoomCode;
use crate::store::RoomStore;
use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;
use vanish_protocol::UserId;

struct TypingTimer {
    generation: u64,
    task: JoinHandle<()>,
}

/// Typing state for one room.
#[derive(Default)]
pub struct TypingCoordinator {
    timers: HashMap<UserId, TypingTimer>,
    next_generation: u64,
}

impl std::fmt::Debug for TypingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypingCoordinator")
            .field("typing", &self.timers.len())
            .finish()
    }
}

impl TypingCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_typing(&self, user_id: &UserId) -> bool {
        self.timers.contains_key(user_id)
    }

    /// Users currently typing, in a stable order.
    #[must_use]
    pub fn typing_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.timers.keys().cloned().collect();
        users.sort();
        users
    }

    /// Enter the typing state, arming a fresh auto-stop timer.
    ///
    /// `arm` receives the timer generation and must spawn the timer task.
    /// Returns `true` if the user was already typing.
    pub fn start(&mut self, user_id: UserId, arm: impl FnOnce(u64) -> JoinHandle<()>) -> bool {
        self.next_generation += 1;
        let generation = self.next_generation;
        let task = arm(generation);

        let previous = self
            .timers
            .insert(user_id, TypingTimer { generation, task });
        match previous {
            Some(timer) => {
                timer.task.abort();
                true
            }
            None => false,
        }
    }

    /// Leave the typing state. Returns `true` if the user was typing.
    pub fn stop(&mut self, user_id: &UserId) -> bool {
        match self.timers.remove(user_id) {
            Some(timer) => {
                timer.task.abort();
                true
            }
            None => false,
        }
    }

    /// Handle a fired timer.
    ///
    /// Returns `true` if the timer was still current and the user is now idle.
    /// A timer replaced after it fired but before it got here is ignored.
    pub fn expire(&mut self, user_id: &UserId, generation: u64) -> bool {
        match self.timers.get(user_id) {
            Some(timer) if timer.generation == generation => {
                self.timers.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel every pending timer. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, timer) in self.timers.drain() {
            timer.task.abort();
        }
        count
    }
}

impl Drop for TypingCoordinator {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Spawn the auto-stop timer for one typing episode.
pub(crate) fn spawn_typing_timer(
    store: Weak<RoomStore>,
    code: RoomCode,
    user_id: UserId,
    generation: u64,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(store) = store.upgrade() {
            trace!(room = %code, user = %user_id, "Typing timed out");
            store.expire_typing(&code, &user_id, generation);
        }
    })
}
