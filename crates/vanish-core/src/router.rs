//! Fan-out of events to the handles connected to a room.
//!
//! Delivery is best-effort: a full queue drops the event for that handle
//! only, and a closed handle is unregistered on the spot. Callers hold the
//! room's lock, so every handle sees a room's events in call order.

use crate::presence::{Delivery, PresenceRegistry};
use crate::room::RoomCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use vanish_protocol::{ServerEvent, UserId};

/// Result of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Handles the event was queued on.
    pub delivered: usize,
    /// Handles whose queue was full.
    pub dropped: usize,
    /// Users whose handle turned out closed and was unregistered.
    pub closed: Vec<UserId>,
}

/// Routes room events to connected handles.
#[derive(Debug, Default)]
pub struct BroadcastRouter {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every handle in the room except `exclude`'s.
    pub fn broadcast(
        &self,
        room: &RoomCode,
        presence: &mut PresenceRegistry,
        event: ServerEvent,
        exclude: Option<&UserId>,
    ) -> DeliveryReport {
        let kind = event.kind();
        let event = Arc::new(event);
        let mut report = DeliveryReport::default();

        for (user_id, registration) in presence.iter() {
            if exclude == Some(user_id) {
                continue;
            }
            match registration.handle.try_deliver(event.clone()) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Dropped => {
                    warn!(room = %room, user = %user_id, event = kind, "Outbound queue full, dropping event");
                    report.dropped += 1;
                }
                Delivery::Closed => report.closed.push(user_id.clone()),
            }
        }

        for user_id in &report.closed {
            presence.unregister(user_id);
            debug!(room = %room, user = %user_id, "Unregistered closed handle");
        }

        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);

        trace!(room = %room, event = kind, recipients = report.delivered, "Broadcast");
        report
    }

    /// Deliver `event` to a single user's handle, if connected.
    pub fn send_to(
        &self,
        room: &RoomCode,
        presence: &mut PresenceRegistry,
        user_id: &UserId,
        event: ServerEvent,
    ) -> Option<Delivery> {
        let delivery = presence.get(user_id)?.handle.try_deliver(Arc::new(event));
        match delivery {
            Delivery::Delivered => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Dropped => {
                warn!(room = %room, user = %user_id, "Outbound queue full, dropping event");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Closed => {
                presence.unregister(user_id);
            }
        }
        Some(delivery)
    }

    /// Total events queued since start.
    #[must_use]
    pub fn delivered_total(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Total events dropped on full queues since start.
    #[must_use]
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
