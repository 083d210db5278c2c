//! The ingress facade.
//!
//! HTTP handlers and socket sessions call into [`Broker`] and nothing else. It
//! validates external input, enforces membership, and turns component errors
//! into the [`BrokerError`] taxonomy.

use crate::config::{BrokerConfig, TypingReport};
use crate::error::BrokerError;
use crate::message::ChatMessage;
use crate::notify::{NoopSink, Notification, NotificationSink};
use crate::presence::{ConnectionId, Handle};
use crate::room::{unix_millis, RoomCode};
use crate::store::{RoomEntry, RoomStore, Teardown};
use crate::typing::spawn_typing_timer;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};
use vanish_protocol::{
    CreateRoomRequest, JoinRoomRequest, MessageId, PollQuery, PollResponse, RoomSummary,
    SendMessageRequest, ServerEvent, UserId,
};

/// Point-in-time broker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Live rooms.
    pub active_rooms: usize,
    /// Codes that can never be reused.
    pub retired_rooms: usize,
    /// Connected delivery handles across rooms.
    pub connected_handles: usize,
    /// Messages still buffered across rooms.
    pub buffered_messages: usize,
    /// Rooms torn down for inactivity.
    pub reaped_rooms: u64,
    /// Events queued on handles.
    pub delivered: u64,
    /// Events dropped on full queues.
    pub dropped: u64,
}

/// The room and message broker.
///
/// Cheap to clone; clones share the same rooms.
#[derive(Clone)]
pub struct Broker {
    store: Arc<RoomStore>,
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker").field("store", &self.store).finish()
    }
}

fn parse_code(raw: Option<&str>) -> Result<RoomCode, BrokerError> {
    let raw = raw.ok_or_else(|| BrokerError::missing("roomCode"))?;
    RoomCode::parse(raw).map_err(|reason| BrokerError::InvalidInput(reason.to_string()))
}

fn require_id<T>(id: Option<T>, field: &str, is_blank: impl Fn(&T) -> bool) -> Result<T, BrokerError> {
    match id {
        Some(id) if !is_blank(&id) => Ok(id),
        _ => Err(BrokerError::missing(field)),
    }
}

fn require_user(user_id: Option<UserId>, field: &str) -> Result<UserId, BrokerError> {
    require_id(user_id, field, UserId::is_blank)
}

fn not_a_member(code: &RoomCode, user_id: &UserId) -> BrokerError {
    BrokerError::Forbidden(format!("{user_id} is not a member of {code}"))
}

impl Broker {
    /// Create a broker that discards notifications.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_sink(config, Arc::new(NoopSink))
    }

    /// Create a broker reporting to `sink`.
    #[must_use]
    pub fn with_sink(config: BrokerConfig, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            store: RoomStore::new(config),
            sink,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        self.store.config()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<RoomStore> {
        &self.store
    }

    /// Create a room and join its creator.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a missing or malformed code or creator, and
    /// `AlreadyExists` if the code is live or was used before.
    pub fn create_room(&self, request: CreateRoomRequest) -> Result<RoomSummary, BrokerError> {
        let code = parse_code(request.room_code.as_deref())?;
        let creator_id = require_user(request.creator_id, "creatorId")?;

        let summary = self.store.create_room(&code, &creator_id)?;
        self.notify(Notification::RoomCreated {
            room_code: summary.code.clone(),
            creator_id,
        });
        Ok(summary)
    }

    /// Join a room and tell the other member.
    ///
    /// Joining again as an existing member succeeds and leaves the member
    /// count unchanged.
    ///
    /// # Errors
    ///
    /// `InvalidInput`, `NotFound` (including expired rooms) or `Full`.
    pub fn join_room(&self, request: JoinRoomRequest) -> Result<RoomSummary, BrokerError> {
        let code = parse_code(request.room_code.as_deref())?;
        let user_id = require_user(request.user_id, "userId")?;
        let user_info = request
            .user_info
            .or_else(|| request.user_name.map(|name| json!({ "firstName": name })));

        let router = self.store.router();
        let summary = self.store.with_room_mut(&code, |entry| {
            entry.room.join(&user_id)?;
            router.broadcast(
                &code,
                &mut entry.presence,
                ServerEvent::UserJoined {
                    user_id: user_id.clone(),
                    user_info: user_info.clone(),
                    timestamp: unix_millis(),
                },
                Some(&user_id),
            );
            Ok::<_, BrokerError>(entry.room.summary())
        })??;

        debug!(room = %code, user = %user_id, members = summary.user_count, "Joined room");
        self.notify(Notification::UserJoined {
            room_code: summary.code.clone(),
            user_id,
            user_info,
        });
        Ok(summary)
    }

    /// Messages still inside the poll window, plus typing and member counts.
    ///
    /// # Errors
    ///
    /// `InvalidInput`, `NotFound`, or `Forbidden` for a non-member.
    pub fn poll(&self, room_code: &str, query: PollQuery) -> Result<PollResponse, BrokerError> {
        let code = parse_code(Some(room_code))?;
        let user_id = require_user(query.user_id, "userId")?;
        let window = self.config().poll_window;
        let report = self.config().typing_report;

        self.store.with_room(&code, |entry| {
            if !entry.room.is_member(&user_id) {
                return Err(not_a_member(&code, &user_id));
            }

            let now = Instant::now();
            let messages = entry
                .messages
                .visible_since(window, now)
                .map(ChatMessage::to_payload)
                .collect();
            let typing_users = match report {
                TypingReport::Tracked => entry.typing.typing_users(),
                TypingReport::Connected => entry.presence.connected_users(),
            };

            Ok(PollResponse {
                success: true,
                messages,
                typing_users,
                user_count: entry.room.member_count(),
            })
        })?
    }

    /// Store a message and push it to the other connected member.
    ///
    /// A message whose id is still buffered is accepted again without being
    /// stored or pushed twice.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for missing fields or bad text, `NotFound`, or
    /// `Forbidden` if the sender is not a member.
    pub fn send_message(&self, request: SendMessageRequest) -> Result<MessageId, BrokerError> {
        let id = require_id(request.id, "id", MessageId::is_blank)?;
        let text = request.text.ok_or_else(|| BrokerError::missing("text"))?;
        if text.trim().is_empty() {
            return Err(BrokerError::InvalidInput("text cannot be empty".into()));
        }
        let max_chars = self.config().max_text_chars;
        if text.chars().count() > max_chars {
            return Err(BrokerError::InvalidInput(format!(
                "text exceeds {max_chars} characters"
            )));
        }
        let sender_id = require_user(request.sender_id, "senderId")?;
        let code = parse_code(request.room_code.as_deref())?;
        let timestamp = request
            .timestamp
            .ok_or_else(|| BrokerError::missing("timestamp"))?;

        let window = self.config().poll_window;
        let display_ttl = self.config().display_ttl;
        let router = self.store.router();

        self.with_member(&code, &sender_id, |entry| {
            entry.room.touch();
            let now = Instant::now();
            entry.messages.sweep(window, now);

            if entry.messages.contains(&id) {
                debug!(room = %code, message = %id, "Duplicate message id, not re-broadcast");
                return id;
            }

            let message = ChatMessage {
                id: id.clone(),
                text,
                sender_id: sender_id.clone(),
                room_code: code.clone(),
                timestamp,
                created_at: now,
                display_ttl,
            };
            let payload = message.to_payload();
            entry.messages.append(message);

            router.broadcast(
                &code,
                &mut entry.presence,
                ServerEvent::NewMessage { message: payload },
                Some(&sender_id),
            );
            id
        })
    }

    /// Register a connection's handle for a member, replacing any previous
    /// one, and reply `room_joined` on it. Returns the member count.
    ///
    /// # Errors
    ///
    /// `InvalidInput`, `NotFound`, or `Forbidden` for a non-member.
    pub fn attach(
        &self,
        room_code: &str,
        user_id: &UserId,
        user_info: Option<Value>,
        handle: &Handle,
    ) -> Result<usize, BrokerError> {
        let code = parse_code(Some(room_code))?;
        let user_id = require_user(Some(user_id.clone()), "userId")?;
        let router = self.store.router();

        self.with_member(&code, &user_id, |entry| {
            if let Some(previous) = entry.presence.register(user_id.clone(), handle.clone(), user_info) {
                debug!(room = %code, user = %user_id, replaced = %previous.connection_id(), "Replaced connection");
            }
            entry.room.touch();

            let user_count = entry.room.member_count();
            router.send_to(
                &code,
                &mut entry.presence,
                &user_id,
                ServerEvent::RoomJoined {
                    room_code: code.to_string(),
                    user_count,
                },
            );
            user_count
        })
    }

    /// Unregister a connection on request and tell the other member.
    ///
    /// Returns `false` if `connection` no longer owns the registration.
    ///
    /// # Errors
    ///
    /// `InvalidInput` or `NotFound`.
    pub fn leave(
        &self,
        room_code: &str,
        user_id: &UserId,
        connection: ConnectionId,
    ) -> Result<bool, BrokerError> {
        let code = parse_code(Some(room_code))?;
        self.detach(&code, user_id, connection)
    }

    /// Clean up after a closed transport. Never fails; a room that is
    /// already gone needs no cleanup.
    pub fn disconnect(&self, code: &RoomCode, user_id: &UserId, connection: ConnectionId) {
        if let Err(err) = self.detach(code, user_id, connection) {
            debug!(room = %code, user = %user_id, error = %err, "Disconnect after room teardown");
        }
    }

    fn detach(
        &self,
        code: &RoomCode,
        user_id: &UserId,
        connection: ConnectionId,
    ) -> Result<bool, BrokerError> {
        let router = self.store.router();
        let detached = self.store.with_room_mut(code, |entry| {
            let Some(registration) = entry.presence.unregister_connection(user_id, connection)
            else {
                return false;
            };
            router.broadcast(
                code,
                &mut entry.presence,
                ServerEvent::UserLeft {
                    user_id: user_id.clone(),
                    user_info: registration.user_info,
                },
                Some(user_id),
            );
            true
        })?;

        if detached {
            debug!(room = %code, user = %user_id, connection = %connection, "Connection detached");
        }
        Ok(detached)
    }

    /// Enter the typing state and tell the other member. The server sends
    /// `typing_stop` on the user's behalf if no stop or restart follows.
    ///
    /// # Errors
    ///
    /// `InvalidInput`, `NotFound`, or `Forbidden` for a non-member.
    pub fn typing_start(&self, room_code: &str, user_id: &UserId) -> Result<(), BrokerError> {
        let code = parse_code(Some(room_code))?;
        let router = self.store.router();
        let store = self.store.downgrade();
        let timeout = self.config().typing_timeout;

        self.with_member(&code, user_id, |entry| {
            entry.typing.start(user_id.clone(), |generation| {
                spawn_typing_timer(store, code.clone(), user_id.clone(), generation, timeout)
            });
            router.broadcast(
                &code,
                &mut entry.presence,
                ServerEvent::TypingStart {
                    user_id: user_id.clone(),
                },
                Some(user_id),
            );
        })
    }

    /// Leave the typing state. The stop is relayed whether or not the user
    /// was typing.
    ///
    /// # Errors
    ///
    /// `InvalidInput`, `NotFound`, or `Forbidden` for a non-member.
    pub fn typing_stop(&self, room_code: &str, user_id: &UserId) -> Result<(), BrokerError> {
        let code = parse_code(Some(room_code))?;
        let router = self.store.router();

        self.with_member(&code, user_id, |entry| {
            entry.typing.stop(user_id);
            router.broadcast(
                &code,
                &mut entry.presence,
                ServerEvent::TypingStop {
                    user_id: user_id.clone(),
                },
                Some(user_id),
            );
        })
    }

    /// Relay a free-form status to the other member. Not stored.
    ///
    /// # Errors
    ///
    /// `InvalidInput`, `NotFound`, or `Forbidden` for a non-member.
    pub fn user_status(
        &self,
        room_code: &str,
        user_id: &UserId,
        status: String,
    ) -> Result<(), BrokerError> {
        let code = parse_code(Some(room_code))?;
        let router = self.store.router();

        self.with_member(&code, user_id, |entry| {
            router.broadcast(
                &code,
                &mut entry.presence,
                ServerEvent::UserStatus {
                    user_id: user_id.clone(),
                    status,
                },
                Some(user_id),
            );
        })
    }

    /// Tear a room down immediately and retire its code.
    ///
    /// # Errors
    ///
    /// `InvalidInput`, or `NotFound` if no live room has this code.
    pub fn close_room(&self, room_code: &str) -> Result<Teardown, BrokerError> {
        let code = parse_code(Some(room_code))?;
        self.store
            .close_room(&code)
            .ok_or_else(|| BrokerError::NotFound(code.to_string()))
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let (connected_handles, buffered_messages) = self.store.totals();
        BrokerStats {
            active_rooms: self.store.room_count(),
            retired_rooms: self.store.retired_count(),
            connected_handles,
            buffered_messages,
            reaped_rooms: self.store.reaped_total(),
            delivered: self.store.router().delivered_total(),
            dropped: self.store.router().dropped_total(),
        }
    }

    fn with_member<R>(
        &self,
        code: &RoomCode,
        user_id: &UserId,
        f: impl FnOnce(&mut RoomEntry) -> R,
    ) -> Result<R, BrokerError> {
        self.store.with_room_mut(code, |entry| {
            if entry.room.is_member(user_id) {
                Ok(f(entry))
            } else {
                Err(not_a_member(code, user_id))
            }
        })?
    }

    fn notify(&self, notification: Notification) {
        let sink = self.sink.clone();
        let kind = notification.kind();
        tokio::spawn(async move {
            if let Err(err) = sink.notify(notification).await {
                warn!(notification = kind, error = %err, "Notification sink failed");
            }
        });
    }
}
