//! # vanish-core
//!
//! The ephemeral room and message broker behind Vanish.
//!
//! Rooms hold at most two members, messages stay visible to pollers for a
//! short window, and idle rooms are torn down after an hour. The crate is
//! built from small components that all operate under a per-room lock:
//!
//! - **Room** - room records and membership
//! - **Message** - per-room message buffer with expiry filtering
//! - **Presence** - live delivery handles per room and user
//! - **Typing** - typing state with server-enforced auto-stop
//! - **Router** - fan-out of events to connected handles
//! - **Reaper** - inactivity teardown of idle rooms
//! - **Broker** - the ingress facade transports call into
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────────────────┐
//! │  Transport  │────▶│   Broker    │────▶│ RoomStore (per-room lock)│
//! └─────────────┘     └─────────────┘     │  Room · Messages        │
//!        ▲                                │  Presence · Typing      │
//!        │            ┌─────────────┐     └───────────┬─────────────┘
//!        └────────────│   Router    │◀────────────────┘
//!                     └─────────────┘           ▲
//!                                               │
//!                                        ┌─────────────┐
//!                                        │   Reaper    │
//!                                        └─────────────┘
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod message;
pub mod notify;
pub mod presence;
pub mod reaper;
pub mod room;
pub mod router;
pub mod session;
pub mod store;
pub mod typing;

pub use broker::{Broker, BrokerStats};
pub use config::{BrokerConfig, TypingReport};
pub use error::BrokerError;
pub use message::{ChatMessage, MessageBuffer};
pub use notify::{NoopSink, Notification, NotificationSink, SinkError, TracingSink};
pub use presence::{ConnectionId, Delivery, Handle, HandleReceiver, PresenceRegistry};
pub use room::{Room, RoomCode, RoomError, RoomStatus};
pub use router::{BroadcastRouter, DeliveryReport};
pub use session::Session;
pub use store::{RoomStore, Teardown};
pub use typing::TypingCoordinator;
