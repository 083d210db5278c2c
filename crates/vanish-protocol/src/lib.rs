//! # vanish-protocol
//!
//! Wire definitions for the Vanish ephemeral chat broker.
//!
//! Two surfaces share these types:
//!
//! - **Socket envelopes** - [`ClientEvent`] flows from a connected client to the
//!   broker, [`ServerEvent`] flows back out to every connected handle.
//! - **HTTP bodies** - request/response shapes for create, join, poll and send.
//!
//! Socket envelopes travel as JSON text frames, or as length-prefixed
//! MessagePack binary frames for clients that prefer them.
//!
//! ## Example
//!
//! ```rust
//! use vanish_protocol::{codec, ClientEvent};
//!
//! let event = codec::decode_text(r#"{"type":"typing_start","roomCode":"AB12","userId":7}"#).unwrap();
//! assert!(matches!(event, ClientEvent::TypingStart { .. }));
//! ```

pub mod api;
pub mod codec;
pub mod events;
pub mod ids;

pub use api::{
    CreateRoomRequest, ErrorKind, ErrorResponse, JoinRoomRequest, PollQuery, PollResponse,
    RoomResponse, RoomSummary, SendMessageRequest, SendResponse,
};
pub use codec::ProtocolError;
pub use events::{ClientEvent, MessagePayload, ServerEvent};
pub use ids::{MessageId, UserId};
