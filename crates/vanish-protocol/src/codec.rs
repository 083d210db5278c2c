//! Codecs for socket envelopes.
//!
//! Text frames carry a single JSON envelope. Binary frames carry one or more
//! MessagePack envelopes, each behind a 4-byte big-endian length prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Maximum encoded envelope size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Envelope exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode an envelope.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a server envelope as a JSON text frame.
///
/// # Errors
///
/// Returns an error if the envelope is too large or serialization fails.
pub fn encode_text(event: &ServerEvent) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a client envelope from a JSON text frame.
///
/// # Errors
///
/// Returns an error if the text is oversized or not a known envelope.
pub fn decode_text(text: &str) -> Result<ClientEvent, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a value as a length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the value is too large or encoding fails.
pub fn encode_binary<T: Serialize>(value: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a value into an existing buffer.
///
/// # Errors
///
/// Returns an error if the value is too large or encoding fails.
pub fn encode_into<T: Serialize>(value: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(value)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode_binary<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(value))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    Ok(Some(rmp_serde::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ClientEvent;

    #[test]
    fn test_text_decode() {
        let event =
            decode_text(r#"{"type":"user_status","roomCode":"R1","userId":"9","status":"away"}"#)
                .unwrap();
        assert_eq!(
            event,
            ClientEvent::UserStatus {
                room_code: "R1".into(),
                user_id: "9".into(),
                status: "away".into(),
            }
        );
    }

    #[test]
    fn test_text_decode_missing_field() {
        assert!(matches!(
            decode_text(r#"{"type":"typing_start","roomCode":"R1"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_binary_client_event() {
        let event = ClientEvent::TypingStart {
            room_code: "R1".into(),
            user_id: "3".into(),
        };
        let encoded = encode_binary(&event).unwrap();
        let decoded: ClientEvent = decode_binary(&encoded).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode_binary(&ClientEvent::LeaveRoom {
            room_code: "R1".into(),
            user_id: "3".into(),
        })
        .unwrap();

        match decode_binary::<ClientEvent>(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_text_rejected() {
        let text = "x".repeat(MAX_FRAME_SIZE + 1);
        assert!(matches!(
            decode_text(&text),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let first = ClientEvent::TypingStart {
            room_code: "R1".into(),
            user_id: "1".into(),
        };
        let second = ClientEvent::TypingStop {
            room_code: "R1".into(),
            user_id: "1".into(),
        };

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();
        buf.extend_from_slice(&[0, 0]);

        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), Some(first));
        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), Some(second));
        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 2);
    }
}
