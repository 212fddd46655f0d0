//! Codec for encoding and decoding transport events.
//!
//! Events travel between relay and listeners as length-prefixed
//! MessagePack frames. Presence payloads coming straight from the hosted
//! service are JSON and go through [`decode_json`].

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::event::Event;
use crate::presence::PresenceEvent;

/// Maximum frame size (1 MiB). Presence and signals are small.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an event to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded event
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode(event: &Event) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Decode an event from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Event, ProtocolError> {
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

    let event = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(event)
}

/// Decode a presence event delivered as JSON by the hosted service.
///
/// # Errors
///
/// Returns an error if the payload is not a presence event.
pub fn decode_json(data: &[u8]) -> Result<PresenceEvent, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Signal;

    #[test]
    fn test_decode_incomplete() {
        let event = Event::Presence(PresenceEvent::join("room", "alice", 1));
        let encoded = encode(&event).unwrap();

        match decode(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut data = vec![0u8; 8];
        data[..4].copy_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());

        match decode(&data) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_layout() {
        let event = Event::Signal(Signal::new("room", "u3", "typing_on").with_timetoken(42));
        let encoded = encode(&event).unwrap();

        let length = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(length + LENGTH_PREFIX_SIZE, encoded.len());
        assert_eq!(decode(&encoded).unwrap(), event);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let event = Event::Presence(PresenceEvent::interval(
            "room",
            vec!["u3".into(), "u4".into()],
            vec!["u2".into()],
            vec![],
            2,
        ));
        let mut data = encode(&event).unwrap().to_vec();
        data.extend_from_slice(&[0xff, 0xff]);

        assert_eq!(decode(&data).unwrap(), event);
    }

    #[test]
    fn test_decode_json_presence() {
        let raw = br#"{"channel":"room","event":"timeout","uuid":"u9","occupancy":4}"#;
        let event = decode_json(raw).unwrap();

        assert_eq!(event, PresenceEvent::timeout("room", "u9", 4));
    }

    #[test]
    fn test_decode_json_interval_without_lists() {
        let raw = br#"{"channel":"room","event":"interval","occupancy":7}"#;
        let event = decode_json(raw).unwrap();

        assert!(event.join.is_none());
        assert_eq!(event.occupancy, 7);
    }

    #[test]
    fn test_decode_json_rejects_unknown_action() {
        let raw = br#"{"channel":"room","event":"state-change","occupancy":1}"#;
        assert!(matches!(decode_json(raw), Err(ProtocolError::Json(_))));
    }
}
