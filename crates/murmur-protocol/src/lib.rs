//! # murmur-protocol
//!
//! Wire shapes consumed from the hosted pub/sub service.
//!
//! This crate defines what arrives from (and is sent to) the transport:
//! incremental presence deltas, point-in-time occupancy snapshots, and the
//! ephemeral signals that carry typing indicators.
//!
//! ## Event Kinds
//!
//! - `Presence` - join / leave / timeout / interval deltas
//! - `Signal` - lightweight, non-persisted messages (typing lives here)
//! - `Message` - regular channel messages, passed through untouched
//!
//! ## Example
//!
//! ```rust
//! use murmur_protocol::{codec, Event, PresenceEvent};
//!
//! let event = Event::Presence(PresenceEvent::join("chat:lobby", "alice", 1));
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod event;
pub mod presence;
pub mod signal;
pub mod snapshot;

pub use codec::{decode, decode_json, encode, ProtocolError};
pub use event::{ChannelMessage, Event};
pub use presence::{PresenceAction, PresenceEvent};
pub use signal::{Signal, TypingSignal, TYPING_OFF, TYPING_ON};
pub use snapshot::{ChannelOccupants, HereNow};

/// A channel identifier.
pub type ChannelId = String;

/// A user identifier (the service calls this a uuid).
pub type UserId = String;
