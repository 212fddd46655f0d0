//! # murmur-transport
//!
//! Transport seam between the presence/typing subsystem and a hosted
//! publish/subscribe service.
//!
//! The service itself (connections, retry, TLS) lives elsewhere. This crate
//! only names what the subsystem needs from it:
//!
//! - **Subscribe / unsubscribe** per channel, with or without presence
//! - **Listen** for decoded [`Event`](murmur_protocol::Event)s
//! - **Here now** - a one-shot occupancy snapshot
//! - **Signal** - send an ephemeral payload
//!
//! ## Transport Abstraction
//!
//! ```rust,ignore
//! use murmur_transport::{Listener, PubSub};
//!
//! async fn drain(transport: &dyn PubSub) {
//!     let mut listener = transport.listen();
//!     while let Ok(Some(event)) = listener.recv().await {
//!         // Dispatch on event kind
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "loopback")]
pub mod loopback;

pub use traits::{Listener, PubSub, TransportError};

#[cfg(feature = "loopback")]
pub use loopback::LoopbackTransport;
