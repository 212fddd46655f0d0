//! Transport abstraction traits.
//!
//! These traits describe the pub/sub collaborator, allowing presence and
//! typing to run against any hosted service (or the in-process loopback).

use async_trait::async_trait;
use murmur_protocol::{ChannelId, Event, HereNow, Signal};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport (or listener) was closed.
    #[error("Transport closed")]
    Closed,

    /// The operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// Failed to send a signal.
    #[error("Signal failed: {0}")]
    SignalFailed(String),

    /// The "here now" query failed.
    #[error("Here-now query failed: {0}")]
    QueryFailed(String),

    /// The listener fell behind and missed events.
    #[error("Listener lagged, {0} events dropped")]
    Lagged(u64),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] murmur_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A registered listener receiving events from subscribed channels.
#[async_trait]
pub trait Listener: Send {
    /// Receive the next event.
    ///
    /// Returns `None` once the transport has shut down. A
    /// [`TransportError::Lagged`] error is recoverable; the listener keeps
    /// delivering afterwards.
    async fn recv(&mut self) -> Result<Option<Event>, TransportError>;
}

/// A hosted publish/subscribe service.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Subscribe to channels, optionally receiving presence deltas.
    async fn subscribe(
        &self,
        channels: &[ChannelId],
        with_presence: bool,
    ) -> Result<(), TransportError>;

    /// Unsubscribe from channels.
    ///
    /// `with_presence` must match the flag the subscription was made with.
    async fn unsubscribe(
        &self,
        channels: &[ChannelId],
        with_presence: bool,
    ) -> Result<(), TransportError>;

    /// Register a listener for presence, signal and message events.
    fn listen(&self) -> Box<dyn Listener>;

    /// Query who is present on the given channels right now.
    async fn here_now(
        &self,
        channels: &[ChannelId],
        include_uuids: bool,
    ) -> Result<HereNow, TransportError>;

    /// Send an ephemeral signal.
    async fn signal(&self, signal: Signal) -> Result<(), TransportError>;

    /// Get the transport name.
    fn name(&self) -> &'static str;
}
