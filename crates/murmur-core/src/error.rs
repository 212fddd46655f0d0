//! Error types for presence and typing.

use murmur_protocol::{ChannelId, PresenceAction};
use murmur_transport::TransportError;
use thiserror::Error;

/// A presence event that cannot be folded into the occupancy map.
///
/// These are not swallowed: the delta task stops on the first one so that
/// presence never drifts silently.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// A single-user event arrived without a `uuid`.
    #[error("{action} event on {channel} is missing uuid")]
    MissingUuid {
        /// Channel of the offending event.
        channel: ChannelId,
        /// Action of the offending event.
        action: PresenceAction,
    },
}

/// Errors surfaced by the public operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The transport refused a subscription change.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
