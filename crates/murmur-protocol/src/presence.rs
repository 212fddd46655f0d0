//! Presence delta events.
//!
//! The hosted service reports membership changes incrementally. Single-user
//! events (`join`, `leave`, `timeout`) carry a `uuid`; `interval` events
//! batch several changes into `join` / `leave` / `timeout` lists.

use serde::{Deserialize, Serialize};

use crate::{ChannelId, UserId};

/// Presence action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    /// A user joined the channel.
    Join,
    /// A user left the channel.
    Leave,
    /// A user was dropped after missing heartbeats.
    Timeout,
    /// Batched changes collected over an announce interval.
    Interval,
}

impl PresenceAction {
    /// The lowercase name used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceAction::Join => "join",
            PresenceAction::Leave => "leave",
            PresenceAction::Timeout => "timeout",
            PresenceAction::Interval => "interval",
        }
    }

    /// Whether this action names a single user through `uuid`.
    #[must_use]
    pub fn is_single_user(&self) -> bool {
        !matches!(self, PresenceAction::Interval)
    }
}

impl std::fmt::Display for PresenceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for PresenceAction {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "join" => Ok(PresenceAction::Join),
            "leave" => Ok(PresenceAction::Leave),
            "timeout" => Ok(PresenceAction::Timeout),
            "interval" => Ok(PresenceAction::Interval),
            _ => Err("Invalid presence action"),
        }
    }
}

/// An incremental presence notification for one channel.
///
/// Fields are optional exactly where the service may omit them. Nothing here
/// is validated; consumers decide what a missing `uuid` means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    /// Channel the event belongs to.
    pub channel: ChannelId,
    /// What happened.
    #[serde(rename = "event")]
    pub action: PresenceAction,
    /// Subject of a single-user event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<UserId>,
    /// Users that joined during an interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<Vec<UserId>>,
    /// Users that left during an interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leave: Option<Vec<UserId>>,
    /// Users that timed out during an interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Vec<UserId>>,
    /// Occupancy count reported by the service after this event.
    pub occupancy: usize,
}

impl PresenceEvent {
    fn single(
        channel: impl Into<ChannelId>,
        action: PresenceAction,
        uuid: impl Into<UserId>,
        occupancy: usize,
    ) -> Self {
        Self {
            channel: channel.into(),
            action,
            uuid: Some(uuid.into()),
            join: None,
            leave: None,
            timeout: None,
            occupancy,
        }
    }

    /// Create a `join` event.
    #[must_use]
    pub fn join(channel: impl Into<ChannelId>, uuid: impl Into<UserId>, occupancy: usize) -> Self {
        Self::single(channel, PresenceAction::Join, uuid, occupancy)
    }

    /// Create a `leave` event.
    #[must_use]
    pub fn leave(channel: impl Into<ChannelId>, uuid: impl Into<UserId>, occupancy: usize) -> Self {
        Self::single(channel, PresenceAction::Leave, uuid, occupancy)
    }

    /// Create a `timeout` event.
    #[must_use]
    pub fn timeout(
        channel: impl Into<ChannelId>,
        uuid: impl Into<UserId>,
        occupancy: usize,
    ) -> Self {
        Self::single(channel, PresenceAction::Timeout, uuid, occupancy)
    }

    /// Create an `interval` event.
    #[must_use]
    pub fn interval(
        channel: impl Into<ChannelId>,
        join: Vec<UserId>,
        leave: Vec<UserId>,
        timeout: Vec<UserId>,
        occupancy: usize,
    ) -> Self {
        Self {
            channel: channel.into(),
            action: PresenceAction::Interval,
            uuid: None,
            join: Some(join),
            leave: Some(leave),
            timeout: Some(timeout),
            occupancy,
        }
    }
}
