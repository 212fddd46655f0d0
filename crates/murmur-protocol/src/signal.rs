//! Ephemeral signals and the typing wire contract.
//!
//! Typing indicators travel as the body of an ephemeral signal. Exactly two
//! payloads are reserved: `"typing_on"` and `"typing_off"`. Anything else is
//! not a typing event.

use serde::{Deserialize, Serialize};

use crate::{ChannelId, UserId};

/// Payload announcing that the publisher started typing.
pub const TYPING_ON: &str = "typing_on";

/// Payload announcing that the publisher stopped typing.
pub const TYPING_OFF: &str = "typing_off";

/// A typing indicator carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypingSignal {
    /// The publisher started (or is still) typing.
    On,
    /// The publisher stopped typing.
    Off,
}

impl TypingSignal {
    /// Parse a signal payload. Returns `None` for non-typing payloads.
    #[must_use]
    pub fn parse(payload: &str) -> Option<Self> {
        match payload {
            TYPING_ON => Some(TypingSignal::On),
            TYPING_OFF => Some(TypingSignal::Off),
            _ => None,
        }
    }

    /// Build the indicator for a typing state.
    #[must_use]
    pub fn from_typing(is_typing: bool) -> Self {
        if is_typing {
            TypingSignal::On
        } else {
            TypingSignal::Off
        }
    }

    /// The literal wire token.
    #[must_use]
    pub fn as_payload(&self) -> &'static str {
        match self {
            TypingSignal::On => TYPING_ON,
            TypingSignal::Off => TYPING_OFF,
        }
    }

    /// Whether this indicator means "typing".
    #[must_use]
    pub fn is_typing(&self) -> bool {
        matches!(self, TypingSignal::On)
    }
}

impl std::fmt::Display for TypingSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_payload())
    }
}

/// An ephemeral signal delivered on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Channel the signal was published to.
    pub channel: ChannelId,
    /// Publisher of the signal.
    pub publisher: UserId,
    /// Signal body.
    pub payload: String,
    /// Service timestamp, when the transport supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timetoken: Option<u64>,
}

impl Signal {
    /// Create a new signal.
    #[must_use]
    pub fn new(
        channel: impl Into<ChannelId>,
        publisher: impl Into<UserId>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            publisher: publisher.into(),
            payload: payload.into(),
            timetoken: None,
        }
    }

    /// Create a typing signal.
    #[must_use]
    pub fn typing(
        channel: impl Into<ChannelId>,
        publisher: impl Into<UserId>,
        typing: TypingSignal,
    ) -> Self {
        Self::new(channel, publisher, typing.as_payload())
    }

    /// Attach a service timestamp.
    #[must_use]
    pub fn with_timetoken(mut self, timetoken: u64) -> Self {
        self.timetoken = Some(timetoken);
        self
    }

    /// Interpret the payload as a typing indicator.
    #[must_use]
    pub fn typing_signal(&self) -> Option<TypingSignal> {
        TypingSignal::parse(&self.payload)
    }
}
