//! Events delivered by a transport listener.
//!
//! One tagged union replaces a wide listener interface: consumers match on
//! the variants they care about and ignore the rest.

use serde::{Deserialize, Serialize};

use crate::presence::PresenceEvent;
use crate::signal::Signal;
use crate::{ChannelId, UserId};

/// A regular (persisted) channel message. Presence and typing ignore these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Target channel.
    pub channel: ChannelId,
    /// Publisher, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<UserId>,
    /// Message body.
    pub body: serde_json::Value,
}

/// An event delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    /// Incremental presence change.
    Presence(PresenceEvent),
    /// Ephemeral signal.
    Signal(Signal),
    /// Regular channel message.
    Message(ChannelMessage),
}

impl Event {
    /// The channel this event belongs to.
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Event::Presence(e) => &e.channel,
            Event::Signal(s) => &s.channel,
            Event::Message(m) => &m.channel,
        }
    }

    /// Short name of the variant, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Presence(_) => "presence",
            Event::Signal(_) => "signal",
            Event::Message(_) => "message",
        }
    }
}

impl From<PresenceEvent> for Event {
    fn from(event: PresenceEvent) -> Self {
        Event::Presence(event)
    }
}

impl From<Signal> for Event {
    fn from(signal: Signal) -> Self {
        Event::Signal(signal)
    }
}
