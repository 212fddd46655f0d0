//! Point-in-time occupancy snapshots ("who is here now").

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{ChannelId, UserId};

/// Occupants of a single channel at query time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOccupants {
    /// Number of occupants reported by the service.
    pub occupancy: usize,
    /// Occupant ids, present only when the query asked for them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupants: Option<Vec<UserId>>,
}

/// Response to a "who is here now" query across channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HereNow {
    /// Per-channel occupants.
    pub channels: HashMap<ChannelId, ChannelOccupants>,
}

impl HereNow {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel with a full occupant list.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<ChannelId>, occupants: Vec<UserId>) -> Self {
        self.channels.insert(
            channel.into(),
            ChannelOccupants {
                occupancy: occupants.len(),
                occupants: Some(occupants),
            },
        );
        self
    }

    /// Add a channel with only a count.
    #[must_use]
    pub fn with_count(mut self, channel: impl Into<ChannelId>, occupancy: usize) -> Self {
        self.channels.insert(
            channel.into(),
            ChannelOccupants {
                occupancy,
                occupants: None,
            },
        );
        self
    }

    /// Total occupants across all channels.
    #[must_use]
    pub fn total_occupancy(&self) -> usize {
        self.channels.values().map(|c| c.occupancy).sum()
    }
}
