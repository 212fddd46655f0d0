//! Per-channel occupancy and the delta fold.
//!
//! An [`OccupancyMap`] is never mutated once published. Each presence event
//! produces a new map via [`apply_event`], so readers can hold on to any
//! version for as long as they like.

use murmur_protocol::{ChannelId, HereNow, PresenceAction, PresenceEvent, UserId};
use serde::Serialize;
use std::collections::HashMap;
use tracing::trace;

use crate::error::ReconcileError;

/// Presence in one channel.
///
/// `count` is whatever the service last reported. It is not derived from
/// `member_ids` and the two may disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occupancy {
    /// Channel this occupancy describes.
    pub channel_id: ChannelId,
    /// Occupancy reported by the most recent event or snapshot.
    pub count: usize,
    /// Known members, in arrival order.
    pub member_ids: Vec<UserId>,
}

impl Occupancy {
    /// An empty occupancy for a channel.
    #[must_use]
    pub fn empty(channel_id: impl Into<ChannelId>) -> Self {
        Self {
            channel_id: channel_id.into(),
            count: 0,
            member_ids: Vec::new(),
        }
    }

    /// Check whether a user is listed.
    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.member_ids.iter().any(|id| id == user_id)
    }

    fn remove_all(&mut self, user_ids: &[UserId]) {
        self.member_ids.retain(|id| !user_ids.contains(id));
    }
}

/// Occupancy of every known channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OccupancyMap {
    channels: HashMap<ChannelId, Occupancy>,
}

impl OccupancyMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from a "here now" snapshot.
    ///
    /// Channels reported without an occupant list get an empty one.
    #[must_use]
    pub fn from_here_now(snapshot: &HereNow) -> Self {
        let channels = snapshot
            .channels
            .iter()
            .map(|(channel, occupants)| {
                let occupancy = Occupancy {
                    channel_id: channel.clone(),
                    count: occupants.occupancy,
                    member_ids: occupants.occupants.clone().unwrap_or_default(),
                };
                (channel.clone(), occupancy)
            })
            .collect();
        Self { channels }
    }

    /// Get the occupancy of a channel.
    #[must_use]
    pub fn get(&self, channel_id: &str) -> Option<&Occupancy> {
        self.channels.get(channel_id)
    }

    /// Occupancy of a channel, or an empty one if unknown.
    #[must_use]
    pub fn get_or_empty(&self, channel_id: &str) -> Occupancy {
        self.get(channel_id)
            .cloned()
            .unwrap_or_else(|| Occupancy::empty(channel_id))
    }

    /// Iterate over all channels.
    pub fn iter(&self) -> impl Iterator<Item = &Occupancy> {
        self.channels.values()
    }

    /// Number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Return a new map with one channel replaced.
    #[must_use]
    pub fn with(&self, occupancy: Occupancy) -> Self {
        let mut channels = self.channels.clone();
        channels.insert(occupancy.channel_id.clone(), occupancy);
        Self { channels }
    }
}

impl FromIterator<Occupancy> for OccupancyMap {
    fn from_iter<I: IntoIterator<Item = Occupancy>>(iter: I) -> Self {
        Self {
            channels: iter
                .into_iter()
                .map(|o| (o.channel_id.clone(), o))
                .collect(),
        }
    }
}

/// Fold one presence event into a map, producing the next version.
///
/// - `join` appends the user, without deduplication
/// - `leave` / `timeout` remove every occurrence of the user
/// - `interval` removes `leave` and `timeout` users, then appends the
///   `join` users not already listed, in that order
///
/// An interval describes the channel's membership after the batch, so its
/// join list is merged. A plain `join` is a single notification and is
/// appended as delivered.
///
/// The resulting `count` is the event's reported occupancy.
///
/// # Errors
///
/// Returns [`ReconcileError::MissingUuid`] for a single-user event without
/// a `uuid`. The input map is left untouched.
pub fn apply_event(
    map: &OccupancyMap,
    event: &PresenceEvent,
) -> Result<OccupancyMap, ReconcileError> {
    let mut occupancy = map.get_or_empty(&event.channel);

    let subject = || {
        event.uuid.clone().ok_or_else(|| ReconcileError::MissingUuid {
            channel: event.channel.clone(),
            action: event.action,
        })
    };

    match event.action {
        PresenceAction::Join => occupancy.member_ids.push(subject()?),
        PresenceAction::Leave | PresenceAction::Timeout => {
            occupancy.remove_all(&[subject()?]);
        }
        PresenceAction::Interval => {
            occupancy.remove_all(event.leave.as_deref().unwrap_or_default());
            occupancy.remove_all(event.timeout.as_deref().unwrap_or_default());
            for user_id in event.join.iter().flatten() {
                if !occupancy.contains(user_id) {
                    occupancy.member_ids.push(user_id.clone());
                }
            }
        }
    }
    occupancy.count = event.occupancy;

    trace!(
        channel = %event.channel,
        action = %event.action,
        count = occupancy.count,
        members = occupancy.member_ids.len(),
        "Applied presence event"
    );

    Ok(map.with(occupancy))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<UserId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn map_of(channel: &str, members: &[&str]) -> OccupancyMap {
        OccupancyMap::from_here_now(&HereNow::new().with_channel(channel, ids(members)))
    }

    #[test]
    fn test_snapshot_then_leave() {
        let map = map_of("chA", &["u1", "u2"]);
        let next = apply_event(&map, &PresenceEvent::leave("chA", "u1", 1)).unwrap();

        assert_eq!(next.get("chA").unwrap().member_ids, ids(&["u2"]));
        // The previous version is untouched.
        assert_eq!(map.get("chA").unwrap().member_ids, ids(&["u1", "u2"]));
    }

    #[test]
    fn test_interval_removes_before_joining() {
        let map = map_of("chA", &["u2", "u3"]);
        let event = PresenceEvent::interval("chA", ids(&["u3", "u4"]), ids(&["u2"]), vec![], 2);
        let next = apply_event(&map, &event).unwrap();

        assert_eq!(next.get("chA").unwrap().member_ids, ids(&["u3", "u4"]));
    }

    #[test]
    fn test_interval_join_merges_but_plain_join_appends() {
        let map = map_of("chA", &["u1"]);
        let event = PresenceEvent::interval("chA", ids(&["u1", "u2", "u2"]), vec![], vec![], 2);
        let merged = apply_event(&map, &event).unwrap();
        assert_eq!(merged.get("chA").unwrap().member_ids, ids(&["u1", "u2"]));

        let joined = apply_event(&merged, &PresenceEvent::join("chA", "u2", 2)).unwrap();
        assert_eq!(joined.get("chA").unwrap().member_ids, ids(&["u1", "u2", "u2"]));
    }

    #[test]
    fn test_interval_timeout_list() {
        let map = map_of("chA", &["u1", "u2", "u3"]);
        let event = PresenceEvent::interval("chA", vec![], ids(&["u1"]), ids(&["u3"]), 1);
        let next = apply_event(&map, &event).unwrap();

        assert_eq!(next.get("chA").unwrap().member_ids, ids(&["u2"]));
    }

    #[test]
    fn test_interval_with_missing_lists() {
        let map = map_of("chA", &["u1"]);
        let mut event = PresenceEvent::interval("chA", vec![], vec![], vec![], 9);
        event.join = None;
        event.leave = None;
        event.timeout = None;

        let next = apply_event(&map, &event).unwrap();
        let occupancy = next.get("chA").unwrap();
        assert_eq!(occupancy.member_ids, ids(&["u1"]));
        assert_eq!(occupancy.count, 9);
    }

    #[test]
    fn test_count_is_reported_not_derived() {
        let map = OccupancyMap::from_here_now(&HereNow::new().with_count("chA", 40));
        assert_eq!(map.get("chA").unwrap().count, 40);
        assert!(map.get("chA").unwrap().member_ids.is_empty());

        let next = apply_event(&map, &PresenceEvent::join("chA", "u1", 41)).unwrap();
        let occupancy = next.get("chA").unwrap();
        assert_eq!(occupancy.count, 41);
        assert_eq!(occupancy.member_ids, ids(&["u1"]));
    }

    #[test]
    fn test_unknown_channel_starts_empty() {
        let map = OccupancyMap::new();
        let next = apply_event(&map, &PresenceEvent::join("chB", "u1", 1)).unwrap();

        assert_eq!(next.len(), 1);
        assert_eq!(next.get("chB").unwrap().member_ids, ids(&["u1"]));
    }

    #[test]
    fn test_removing_absent_user_is_harmless() {
        let map = map_of("chA", &["u1"]);
        let next = apply_event(&map, &PresenceEvent::timeout("chA", "ghost", 0)).unwrap();

        let occupancy = next.get("chA").unwrap();
        assert_eq!(occupancy.member_ids, ids(&["u1"]));
        assert_eq!(occupancy.count, 0);
    }

    #[test]
    fn test_join_keeps_duplicates_and_leave_removes_all() {
        let map = map_of("chA", &["u1"]);
        let joined = apply_event(&map, &PresenceEvent::join("chA", "u1", 1)).unwrap();
        assert_eq!(joined.get("chA").unwrap().member_ids, ids(&["u1", "u1"]));

        let left = apply_event(&joined, &PresenceEvent::leave("chA", "u1", 0)).unwrap();
        assert!(left.get("chA").unwrap().member_ids.is_empty());
    }

    #[test]
    fn test_missing_uuid_is_an_error() {
        let map = map_of("chA", &["u1"]);
        let mut event = PresenceEvent::join("chA", "u2", 2);
        event.uuid = None;

        assert_eq!(
            apply_event(&map, &event),
            Err(ReconcileError::MissingUuid {
                channel: "chA".into(),
                action: PresenceAction::Join,
            })
        );
    }

    #[test]
    fn test_event_sequence_fold() {
        let events = vec![
            PresenceEvent::join("chA", "u3", 3),
            PresenceEvent::leave("chA", "u1", 2),
            PresenceEvent::join("chB", "u1", 1),
            PresenceEvent::interval("chA", ids(&["u5"]), ids(&["u2"]), ids(&["u9"]), 2),
            PresenceEvent::timeout("chB", "u1", 0),
        ];

        let map = events
            .iter()
            .try_fold(map_of("chA", &["u1", "u2"]), |map, event| {
                apply_event(&map, event)
            })
            .unwrap();

        assert_eq!(map.get("chA").unwrap().member_ids, ids(&["u3", "u5"]));
        assert_eq!(map.get("chA").unwrap().count, 2);
        assert!(map.get("chB").unwrap().member_ids.is_empty());
        assert_eq!(map.get("chB").unwrap().count, 0);
    }
}
