//! Flattened "who is online" view.

use dashmap::DashMap;
use murmur_protocol::UserId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::occupancy::OccupancyMap;

/// Online status derived from occupancy. Only `true` entries are produced.
pub type OnlineMap = HashMap<UserId, bool>;

/// An externally owned `user -> online` table kept in sync by
/// [`OccupancyReconciler::get_presence`](crate::OccupancyReconciler::get_presence).
pub type PresenceAggregate = Arc<DashMap<UserId, bool>>;

/// Flatten every channel's members into `user -> true`.
///
/// The local user is always online.
#[must_use]
pub fn online_view(map: &OccupancyMap, local_user: &str) -> OnlineMap {
    let mut online: OnlineMap = map
        .iter()
        .flat_map(|occupancy| occupancy.member_ids.iter())
        .map(|id| (id.clone(), true))
        .collect();
    online.insert(local_user.to_string(), true);
    online
}

/// Fold a fresh online view into an aggregate.
///
/// Everyone online is marked `true`; every other `true` entry except the
/// local user flips to `false`. The second pass catches users who vanished
/// from all channels without an event naming the channel the aggregate
/// last saw them in.
pub fn fold_presence(aggregate: &DashMap<UserId, bool>, online: &OnlineMap, local_user: &str) {
    for (user, is_online) in online {
        if *is_online {
            aggregate.insert(user.clone(), true);
        }
    }

    for mut entry in aggregate.iter_mut() {
        let still_online = online.get(entry.key()).copied().unwrap_or(false);
        if *entry.value() && entry.key() != local_user && !still_online {
            *entry.value_mut() = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::Occupancy;

    fn occupancy(channel: &str, members: &[&str]) -> Occupancy {
        Occupancy {
            channel_id: channel.to_string(),
            count: members.len(),
            member_ids: members.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_online_view_flattens_channels() {
        let map: OccupancyMap = vec![occupancy("a", &["u1", "u2"]), occupancy("b", &["u2", "u3"])]
            .into_iter()
            .collect();

        let online = online_view(&map, "me");
        assert_eq!(online.len(), 4);
        assert!(online.values().all(|v| *v));
        assert_eq!(online.get("me"), Some(&true));
    }

    #[test]
    fn test_local_user_online_in_empty_map() {
        let online = online_view(&OccupancyMap::new(), "me");
        assert_eq!(online, OnlineMap::from([("me".to_string(), true)]));
    }

    #[test]
    fn test_fold_marks_vanished_users_offline() {
        let aggregate = DashMap::new();

        fold_presence(&aggregate, &OnlineMap::from([("u1".to_string(), true)]), "me");
        assert_eq!(aggregate.get("u1").map(|v| *v), Some(true));

        fold_presence(&aggregate, &OnlineMap::new(), "me");
        assert_eq!(aggregate.get("u1").map(|v| *v), Some(false));
    }

    #[test]
    fn test_fold_never_marks_local_user_offline() {
        let aggregate = DashMap::new();
        aggregate.insert("me".to_string(), true);

        fold_presence(&aggregate, &OnlineMap::new(), "me");
        assert_eq!(aggregate.get("me").map(|v| *v), Some(true));
    }

    #[test]
    fn test_fold_leaves_unrelated_entries() {
        let aggregate = DashMap::new();
        aggregate.insert("offline-already".to_string(), false);

        fold_presence(&aggregate, &OnlineMap::from([("u2".to_string(), true)]), "me");
        assert_eq!(aggregate.get("offline-already").map(|v| *v), Some(false));
        assert_eq!(aggregate.get("u2").map(|v| *v), Some(true));
        assert_eq!(aggregate.len(), 2);
    }
}
