//! Typing state: one slot per user.
//!
//! A user is either absent (not typing) or present with `is_typing = true`
//! and the timestamp of the last accepted update. Stopping removes the
//! entry; nothing is ever stored with `is_typing = false`.
//!
//! The slot is keyed by user only. A user typing in a second channel takes
//! over the slot from the first once an update for it is accepted.

use murmur_protocol::{ChannelId, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::metrics;

/// A typing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Typing {
    /// Who is typing.
    pub user_id: UserId,
    /// Where they are typing.
    pub channel_id: ChannelId,
    /// Typing or not.
    pub is_typing: bool,
    /// When this state was set, in milliseconds.
    pub timestamp: u64,
}

impl Typing {
    /// Create a typing record.
    #[must_use]
    pub fn new(
        user_id: impl Into<UserId>,
        channel_id: impl Into<ChannelId>,
        is_typing: bool,
        timestamp: u64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            is_typing,
            timestamp,
        }
    }
}

/// Current typing entries by user.
pub type TypingMap = HashMap<UserId, Typing>;

/// Decide whether a candidate update is worth applying (and sending).
///
/// True when the user has no entry, when the typing flag flips, or when the
/// stored entry is older than `resend`. The last case keeps remote timers
/// fresh while a user keeps typing.
#[must_use]
pub fn should_send(stored: Option<&Typing>, candidate: &Typing, resend: Duration) -> bool {
    match stored {
        None => true,
        Some(stored) => {
            stored.is_typing != candidate.is_typing
                || candidate.timestamp.saturating_sub(stored.timestamp) > resend.as_millis() as u64
        }
    }
}

/// Users typing in a channel, oldest first.
#[must_use]
pub fn typing_in(map: &TypingMap, channel_id: &str, exclude: Option<&str>) -> Vec<UserId> {
    let mut entries: Vec<&Typing> = map
        .values()
        .filter(|t| t.is_typing && t.channel_id == channel_id)
        .filter(|t| exclude != Some(t.user_id.as_str()))
        .collect();
    entries.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    entries.into_iter().map(|t| t.user_id.clone()).collect()
}

/// Shared typing state.
///
/// Every mutation is a single read-modify-publish step on a watch channel,
/// so local calls, incoming signals and the sweep never interleave.
#[derive(Debug)]
pub struct TypingStore {
    state: watch::Sender<Arc<TypingMap>>,
}

impl TypingStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(Arc::new(TypingMap::new()));
        Self { state }
    }

    /// Apply a candidate if [`should_send`] allows it.
    ///
    /// A typing candidate is stored, a non-typing one removes the user's
    /// entry. Returns whether the candidate was accepted.
    pub fn update(&self, candidate: Typing, resend: Duration) -> bool {
        let mut accepted = false;
        self.state.send_if_modified(|map| {
            if !should_send(map.get(&candidate.user_id), &candidate, resend) {
                return false;
            }
            accepted = true;

            let next = Arc::make_mut(map);
            let changed = if candidate.is_typing {
                next.insert(candidate.user_id.clone(), candidate.clone());
                true
            } else {
                next.remove(&candidate.user_id).is_some()
            };
            metrics::set_typing_active(next.len());
            changed
        });

        if accepted {
            debug!(
                user = %candidate.user_id,
                channel = %candidate.channel_id,
                is_typing = candidate.is_typing,
                "Typing updated"
            );
        }
        accepted
    }

    /// Remove entries older than `timeout` at `now_ms`.
    ///
    /// Returns the removed entries.
    pub fn expire(&self, now_ms: u64, timeout: Duration) -> Vec<Typing> {
        let timeout_ms = timeout.as_millis() as u64;
        let mut expired = Vec::new();
        self.state.send_if_modified(|map| {
            let stale = map
                .values()
                .any(|t| now_ms.saturating_sub(t.timestamp) > timeout_ms);
            if !stale {
                return false;
            }

            let next = Arc::make_mut(map);
            next.retain(|_, t| {
                let keep = now_ms.saturating_sub(t.timestamp) <= timeout_ms;
                if !keep {
                    expired.push(t.clone());
                }
                keep
            });
            metrics::set_typing_active(next.len());
            true
        });
        expired
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.state.send_if_modified(|map| {
            if map.is_empty() {
                return false;
            }
            *map = Arc::new(TypingMap::new());
            metrics::set_typing_active(0);
            true
        });
    }

    /// Get a user's entry.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<Typing> {
        self.state.borrow().get(user_id).cloned()
    }

    /// The current map.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TypingMap> {
        Arc::clone(&self.state.borrow())
    }

    /// Observe the map; the receiver starts at the current value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<TypingMap>> {
        self.state.subscribe()
    }
}

impl Default for TypingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESEND: Duration = Duration::from_secs(3);
    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_should_send_rules() {
        let stored = Typing::new("u1", "ch1", true, 1_000);

        assert!(should_send(None, &stored, RESEND));
        assert!(!should_send(
            Some(&stored),
            &Typing::new("u1", "ch1", true, 2_000),
            RESEND
        ));
        assert!(should_send(
            Some(&stored),
            &Typing::new("u1", "ch1", false, 2_000),
            RESEND
        ));
        assert!(should_send(
            Some(&stored),
            &Typing::new("u1", "ch1", true, 4_001),
            RESEND
        ));
    }

    #[test]
    fn test_stop_removes_entry() {
        let store = TypingStore::new();
        assert!(store.update(Typing::new("u1", "ch1", true, 0), RESEND));
        assert!(store.get("u1").is_some());

        assert!(store.update(Typing::new("u1", "ch1", false, 1), RESEND));
        assert!(store.get("u1").is_none());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_stop_without_entry_is_accepted() {
        let store = TypingStore::new();
        let mut rx = store.subscribe();

        assert!(store.update(Typing::new("u1", "ch1", false, 0), RESEND));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_refresh_after_resend_updates_timestamp() {
        let store = TypingStore::new();
        store.update(Typing::new("u1", "ch1", true, 0), RESEND);

        assert!(!store.update(Typing::new("u1", "ch1", true, 2_000), RESEND));
        assert_eq!(store.get("u1").unwrap().timestamp, 0);

        assert!(store.update(Typing::new("u1", "ch1", true, 3_500), RESEND));
        assert_eq!(store.get("u1").unwrap().timestamp, 3_500);
    }

    #[test]
    fn test_expire_removes_stale_entries() {
        let store = TypingStore::new();
        store.update(Typing::new("u1", "ch1", true, 0), RESEND);
        store.update(Typing::new("u2", "ch1", true, 4_000), RESEND);

        assert!(store.expire(5_000, TIMEOUT).is_empty());

        let expired = store.expire(5_001, TIMEOUT);
        assert_eq!(expired, vec![Typing::new("u1", "ch1", true, 0)]);
        assert!(store.get("u1").is_none());
        assert!(store.get("u2").is_some());
    }

    #[test]
    fn test_one_slot_per_user() {
        let store = TypingStore::new();
        store.update(Typing::new("u1", "ch1", true, 0), RESEND);

        // Same flag, inside the resend window: the second channel is not seen.
        assert!(!store.update(Typing::new("u1", "ch2", true, 10), RESEND));
        assert_eq!(typing_in(&store.snapshot(), "ch1", None), vec!["u1"]);
        assert!(typing_in(&store.snapshot(), "ch2", None).is_empty());

        // Past the window the second channel takes the slot over.
        assert!(store.update(Typing::new("u1", "ch2", true, 4_000), RESEND));
        assert!(typing_in(&store.snapshot(), "ch1", None).is_empty());
        assert_eq!(typing_in(&store.snapshot(), "ch2", None), vec!["u1"]);
    }

    #[test]
    fn test_typing_in_orders_and_excludes() {
        let mut map = TypingMap::new();
        for (user, ts) in [("carol", 30), ("alice", 10), ("me", 5), ("bob", 10)] {
            map.insert(user.to_string(), Typing::new(user, "ch1", true, ts));
        }
        map.insert("dave".into(), Typing::new("dave", "ch2", true, 1));

        assert_eq!(
            typing_in(&map, "ch1", Some("me")),
            vec!["alice", "bob", "carol"]
        );
        assert_eq!(typing_in(&map, "ch1", None).first().unwrap(), "me");
    }

    #[test]
    fn test_clear() {
        let store = TypingStore::new();
        store.update(Typing::new("u1", "ch1", true, 0), RESEND);
        store.clear();
        assert!(store.snapshot().is_empty());
    }
}
