use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use murmur_types::events::PresenceEvent;
use murmur_types::UserId;

/// Tracks online/offline status per user and reports edge transitions.
/// Volatile by design — state does not survive a restart. Driven entirely by
/// connection lifecycle signals; there is no polling.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Mutex<HashMap<UserId, PresenceState>>>,
}

struct PresenceState {
    online: bool,
    /// The connection currently owning this user's presence. A newer
    /// connection for the same user takes over ownership so a stale
    /// disconnect cannot flip the user offline.
    conn_id: Option<Uuid>,
    since: DateTime<Utc>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Marks the user online under the given connection. Returns an event
    /// only on an offline -> online edge; repeated marks while already
    /// online return `None` (only edge transitions are events).
    pub fn mark_online(&self, user_id: UserId, conn_id: Uuid) -> Option<PresenceEvent> {
        let mut map = self.inner.lock().expect("presence map poisoned");
        let now = Utc::now();
        match map.get_mut(&user_id) {
            Some(state) if state.online => {
                state.conn_id = Some(conn_id);
                None
            }
            Some(state) => {
                state.online = true;
                state.conn_id = Some(conn_id);
                state.since = now;
                debug!("user {} online", user_id);
                Some(PresenceEvent {
                    user_id,
                    online: true,
                    at: now,
                })
            }
            None => {
                map.insert(
                    user_id,
                    PresenceState {
                        online: true,
                        conn_id: Some(conn_id),
                        since: now,
                    },
                );
                debug!("user {} online", user_id);
                Some(PresenceEvent {
                    user_id,
                    online: true,
                    at: now,
                })
            }
        }
    }

    /// Marks the user offline, but only if the given connection still owns
    /// the presence entry. A stale connection (one that was taken over)
    /// returns `None` and changes nothing.
    pub fn mark_offline(&self, user_id: UserId, conn_id: Uuid) -> Option<PresenceEvent> {
        let mut map = self.inner.lock().expect("presence map poisoned");
        let now = Utc::now();
        match map.get_mut(&user_id) {
            Some(state) if state.online && state.conn_id == Some(conn_id) => {
                state.online = false;
                state.conn_id = None;
                state.since = now;
                debug!("user {} offline", user_id);
                Some(PresenceEvent {
                    user_id,
                    online: false,
                    at: now,
                })
            }
            _ => None,
        }
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.inner
            .lock()
            .expect("presence map poisoned")
            .get(&user_id)
            .map_or(false, |s| s.online)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.inner
            .lock()
            .expect("presence map poisoned")
            .iter()
            .filter(|(_, s)| s.online)
            .map(|(&id, _)| id)
            .collect()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_online_marks_emit_one_event() {
        let tracker = PresenceTracker::new();
        let conn = Uuid::new_v4();

        assert!(tracker.mark_online(1, conn).is_some());
        assert!(tracker.mark_online(1, conn).is_none());
        assert!(tracker.is_online(1));
    }

    #[test]
    fn offline_then_online_emits_two_events() {
        let tracker = PresenceTracker::new();
        let conn = Uuid::new_v4();

        assert!(tracker.mark_online(1, conn).is_some());
        let off = tracker.mark_offline(1, conn).unwrap();
        assert!(!off.online);
        let on = tracker.mark_online(1, conn).unwrap();
        assert!(on.online);
    }

    #[test]
    fn stale_connection_cannot_flip_user_offline() {
        let tracker = PresenceTracker::new();
        let old_conn = Uuid::new_v4();
        let new_conn = Uuid::new_v4();

        assert!(tracker.mark_online(1, old_conn).is_some());
        // Reconnect takes over; no edge, no event.
        assert!(tracker.mark_online(1, new_conn).is_none());

        // The old connection's teardown is ignored.
        assert!(tracker.mark_offline(1, old_conn).is_none());
        assert!(tracker.is_online(1));

        // The owning connection can still go offline.
        assert!(tracker.mark_offline(1, new_conn).is_some());
        assert!(!tracker.is_online(1));
    }

    #[test]
    fn offline_for_unknown_user_is_silent() {
        let tracker = PresenceTracker::new();
        assert!(tracker.mark_offline(42, Uuid::new_v4()).is_none());
        assert!(tracker.online_users().is_empty());
    }
}
