//! Position-ordered notification feed.
//!
//! A [`NotificationLog`] is a read-only view over one application's
//! [`EventStore`](crate::store::EventStore), merging all of its aggregate
//! streams into the single total order assigned at append time. Followers
//! pull batches from it; they never mutate it.

use tokio::sync::watch;

use crate::store::{EventStore, StoredEvent};

/// An entry of the notification log.
///
/// Identical to a stored event: its `position` field is the entry's place
/// in the global order.
pub type Notification = StoredEvent;

/// Read-only, globally ordered view over an application's event store.
///
/// Entries are never reordered or skipped, and reads are idempotent: the
/// same `(start, limit)` window always returns the same entries.
#[derive(Clone, Debug)]
pub struct NotificationLog {
    store: EventStore,
}

impl NotificationLog {
    #[must_use]
    pub const fn new(store: EventStore) -> Self {
        Self { store }
    }

    /// Read up to `limit` notifications starting at `start` (inclusive).
    #[must_use]
    pub fn select(&self, start: u64, limit: usize) -> Vec<Notification> {
        self.store.select(start, limit)
    }

    /// Number of notifications committed so far.
    #[must_use]
    pub fn committed_count(&self) -> u64 {
        self.store.committed_count()
    }

    /// Watch the committed-notification count; notified on every commit.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.store.watch()
    }
}

#[cfg(test)]
mod tests {
    use nonempty::NonEmpty;
    use uuid::Uuid;

    use super::*;
    use crate::store::PendingEvent;

    #[test]
    fn select_windows_match_the_global_order() {
        let store = EventStore::new();
        let log = NotificationLog::new(store.clone());
        for _ in 0..3 {
            store
                .append(
                    Uuid::new_v4(),
                    None,
                    NonEmpty::singleton(PendingEvent {
                        kind: "test.created",
                        data: serde_json::json!({}),
                    }),
                )
                .unwrap();
        }

        let all = log.select(0, 10);
        assert_eq!(all.len(), 3);
        assert_eq!(log.select(1, 1), all[1..2].to_vec());
        assert_eq!(log.select(1, 1), log.select(1, 1), "reads are idempotent");
        assert_eq!(log.committed_count(), 3);
    }
}
