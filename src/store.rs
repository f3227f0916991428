//! Append-only event persistence.
//!
//! [`EventStore`] is the durability primitive of the crate: a thread-safe,
//! in-memory, append-only log of immutable events. Events are grouped into
//! per-aggregate streams with contiguous versions, and every committed event
//! additionally receives the next global position under a single
//! serialization point, yielding one total order across all streams.
//!
//! Writes go through [`EventStore::commit`], which applies any number of
//! stream appends plus an optional tracking-record advance atomically.
//! Optimistic concurrency is enforced per stream: an append declares the
//! version it expects the stream to be at, and a mismatch is rejected with a
//! [`ConcurrencyConflict`] without touching the log.
//!
//! # Example
//!
//! ```
//! use docledger::store::EventStore;
//!
//! let store = EventStore::new();
//! assert!(store.read(uuid::Uuid::new_v4()).is_empty());
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

pub use nonempty::NonEmpty;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::event::DomainEvent;

/// Event materialized from the store.
///
/// `version` orders the event within its aggregate's stream (contiguous from
/// 0); `position` orders it within the store's global log (contiguous from
/// 0 across all streams). Together with `aggregate_id` they form the
/// originator metadata of the event; `kind` and `data` carry the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    pub aggregate_id: Uuid,
    pub version: u64,
    pub position: u64,
    pub kind: String,
    pub data: serde_json::Value,
}

/// Event staged for persistence, before version and position are assigned.
#[derive(Clone, Debug)]
pub struct PendingEvent {
    pub kind: &'static str,
    pub data: serde_json::Value,
}

impl PendingEvent {
    /// Serialize a domain event into its persistable form.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if the event payload cannot be encoded.
    pub fn of<E: DomainEvent>(event: &E) -> serde_json::Result<Self> {
        Ok(Self {
            kind: event.kind(),
            data: event.encode()?,
        })
    }
}

/// A batch of events destined for a single aggregate stream.
///
/// `expected` is the version the stream is required to be at for the append
/// to go through: `Some(v)` demands the stream's highest version equals `v`,
/// `None` demands a new (empty) stream. Each [`Recording`] in a commit must
/// target a distinct stream unless the later one expects the versions the
/// earlier one will produce.
#[derive(Clone, Debug)]
pub struct Recording {
    pub aggregate_id: Uuid,
    pub expected: Option<u64>,
    pub events: NonEmpty<PendingEvent>,
}

/// Tracking record advance committed together with derived events.
///
/// Followers persist the global position of the last upstream notification
/// they consumed in their own store, in the same commit as the events that
/// consumption produced, so position advancement and projected-state
/// mutation succeed or fail together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tracking {
    pub follower: String,
    pub position: u64,
}

/// Result of a successful commit: the global positions that were assigned,
/// in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Committed {
    pub positions: Vec<u64>,
}

impl Committed {
    /// Global position of the last event written, if any were.
    #[must_use]
    pub fn last_position(&self) -> Option<u64> {
        self.positions.last().copied()
    }
}

/// Error indicating that an append lost an optimistic-concurrency race.
///
/// Another writer changed the stream between the caller loading the
/// aggregate and committing its events. The store does not retry on the
/// caller's behalf; reload and retry, or surface the conflict.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{}", format_conflict(.aggregate_id, .expected.as_ref(), .actual.as_ref()))]
pub struct ConcurrencyConflict {
    /// Stream the rejected append targeted.
    pub aggregate_id: Uuid,
    /// The version the writer expected; `None` means it expected a new
    /// stream.
    pub expected: Option<u64>,
    /// The stream's actual current version; `None` means the stream is
    /// empty.
    pub actual: Option<u64>,
}

fn format_conflict(aggregate_id: &Uuid, expected: Option<&u64>, actual: Option<&u64>) -> String {
    match (expected, actual) {
        (None, Some(actual)) => format!(
            "concurrency conflict on {aggregate_id}: expected new stream, found version {actual} \
             (hint: another writer created this aggregate; reload and retry)"
        ),
        (Some(expected), actual) => format!(
            "concurrency conflict on {aggregate_id}: expected version {expected}, found {actual:?} \
             (hint: stream was modified; reload and retry)"
        ),
        (None, None) => format!("concurrency conflict on {aggregate_id}: unexpected empty state"),
    }
}

/// Error indicating a tracking record was asked to move backwards.
///
/// Tracking positions are monotonic; committing a position at or below the
/// recorded one means the same notifications would be projected twice.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error(
    "tracking conflict for `{follower}`: position {proposed} does not advance past {current} \
     (hint: these notifications were already processed)"
)]
pub struct TrackingConflict {
    pub follower: String,
    pub current: u64,
    pub proposed: u64,
}

/// Error from [`EventStore::commit`] and [`EventStore::append`].
#[derive(Debug, Error)]
pub enum CommitError {
    /// The commit carried neither recordings nor a tracking advance.
    #[error("cannot commit an empty batch")]
    Empty,
    /// An optimistic-concurrency check failed; nothing was written.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// The tracking record would not advance; nothing was written.
    #[error(transparent)]
    Tracking(#[from] TrackingConflict),
}

struct Inner {
    /// Global log; a notification's position is its index here.
    log: Vec<StoredEvent>,
    /// Per-stream positions, in version order.
    streams: HashMap<Uuid, Vec<u64>>,
    /// Follower name to last consumed upstream position.
    trackings: HashMap<String, u64>,
}

/// Thread-safe, in-memory, append-only event store.
///
/// All mutation funnels through [`commit`](Self::commit) under a single
/// write lock, which is the store's serialization point: version checks,
/// version assignment, global-position assignment and tracking advancement
/// happen in one step. Readers take the read lock and always observe a
/// committed prefix; there are no dirty reads of uncommitted events.
///
/// `Clone` is cheap and clones share the same log.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<RwLock<Inner>>,
    committed: Arc<watch::Sender<u64>>,
}

impl fmt::Debug for EventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStore")
            .field("committed", &*self.committed.borrow())
            .finish()
    }
}

impl EventStore {
    #[must_use]
    pub fn new() -> Self {
        let (committed, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                log: Vec::new(),
                streams: HashMap::new(),
                trackings: HashMap::new(),
            })),
            committed: Arc::new(committed),
        }
    }

    /// Read an aggregate's stream from version 0.
    ///
    /// An unknown id yields an empty stream, not an error; callers decide
    /// whether an empty stream means "no aggregate".
    #[must_use]
    pub fn read(&self, aggregate_id: Uuid) -> Vec<StoredEvent> {
        let inner = self.inner.read().expect("event store lock poisoned");
        inner
            .streams
            .get(&aggregate_id)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&position| inner.log[position as usize].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current highest version of a stream, or `None` for an empty stream.
    #[must_use]
    pub fn current_version(&self, aggregate_id: Uuid) -> Option<u64> {
        let inner = self.inner.read().expect("event store lock poisoned");
        stream_version(&inner.streams, aggregate_id)
    }

    /// Append events to a single stream with optimistic version checking.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Conflict`] when the stream's current version
    /// differs from `expected`; the stream is left untouched.
    pub fn append(
        &self,
        aggregate_id: Uuid,
        expected: Option<u64>,
        events: NonEmpty<PendingEvent>,
    ) -> Result<Committed, CommitError> {
        self.commit(
            vec![Recording {
                aggregate_id,
                expected,
                events,
            }],
            None,
        )
    }

    /// Atomically apply a set of stream appends and an optional tracking
    /// advance.
    ///
    /// Every expected version and the tracking monotonicity are validated
    /// before anything is written; a commit either lands in full or not at
    /// all. On success each event receives the next contiguous version of
    /// its stream and the next global position.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Empty`] when there is nothing to commit,
    /// [`CommitError::Conflict`] when any recording's expected version
    /// mismatches, and [`CommitError::Tracking`] when the tracking record
    /// would not advance.
    #[tracing::instrument(
        skip_all,
        fields(recordings = recordings.len(), tracking = tracking.is_some())
    )]
    pub fn commit(
        &self,
        recordings: Vec<Recording>,
        tracking: Option<Tracking>,
    ) -> Result<Committed, CommitError> {
        if recordings.is_empty() && tracking.is_none() {
            return Err(CommitError::Empty);
        }

        let mut inner = self.inner.write().expect("event store lock poisoned");

        // Validate everything before writing anything. Simulated versions
        // let a later recording in the same commit target a stream an
        // earlier one extends.
        let mut simulated: HashMap<Uuid, Option<u64>> = HashMap::new();
        for recording in &recordings {
            let current = simulated
                .entry(recording.aggregate_id)
                .or_insert_with(|| stream_version(&inner.streams, recording.aggregate_id));
            if *current != recording.expected {
                tracing::debug!(
                    aggregate_id = %recording.aggregate_id,
                    expected = ?recording.expected,
                    actual = ?*current,
                    "version mismatch, rejecting commit"
                );
                return Err(ConcurrencyConflict {
                    aggregate_id: recording.aggregate_id,
                    expected: recording.expected,
                    actual: *current,
                }
                .into());
            }
            let first = recording.expected.map_or(0, |v| v + 1);
            *current = Some(first + recording.events.len() as u64 - 1);
        }

        if let Some(tracking) = &tracking
            && let Some(&current) = inner.trackings.get(&tracking.follower)
            && tracking.position <= current
        {
            return Err(TrackingConflict {
                follower: tracking.follower.clone(),
                current,
                proposed: tracking.position,
            }
            .into());
        }

        let mut positions = Vec::new();
        for recording in recordings {
            let first = recording.expected.map_or(0, |v| v + 1);
            for (offset, event) in recording.events.into_iter().enumerate() {
                let position = inner.log.len() as u64;
                inner.log.push(StoredEvent {
                    aggregate_id: recording.aggregate_id,
                    version: first + offset as u64,
                    position,
                    kind: event.kind.to_owned(),
                    data: event.data,
                });
                inner
                    .streams
                    .entry(recording.aggregate_id)
                    .or_default()
                    .push(position);
                positions.push(position);
            }
        }

        if let Some(tracking) = tracking {
            inner.trackings.insert(tracking.follower, tracking.position);
        }

        let total = inner.log.len() as u64;
        drop(inner);
        self.committed.send_replace(total);
        tracing::debug!(events_appended = positions.len(), "commit applied");
        Ok(Committed { positions })
    }

    /// Read up to `limit` events from the global log, starting at
    /// `start` (inclusive).
    ///
    /// The result is position-ordered and gapless; repeated calls with the
    /// same arguments return identical entries.
    #[must_use]
    pub fn select(&self, start: u64, limit: usize) -> Vec<StoredEvent> {
        let inner = self.inner.read().expect("event store lock poisoned");
        let Ok(start) = usize::try_from(start) else {
            return Vec::new();
        };
        inner.log.iter().skip(start).take(limit).cloned().collect()
    }

    /// Last consumed upstream position recorded for a follower, if any.
    #[must_use]
    pub fn tracking(&self, follower: &str) -> Option<u64> {
        let inner = self.inner.read().expect("event store lock poisoned");
        inner.trackings.get(follower).copied()
    }

    /// Number of events committed to the global log so far.
    #[must_use]
    pub fn committed_count(&self) -> u64 {
        *self.committed.borrow()
    }

    /// Watch the committed-event count.
    ///
    /// The receiver is notified after every successful commit; pumps use it
    /// to wake without polling.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.committed.subscribe()
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

fn stream_version(streams: &HashMap<Uuid, Vec<u64>>, aggregate_id: Uuid) -> Option<u64> {
    streams
        .get(&aggregate_id)
        .map(|positions| positions.len() as u64 - 1)
}
