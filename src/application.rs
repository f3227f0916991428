//! Command/query façade over one aggregate type.
//!
//! An [`Application`] binds an aggregate type to an event store. Commands
//! rebuild the aggregate, run the pure handler, and append the produced
//! events with the version captured *before* the command ran, so concurrent
//! writers race on the append and exactly one wins. Queries replay straight
//! from the store and never involve the notification pump.

use std::marker::PhantomData;

use nonempty::NonEmpty;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    aggregate::{Aggregate, Handle, HandleCreate, Versioned},
    event::{DecodeError, DomainEvent},
    notification::NotificationLog,
    store::{Committed, CommitError, ConcurrencyConflict, EventStore, PendingEvent, StoredEvent},
};

/// Error rebuilding an aggregate from its stream.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No stream exists for this id (no creation event was ever committed).
    #[error("aggregate {id} not found")]
    NotFound { id: Uuid },
    /// A stored event could not be decoded into the aggregate's event sum.
    #[error("replay of aggregate {id} failed: {source}")]
    Decode {
        id: Uuid,
        #[source]
        source: DecodeError,
    },
    /// The stream exists but does not begin with a creation event.
    #[error("stream for aggregate {id} does not begin with a creation event")]
    MissingCreation { id: Uuid },
}

/// Error executing a command.
#[derive(Debug, Error)]
pub enum CommandError<E>
where
    E: std::error::Error + 'static,
{
    /// The aggregate could not be rebuilt.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// The aggregate rejected the command; nothing was appended.
    #[error("aggregate rejected command: {0}")]
    Rejected(#[source] E),
    /// Another writer won the optimistic-concurrency race. The command is
    /// not retried automatically; retrying without reloading would silently
    /// reorder intent.
    #[error(transparent)]
    Conflict(ConcurrencyConflict),
    /// An event payload could not be encoded.
    #[error("failed to encode events: {0}")]
    Codec(#[source] serde_json::Error),
}

/// Command/query façade bound to one aggregate type.
///
/// `Clone` is cheap; clones share the underlying store. The application
/// `name` identifies it in logs and as the tracking key when the
/// application sits downstream of a follower pipeline.
pub struct Application<A> {
    name: &'static str,
    store: EventStore,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Clone for Application<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            store: self.store.clone(),
            _aggregate: PhantomData,
        }
    }
}

impl<A> std::fmt::Debug for Application<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application").field("name", &self.name).finish()
    }
}

impl<A: Aggregate> Application<A> {
    #[must_use]
    pub const fn new(name: &'static str, store: EventStore) -> Self {
        Self {
            name,
            store,
            _aggregate: PhantomData,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn store(&self) -> &EventStore {
        &self.store
    }

    /// The globally ordered notification feed over this application's
    /// store, for downstream consumption.
    #[must_use]
    pub fn log(&self) -> NotificationLog {
        NotificationLog::new(self.store.clone())
    }

    /// Rebuild an aggregate by replaying its stream from version 0.
    ///
    /// A logically deleted aggregate is still returned, with whatever
    /// deletion marker its state carries; treating it as absent is the
    /// caller's responsibility.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NotFound`] for an empty stream, and a decode or
    /// corruption error when the stream cannot be folded.
    #[tracing::instrument(skip(self), fields(application = self.name))]
    pub fn get(&self, id: Uuid) -> Result<Versioned<A>, LoadError> {
        let events = self.store.read(id);
        let Some((first, rest)) = events.split_first() else {
            return Err(LoadError::NotFound { id });
        };

        let created = Self::decode(id, first)?;
        let mut state = A::create(&created).ok_or(LoadError::MissingCreation { id })?;
        for stored in rest {
            let event = Self::decode(id, stored)?;
            state.apply(&event);
        }

        let version = rest.last().unwrap_or(first).version;
        tracing::trace!(%id, version, "aggregate rebuilt");
        Ok(Versioned { id, version, state })
    }

    /// Execute a creation command, expecting no stream for `id` yet.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Rejected`] when the handler refuses the
    /// command and [`CommandError::Conflict`] when the stream already
    /// exists.
    #[tracing::instrument(skip(self, command), fields(application = self.name))]
    pub fn create<C>(&self, id: Uuid, command: &C) -> Result<Committed, CommandError<A::Error>>
    where
        A: HandleCreate<C>,
    {
        let events = A::handle_create(command).map_err(CommandError::Rejected)?;
        self.append(id, None, &events)
    }

    /// Execute a command against an existing aggregate.
    ///
    /// The expected version for the append is the aggregate's version
    /// before the command ran; a concurrent writer that commits in between
    /// turns this call into a [`CommandError::Conflict`].
    ///
    /// # Errors
    ///
    /// Returns load, rejection, conflict or encoding errors; in every case
    /// nothing has been appended.
    #[tracing::instrument(skip(self, command), fields(application = self.name))]
    pub fn execute<C>(&self, id: Uuid, command: &C) -> Result<Committed, CommandError<A::Error>>
    where
        A: Handle<C>,
    {
        let current = self.get(id)?;
        let events = current.state.handle(command).map_err(CommandError::Rejected)?;
        self.append(id, Some(current.version), &events)
    }

    fn append(
        &self,
        id: Uuid,
        expected: Option<u64>,
        events: &[A::Event],
    ) -> Result<Committed, CommandError<A::Error>> {
        let mut pending = Vec::with_capacity(events.len());
        for event in events {
            pending.push(PendingEvent::of(event).map_err(CommandError::Codec)?);
        }
        let Some(batch) = NonEmpty::from_vec(pending) else {
            return Ok(Committed::default());
        };

        self.store.append(id, expected, batch).map_err(|e| match e {
            CommitError::Conflict(conflict) => CommandError::Conflict(conflict),
            CommitError::Empty | CommitError::Tracking(_) => {
                unreachable!("command appends are non-empty and carry no tracking record")
            }
        })
    }

    fn decode(id: Uuid, stored: &StoredEvent) -> Result<A::Event, LoadError> {
        A::Event::decode(&stored.kind, &stored.data)
            .map_err(|source| LoadError::Decode { id, source })
    }
}
