//! Follower-side projection machinery.
//!
//! A [`Follower`] consumes another application's notification log in strict
//! global order and projects it into its own query-model aggregate. The
//! last consumed position is a tracking record in the follower's *own*
//! store, committed in the same atomic step as the derived events, so a
//! batch is either fully projected with the position advanced, or not at
//! all: pulls are at-least-once, projection is exactly-once.
//!
//! What each upstream event means for the query model is expressed by a
//! [`Policy`]: a pure function from (event, current derived state) to
//! derived events. Unrecognised event kinds are skipped, keeping the
//! follower forward-compatible with upstream schema growth; every other
//! failure is a replay failure that halts the pump rather than corrupt the
//! derived state.

use thiserror::Error;
use uuid::Uuid;

use crate::{
    aggregate::Aggregate,
    application::{Application, LoadError},
    event::{DecodeError, DomainEvent},
    notification::NotificationLog,
    store::{CommitError, NonEmpty, PendingEvent, Recording, Tracking},
};

/// Pure projection rule of a follower.
///
/// The derived aggregate (the query model) has exactly one instance with a
/// well-known, deterministic identity; [`Policy::bootstrap`] supplies its
/// creation event the first time the follower needs it.
pub trait Policy {
    /// Event sum of the application being followed.
    type Upstream: DomainEvent;

    /// The derived query-model aggregate.
    type Model: Aggregate;

    /// Policy failure. Fatal to the pump: skipping a notification would
    /// silently corrupt the derived state.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Identity of the single query-model instance.
    fn model_id(&self) -> Uuid;

    /// Creation event for the query model.
    fn bootstrap(&self) -> <Self::Model as Aggregate>::Event;

    /// Map one upstream event to zero or more derived events.
    ///
    /// `origin` is the id of the upstream aggregate the event belongs to.
    /// `model` is the current derived state, including the effect of
    /// earlier events in the same batch.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when the notification cannot be projected.
    fn policy(
        &self,
        origin: Uuid,
        event: &Self::Upstream,
        model: &Self::Model,
    ) -> Result<Vec<<Self::Model as Aggregate>::Event>, Self::Error>;
}

/// Replay failure of a follower.
///
/// Every variant halts the pump without advancing the tracking position;
/// the failing notification will be re-delivered after the fault is
/// resolved.
#[derive(Debug, Error)]
pub enum ReplayError<E>
where
    E: std::error::Error + 'static,
{
    /// The policy refused a notification.
    #[error("policy failed at position {position}: {source}")]
    Policy {
        position: u64,
        #[source]
        source: E,
    },
    /// A recognised notification kind carried a payload that does not
    /// decode.
    #[error("malformed notification at position {position}: {source}")]
    Notification {
        position: u64,
        #[source]
        source: DecodeError,
    },
    /// The query model could not be rebuilt from the follower's store.
    #[error("failed to rebuild the query model: {0}")]
    Model(#[source] LoadError),
    /// The bootstrap event did not create the query model.
    #[error("bootstrap event did not create the query model")]
    Bootstrap,
    /// A derived event payload could not be encoded.
    #[error("failed to encode derived events: {0}")]
    Codec(#[source] serde_json::Error),
    /// The joint commit of derived events and tracking advance failed.
    #[error(transparent)]
    Commit(#[from] CommitError),
}

/// Outcome of one successful batch pull.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Batch {
    /// Notifications consumed, including skipped unknown kinds.
    pub processed: usize,
    /// Global position of the last consumed notification.
    pub last_position: u64,
}

/// A specialized application that projects an upstream notification log
/// into its own query model.
pub struct Follower<P: Policy> {
    name: &'static str,
    upstream: NotificationLog,
    app: Application<P::Model>,
    policy: P,
}

impl<P: Policy> Follower<P> {
    #[must_use]
    pub const fn new(
        name: &'static str,
        upstream: NotificationLog,
        app: Application<P::Model>,
        policy: P,
    ) -> Self {
        Self {
            name,
            upstream,
            app,
            policy,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn upstream(&self) -> &NotificationLog {
        &self.upstream
    }

    /// Last consumed upstream position, as durably recorded in the
    /// follower's own store.
    #[must_use]
    pub fn position(&self) -> Option<u64> {
        self.app.store().tracking(self.name)
    }

    /// Pull and project the next batch of notifications.
    ///
    /// Returns `Ok(None)` when there is nothing new. Otherwise decodes each
    /// notification in order, dispatches it through the policy, folds the
    /// derived events into the working state with the model's own `apply`,
    /// and commits derived events plus the tracking advance atomically.
    ///
    /// # Errors
    ///
    /// Returns a [`ReplayError`]; the tracking position is untouched and
    /// the same batch will be re-delivered on the next pull.
    #[tracing::instrument(skip(self), fields(follower = self.name))]
    pub fn pull(&self, limit: usize) -> Result<Option<Batch>, ReplayError<P::Error>> {
        let start = self.position().map_or(0, |position| position + 1);
        let notifications = self.upstream.select(start, limit);
        let Some(last) = notifications.last() else {
            return Ok(None);
        };
        let last_position = last.position;

        // Load the query model, or bootstrap a fresh one lazily. The
        // bootstrap event is only persisted if the batch derives anything.
        let (mut model, expected, mut derived) = match self.app.get(self.policy.model_id()) {
            Ok(current) => (current.state, Some(current.version), Vec::new()),
            Err(LoadError::NotFound { .. }) => {
                let created = self.policy.bootstrap();
                let fresh = P::Model::create(&created).ok_or(ReplayError::Bootstrap)?;
                (fresh, None, vec![created])
            }
            Err(source) => return Err(ReplayError::Model(source)),
        };

        let mut produced = false;
        for notification in &notifications {
            let event = match P::Upstream::decode(&notification.kind, &notification.data) {
                Ok(event) => event,
                Err(DecodeError::UnknownKind { kind, .. }) => {
                    tracing::debug!(
                        kind = %kind,
                        position = notification.position,
                        "skipping unrecognised notification kind"
                    );
                    continue;
                }
                Err(source) => {
                    return Err(ReplayError::Notification {
                        position: notification.position,
                        source,
                    });
                }
            };

            let events = self
                .policy
                .policy(notification.aggregate_id, &event, &model)
                .map_err(|source| ReplayError::Policy {
                    position: notification.position,
                    source,
                })?;
            for event in events {
                produced = true;
                model.apply(&event);
                derived.push(event);
            }
        }

        let recordings = if produced {
            let mut pending = Vec::with_capacity(derived.len());
            for event in &derived {
                pending.push(PendingEvent::of(event).map_err(ReplayError::Codec)?);
            }
            NonEmpty::from_vec(pending)
                .map(|events| {
                    vec![Recording {
                        aggregate_id: self.policy.model_id(),
                        expected,
                        events,
                    }]
                })
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        self.app.store().commit(
            recordings,
            Some(Tracking {
                follower: self.name.to_owned(),
                position: last_position,
            }),
        )?;

        tracing::debug!(
            processed = notifications.len(),
            last_position,
            "batch projected"
        );
        Ok(Some(Batch {
            processed: notifications.len(),
            last_position,
        }))
    }
}

impl<P: Policy> std::fmt::Debug for Follower<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Follower").field("name", &self.name).finish()
    }
}
