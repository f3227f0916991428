//! Command-side domain primitives.
//!
//! An [`Aggregate`] is an entity whose only legitimate state changes are the
//! ordered fold of its event stream: the creation event constructs the
//! state, every later event passes through the same pure
//! [`apply`](Aggregate::apply) whether it is being replayed from storage or
//! has just been produced by a command. Commands themselves are pure
//! functions from current state to new events ([`Handle`] /
//! [`HandleCreate`]); persisting the events is the application's job.

use uuid::Uuid;

use crate::event::DomainEvent;

/// A versioned domain entity rebuilt by folding its event stream.
pub trait Aggregate: Sized {
    /// The closed set of event variants this aggregate emits.
    type Event: DomainEvent;

    /// Error produced when a command is invalid for the current state.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Construct the initial state from the stream's first event.
    ///
    /// Returns `None` when the event is not a creation variant, which marks
    /// the stream as corrupt rather than silently producing a default
    /// state.
    fn create(event: &Self::Event) -> Option<Self>;

    /// Apply one event to the state.
    ///
    /// This is the single source of truth for state transitions: replay and
    /// live mutation both go through it, so a rebuilt aggregate is
    /// identical to one mutated in place.
    fn apply(&mut self, event: &Self::Event);
}

/// Handle a command against existing aggregate state.
///
/// Implementations validate the command and return the events it produces;
/// they never mutate `self`.
pub trait Handle<C>: Aggregate {
    /// # Errors
    ///
    /// Returns `Self::Error` when the command is invalid for the current
    /// state.
    fn handle(&self, command: &C) -> Result<Vec<Self::Event>, Self::Error>;
}

/// Handle a command that brings a new aggregate into existence.
pub trait HandleCreate<C>: Aggregate {
    /// # Errors
    ///
    /// Returns `Self::Error` when the command is invalid.
    fn handle_create(command: &C) -> Result<Vec<Self::Event>, Self::Error>;
}

/// Aggregate state together with its identity and committed version.
///
/// `version` is the version of the last committed event; a freshly created
/// aggregate is at version 0 and every committed event increments it by
/// exactly one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<A> {
    pub id: Uuid,
    pub version: u64,
    pub state: A,
}
