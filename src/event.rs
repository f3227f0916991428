//! Domain event sum types.
//!
//! Every aggregate owns a closed enum of event variants, each carrying only
//! its own payload fields. [`DomainEvent`] gives those enums a stable kind
//! string per variant so stored payloads can be routed back to the correct
//! variant during replay, and so downstream consumers can ignore kinds they
//! do not recognise.

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Error returned when decoding a stored event fails.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The event kind was not recognised by this event enum.
    #[error("unknown event kind `{kind}`, expected one of {expected:?}")]
    UnknownKind {
        /// The unrecognised event kind string.
        kind: String,
        /// The list of event kinds this enum can handle.
        expected: &'static [&'static str],
    },
    /// The payload of a recognised kind could not be deserialized.
    #[error("malformed `{kind}` payload: {source}")]
    Payload {
        /// The event kind whose payload was rejected.
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Sum type over one aggregate's event variants.
///
/// Each variant maps to a unique, namespaced kind string (for example
/// `document.created`). The kind is persisted alongside the payload and
/// drives dispatch during replay; an explicit kind list keeps consumers
/// forward-compatible, since a kind outside [`Self::KINDS`] decodes to
/// [`DecodeError::UnknownKind`] rather than a hard failure.
pub trait DomainEvent: Sized + Serialize + DeserializeOwned {
    /// Every kind string this enum can produce or decode.
    const KINDS: &'static [&'static str];

    /// The kind string of this particular event.
    fn kind(&self) -> &'static str;

    /// Serialize the event payload for storage.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if the payload cannot be represented as
    /// a JSON value.
    fn encode(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Deserialize a stored payload back into an event.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownKind`] when `kind` is outside
    /// [`Self::KINDS`], and [`DecodeError::Payload`] when the payload of a
    /// recognised kind does not deserialize.
    fn decode(kind: &str, data: &serde_json::Value) -> Result<Self, DecodeError> {
        if !Self::KINDS.contains(&kind) {
            return Err(DecodeError::UnknownKind {
                kind: kind.to_owned(),
                expected: Self::KINDS,
            });
        }
        serde_json::from_value(data.clone()).map_err(|source| DecodeError::Payload {
            kind: kind.to_owned(),
            source,
        })
    }
}
