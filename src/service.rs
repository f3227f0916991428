//! Interface layer of the catalog.
//!
//! [`DocumentService`] wires the stores, both applications and the
//! follower pipeline into a running [`Runner`], and exposes the
//! command/query surface consumed by outer transports. `get_all` is served
//! from the follower's index rather than a stream scan, so it reflects the
//! index's (eventually consistent) view;
//! [`wait_until_caught_up`](DocumentService::wait_until_caught_up) is the
//! readiness hook for callers that need the index current.
//!
//! [`MessageDispatcher`] is the landing point for notifications arriving
//! from the (external, out-of-scope) message broker.

use uuid::Uuid;

use crate::{
    aggregate::Versioned,
    application::LoadError,
    documents::{DocumentCommandResult, Documents, DocumentsIndex},
    domain::Document,
    store::EventStore,
    system::{PumpConfig, Runner, RunnerError, System},
};

/// Command, query and lifecycle surface of the document catalog.
pub struct DocumentService {
    documents: Documents,
    index: DocumentsIndex,
    runner: Runner,
}

impl DocumentService {
    /// Start the service on fresh, empty stores.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start() -> Self {
        Self::with_config(PumpConfig::default())
    }

    /// Start the service on fresh stores with custom pump tuning.
    #[must_use]
    pub fn with_config(config: PumpConfig) -> Self {
        Self::resume(EventStore::new(), EventStore::new(), config)
    }

    /// Start the service over existing stores.
    ///
    /// The follower resumes from the tracking position persisted in
    /// `index_store`, so a restarted service converges to the same derived
    /// state as an uninterrupted run.
    #[must_use]
    pub fn resume(document_store: EventStore, index_store: EventStore, config: PumpConfig) -> Self {
        let documents = Documents::new(document_store);
        let index = DocumentsIndex::new(index_store);
        let follower = index.follower(documents.log());

        let system = System::new()
            .register(documents.clone())
            .register(index.clone())
            .pipe(follower);
        let runner = Runner::start(system, config);

        Self {
            documents,
            index,
            runner,
        }
    }

    /// Create a document and return its id.
    ///
    /// # Errors
    ///
    /// Returns a command error when the append fails.
    pub fn create(&self, name: &str) -> DocumentCommandResult<Uuid> {
        self.documents.create(name)
    }

    /// Load one document.
    ///
    /// A deleted document is returned with `deleted == true`; callers treat
    /// it as absent.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NotFound`] for an unknown id.
    pub fn get_one(&self, id: Uuid) -> Result<Versioned<Document>, LoadError> {
        self.documents.get_one(id)
    }

    /// List all indexed documents, in index order.
    ///
    /// Served from the follower's index; recent commands are reflected once
    /// the pump has caught up.
    ///
    /// # Errors
    ///
    /// Returns a load error when the index or one of the indexed documents
    /// cannot be replayed.
    pub fn get_all(&self) -> Result<Vec<Versioned<Document>>, LoadError> {
        let index = self.index.get()?;
        index
            .entries
            .iter()
            .map(|&id| self.documents.get_one(id))
            .collect()
    }

    /// Rename a document.
    ///
    /// # Errors
    ///
    /// Returns not-found, rejection or conflict errors from the command
    /// path.
    pub fn update(&self, id: Uuid, new_name: &str) -> DocumentCommandResult<()> {
        self.documents.update_one(id, new_name)
    }

    /// Mark a document as deleted (idempotent in effect, irreversible).
    ///
    /// # Errors
    ///
    /// Returns not-found or conflict errors from the command path.
    pub fn delete(&self, id: Uuid) -> DocumentCommandResult<()> {
        self.documents.delete_one(id)
    }

    /// Record the relation `id -> other_id`.
    ///
    /// # Errors
    ///
    /// Returns not-found, rejection or conflict errors from the command
    /// path.
    pub fn link(&self, id: Uuid, other_id: Uuid) -> DocumentCommandResult<()> {
        self.documents.link(id, other_id)
    }

    /// Wait until the index reflects everything committed so far.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Halted`] when the pump has stopped on a
    /// replay failure.
    pub async fn wait_until_caught_up(&self) -> Result<(), RunnerError> {
        self.runner.wait_until_caught_up().await
    }

    /// The underlying runner, for component lookup.
    #[must_use]
    pub const fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Stop the pumps after their current batch and join them.
    ///
    /// # Errors
    ///
    /// Surfaces any pump fault or panic encountered while joining.
    pub async fn shutdown(self) -> Result<(), RunnerError> {
        self.runner.stop().await
    }
}

impl std::fmt::Debug for DocumentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentService").finish_non_exhaustive()
    }
}

/// Routing key of deletion notifications published by the external
/// document service.
pub const DOCUMENT_DELETED_KEY: &str = "document.event.deleted";

/// A notification delivered by the (out-of-scope) message broker.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub routing_key: String,
    pub body: serde_json::Value,
}

/// Dispatch outcome reported back to the broker listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ack {
    /// The message was consumed and must be acknowledged.
    Accepted,
}

/// Routes inbound broker messages onto the service.
///
/// Every message is acknowledged regardless of handling; an unhandled
/// message must not be redelivered forever.
#[derive(Clone, Debug)]
pub struct MessageDispatcher<'a> {
    service: &'a DocumentService,
}

impl<'a> MessageDispatcher<'a> {
    #[must_use]
    pub const fn new(service: &'a DocumentService) -> Self {
        Self { service }
    }

    #[must_use]
    pub const fn service(&self) -> &DocumentService {
        self.service
    }

    /// Handle one inbound message.
    ///
    /// `document.event.deleted` is accepted without triggering any state
    /// change: whether an external deletion should remove local links or
    /// index entries is an unresolved product question, and this
    /// placeholder deliberately does nothing until a concrete rule exists.
    pub fn dispatch(&self, message: &InboundMessage) -> Ack {
        tracing::debug!(routing_key = %message.routing_key, "received inbound message");
        if message.routing_key == DOCUMENT_DELETED_KEY {
            // Intentionally no state change; see the method docs.
        }
        Ack::Accepted
    }
}
