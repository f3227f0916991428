//! The concrete applications of the catalog.
//!
//! [`Documents`] is the command/query surface over the [`Document`]
//! aggregate. [`DocumentsIndex`] is the follower-side application: it owns
//! the query model and implements the [`Policy`] that projects document
//! events into index events.

use uuid::Uuid;

use crate::{
    aggregate::Versioned,
    application::{Application, CommandError, LoadError},
    domain::{
        CreateDocument, DeleteDocument, Document, DocumentError, DocumentEvent, DocumentIndex,
        IndexEvent, LinkDocument, RenameDocument, index_id,
    },
    follower::{Follower, Policy},
    notification::NotificationLog,
    store::EventStore,
};

/// Result alias for document commands.
pub type DocumentCommandResult<T> = Result<T, CommandError<DocumentError>>;

/// Command/query application for documents.
///
/// Commands append events through the optimistic path; queries rebuild
/// aggregates on demand and never touch the notification pump.
#[derive(Clone, Debug)]
pub struct Documents {
    app: Application<Document>,
}

impl Documents {
    #[must_use]
    pub fn new(store: EventStore) -> Self {
        Self {
            app: Application::new("documents", store),
        }
    }

    /// Notification feed for downstream followers.
    #[must_use]
    pub fn log(&self) -> NotificationLog {
        self.app.log()
    }

    /// Create a new document and return its id.
    ///
    /// # Errors
    ///
    /// Returns a command error when the append fails.
    pub fn create(&self, name: &str) -> DocumentCommandResult<Uuid> {
        let id = Uuid::new_v4();
        self.app.create(
            id,
            &CreateDocument {
                name: name.to_owned(),
            },
        )?;
        tracing::debug!(%id, "document created");
        Ok(id)
    }

    /// Load one document at its latest version.
    ///
    /// A deleted document is still returned, with `deleted == true`; it is
    /// the caller's job to treat it as absent.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NotFound`] when no such document exists.
    pub fn get_one(&self, id: Uuid) -> Result<Versioned<Document>, LoadError> {
        self.app.get(id)
    }

    /// Rename a document.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NotFound`] (wrapped) for an unknown id, a
    /// rejection for a deleted document, or a conflict when a concurrent
    /// writer wins the race.
    pub fn update_one(&self, id: Uuid, new_name: &str) -> DocumentCommandResult<()> {
        self.app.execute(
            id,
            &RenameDocument {
                new_name: new_name.to_owned(),
            },
        )?;
        Ok(())
    }

    /// Mark a document as deleted.
    ///
    /// Idempotent in effect: re-deleting appends another marker event but
    /// observable state is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NotFound`] (wrapped) for an unknown id or a
    /// conflict when a concurrent writer wins the race.
    pub fn delete_one(&self, id: Uuid) -> DocumentCommandResult<()> {
        self.app.execute(id, &DeleteDocument)?;
        Ok(())
    }

    /// Record the uni-directional relation `id -> other_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NotFound`] (wrapped) for an unknown id, a
    /// rejection for a deleted document, or a conflict when a concurrent
    /// writer wins the race.
    pub fn link(&self, id: Uuid, other_id: Uuid) -> DocumentCommandResult<()> {
        self.app.execute(id, &LinkDocument { other_id })?;
        Ok(())
    }
}

/// Follower-side application owning the document index.
#[derive(Clone, Debug)]
pub struct DocumentsIndex {
    app: Application<DocumentIndex>,
}

impl DocumentsIndex {
    pub const NAME: &'static str = "documents-index";

    #[must_use]
    pub fn new(store: EventStore) -> Self {
        Self {
            app: Application::new(Self::NAME, store),
        }
    }

    /// Current state of the index.
    ///
    /// Before the follower has projected anything the index aggregate does
    /// not exist yet; that reads as an empty index rather than an error.
    ///
    /// # Errors
    ///
    /// Returns a load error when the index stream exists but cannot be
    /// replayed.
    pub fn get(&self) -> Result<DocumentIndex, LoadError> {
        match self.app.get(index_id()) {
            Ok(index) => Ok(index.state),
            Err(LoadError::NotFound { .. }) => Ok(DocumentIndex::default()),
            Err(error) => Err(error),
        }
    }

    /// Build the follower that keeps this index consistent with an
    /// upstream document application.
    #[must_use]
    pub fn follower(&self, upstream: NotificationLog) -> Follower<Self> {
        Follower::new(Self::NAME, upstream, self.app.clone(), self.clone())
    }
}

impl Policy for DocumentsIndex {
    type Upstream = DocumentEvent;
    type Model = DocumentIndex;
    type Error = std::convert::Infallible;

    fn model_id(&self) -> Uuid {
        index_id()
    }

    fn bootstrap(&self) -> IndexEvent {
        IndexEvent::Created
    }

    fn policy(
        &self,
        origin: Uuid,
        event: &DocumentEvent,
        _index: &DocumentIndex,
    ) -> Result<Vec<IndexEvent>, Self::Error> {
        Ok(match event {
            DocumentEvent::Created { .. } => vec![IndexEvent::EntryAdded { document_id: origin }],
            DocumentEvent::Deleted => vec![IndexEvent::EntryRemoved { document_id: origin }],
            DocumentEvent::Linked { other_id } => vec![IndexEvent::LinkAdded {
                owner_id: origin,
                other_id: *other_id,
            }],
            DocumentEvent::Renamed { .. } => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn pipeline() -> (Documents, DocumentsIndex, Follower<DocumentsIndex>) {
        let documents = Documents::new(EventStore::new());
        let index = DocumentsIndex::new(EventStore::new());
        let follower = index.follower(documents.log());
        (documents, index, follower)
    }

    #[test]
    fn created_documents_appear_in_the_index() {
        let (documents, index, follower) = pipeline();
        let a = documents.create("a").unwrap();
        let b = documents.create("b").unwrap();

        follower.pull(10).unwrap();

        let state = index.get().unwrap();
        assert_eq!(state.entries, BTreeSet::from([a, b]));
    }

    #[test]
    fn links_build_the_reverse_link_table() {
        let (documents, index, follower) = pipeline();
        let a = documents.create("a").unwrap();
        let b = documents.create("b").unwrap();
        documents.link(a, b).unwrap();

        follower.pull(10).unwrap();

        let state = index.get().unwrap();
        assert_eq!(state.reverse_links.get(&b), Some(&BTreeSet::from([a])));
    }

    #[test]
    fn deletion_scrubs_the_index_and_reverse_links() {
        let (documents, index, follower) = pipeline();
        let a = documents.create("a").unwrap();
        let b = documents.create("b").unwrap();
        documents.link(a, b).unwrap();
        documents.delete_one(b).unwrap();

        follower.pull(10).unwrap();

        let state = index.get().unwrap();
        assert!(!state.entries.contains(&b));
        assert!(!state.reverse_links.contains_key(&b));
        assert!(state.entries.contains(&a));
    }

    #[test]
    fn renames_do_not_touch_the_index() {
        let (documents, index, follower) = pipeline();
        let a = documents.create("a").unwrap();
        follower.pull(10).unwrap();
        let before = index.get().unwrap();

        documents.update_one(a, "renamed").unwrap();
        follower.pull(10).unwrap();

        assert_eq!(index.get().unwrap(), before);
        assert_eq!(follower.position(), Some(1), "rename is still consumed");
    }

    #[test]
    fn empty_index_reads_as_default_before_projection() {
        let (_, index, _) = pipeline();
        assert_eq!(index.get().unwrap(), DocumentIndex::default());
    }

    #[test]
    fn commands_on_deleted_documents_are_rejected() {
        let (documents, _, _) = pipeline();
        let id = documents.create("doomed").unwrap();
        documents.delete_one(id).unwrap();

        assert!(matches!(
            documents.update_one(id, "zombie"),
            Err(CommandError::Rejected(DocumentError::Deleted))
        ));
        assert!(
            documents.delete_one(id).is_ok(),
            "re-delete appends another marker"
        );
        let doc = documents.get_one(id).unwrap();
        assert!(doc.state.deleted);
        assert_eq!(doc.state.name, "doomed");
    }
}
