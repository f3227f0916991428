//! The document domain.
//!
//! [`Document`] is the externally commanded aggregate: a named entity that
//! can link to other documents and be marked deleted. Deletion never removes
//! anything from persistence; it appends a terminal marker and readers are
//! expected to treat the aggregate as logically absent.
//!
//! [`DocumentIndex`] is the query model derived from document events: the
//! set of known (non-deleted) documents plus a reverse-link table answering
//! "who links to this document?". It is an ordinary aggregate, but its
//! events are only ever emitted by the follower's policy and it has a
//! single deterministic identity, since exactly one instance exists.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    aggregate::{Aggregate, Handle, HandleCreate},
    event::DomainEvent,
};

/// A named, linkable, soft-deletable domain entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    /// Descriptive name; the main commanded state.
    pub name: String,
    /// Uni-directional relations to other documents, owned by this side.
    pub related: Vec<Uuid>,
    /// Terminal deletion marker.
    pub deleted: bool,
}

/// Events of the [`Document`] aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DocumentEvent {
    /// Carries the full initial state.
    #[serde(rename = "document.created")]
    Created { name: String },
    #[serde(rename = "document.renamed")]
    Renamed { new_name: String },
    /// Records the relation `self -> other`; the other side is untouched.
    #[serde(rename = "document.linked")]
    Linked { other_id: Uuid },
    #[serde(rename = "document.deleted")]
    Deleted,
}

impl DomainEvent for DocumentEvent {
    const KINDS: &'static [&'static str] = &[
        "document.created",
        "document.renamed",
        "document.linked",
        "document.deleted",
    ];

    fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "document.created",
            Self::Renamed { .. } => "document.renamed",
            Self::Linked { .. } => "document.linked",
            Self::Deleted => "document.deleted",
        }
    }
}

/// Command rejection for the [`Document`] aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// The document carries the terminal deletion marker; deletion is
    /// irreversible through the command surface.
    #[error("document has been deleted")]
    Deleted,
}

impl Aggregate for Document {
    type Event = DocumentEvent;
    type Error = DocumentError;

    fn create(event: &DocumentEvent) -> Option<Self> {
        match event {
            DocumentEvent::Created { name } => Some(Self {
                name: name.clone(),
                related: Vec::new(),
                deleted: false,
            }),
            _ => None,
        }
    }

    fn apply(&mut self, event: &DocumentEvent) {
        match event {
            DocumentEvent::Created { .. } => {}
            DocumentEvent::Renamed { new_name } => self.name.clone_from(new_name),
            DocumentEvent::Linked { other_id } => self.related.push(*other_id),
            DocumentEvent::Deleted => self.deleted = true,
        }
    }
}

/// Bring a new document into existence.
#[derive(Clone, Debug)]
pub struct CreateDocument {
    pub name: String,
}

/// Replace the document's name.
#[derive(Clone, Debug)]
pub struct RenameDocument {
    pub new_name: String,
}

/// Link this document to another one.
#[derive(Clone, Debug)]
pub struct LinkDocument {
    pub other_id: Uuid,
}

/// Mark the document as deleted.
#[derive(Clone, Copy, Debug)]
pub struct DeleteDocument;

impl HandleCreate<CreateDocument> for Document {
    fn handle_create(command: &CreateDocument) -> Result<Vec<DocumentEvent>, DocumentError> {
        Ok(vec![DocumentEvent::Created {
            name: command.name.clone(),
        }])
    }
}

impl Handle<RenameDocument> for Document {
    fn handle(&self, command: &RenameDocument) -> Result<Vec<DocumentEvent>, DocumentError> {
        if self.deleted {
            return Err(DocumentError::Deleted);
        }
        Ok(vec![DocumentEvent::Renamed {
            new_name: command.new_name.clone(),
        }])
    }
}

impl Handle<LinkDocument> for Document {
    fn handle(&self, command: &LinkDocument) -> Result<Vec<DocumentEvent>, DocumentError> {
        if self.deleted {
            return Err(DocumentError::Deleted);
        }
        Ok(vec![DocumentEvent::Linked {
            other_id: command.other_id,
        }])
    }
}

impl Handle<DeleteDocument> for Document {
    fn handle(&self, _command: &DeleteDocument) -> Result<Vec<DocumentEvent>, DocumentError> {
        // Re-deleting appends another marker; observable state is
        // unchanged, so the command is idempotent in effect.
        Ok(vec![DocumentEvent::Deleted])
    }
}

/// Identity of the single [`DocumentIndex`] instance.
///
/// Derived deterministically so the follower and every reader arrive at the
/// same aggregate without coordination.
#[must_use]
pub fn index_id() -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, b"/index/documents")
}

/// Query model over all documents.
///
/// `entries` lists the known, non-deleted document ids; `reverse_links`
/// maps a document id to the set of documents that link to it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentIndex {
    pub entries: BTreeSet<Uuid>,
    pub reverse_links: BTreeMap<Uuid, BTreeSet<Uuid>>,
}

/// Events of the [`DocumentIndex`] query model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum IndexEvent {
    #[serde(rename = "index.created")]
    Created,
    #[serde(rename = "index.entry-added")]
    EntryAdded { document_id: Uuid },
    #[serde(rename = "index.entry-removed")]
    EntryRemoved { document_id: Uuid },
    #[serde(rename = "index.link-added")]
    LinkAdded { owner_id: Uuid, other_id: Uuid },
}

impl DomainEvent for IndexEvent {
    const KINDS: &'static [&'static str] = &[
        "index.created",
        "index.entry-added",
        "index.entry-removed",
        "index.link-added",
    ];

    fn kind(&self) -> &'static str {
        match self {
            Self::Created => "index.created",
            Self::EntryAdded { .. } => "index.entry-added",
            Self::EntryRemoved { .. } => "index.entry-removed",
            Self::LinkAdded { .. } => "index.link-added",
        }
    }
}

impl Aggregate for DocumentIndex {
    type Event = IndexEvent;
    type Error = std::convert::Infallible;

    fn create(event: &IndexEvent) -> Option<Self> {
        match event {
            IndexEvent::Created => Some(Self::default()),
            _ => None,
        }
    }

    fn apply(&mut self, event: &IndexEvent) {
        match event {
            IndexEvent::Created => {}
            IndexEvent::EntryAdded { document_id } => {
                self.entries.insert(*document_id);
                self.reverse_links.entry(*document_id).or_default();
            }
            IndexEvent::EntryRemoved { document_id } => {
                self.entries.remove(document_id);
                self.reverse_links.remove(document_id);
                // Discard the id from every remaining reverse-link set;
                // sets that never contained it are left alone.
                for links in self.reverse_links.values_mut() {
                    links.remove(document_id);
                }
            }
            IndexEvent::LinkAdded { owner_id, other_id } => {
                self.reverse_links
                    .entry(*other_id)
                    .or_default()
                    .insert(*owner_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(events: &[IndexEvent]) -> DocumentIndex {
        let mut index = DocumentIndex::default();
        for event in events {
            index.apply(event);
        }
        index
    }

    #[test]
    fn created_document_starts_undeleted_and_unlinked() {
        let doc = Document::create(&DocumentEvent::Created {
            name: "notes".to_owned(),
        })
        .unwrap();
        assert_eq!(doc.name, "notes");
        assert!(doc.related.is_empty());
        assert!(!doc.deleted);
    }

    #[test]
    fn non_creation_event_cannot_create() {
        assert!(Document::create(&DocumentEvent::Deleted).is_none());
        assert!(DocumentIndex::create(&IndexEvent::EntryAdded {
            document_id: Uuid::new_v4()
        })
        .is_none());
    }

    #[test]
    fn rename_and_link_are_rejected_on_deleted_documents() {
        let mut doc = Document::create(&DocumentEvent::Created {
            name: "notes".to_owned(),
        })
        .unwrap();
        doc.apply(&DocumentEvent::Deleted);

        assert_eq!(
            doc.handle(&RenameDocument {
                new_name: "new".to_owned()
            }),
            Err(DocumentError::Deleted)
        );
        assert_eq!(
            doc.handle(&LinkDocument {
                other_id: Uuid::new_v4()
            }),
            Err(DocumentError::Deleted)
        );
        assert!(doc.handle(&DeleteDocument).is_ok(), "delete stays appendable");
    }

    #[test]
    fn index_identity_is_deterministic() {
        assert_eq!(index_id(), index_id());
        assert_ne!(index_id(), Uuid::new_v4());
    }

    #[test]
    fn entry_added_initialises_an_empty_reverse_link_set() {
        let id = Uuid::new_v4();
        let index = fold(&[IndexEvent::Created, IndexEvent::EntryAdded { document_id: id }]);
        assert!(index.entries.contains(&id));
        assert_eq!(index.reverse_links.get(&id), Some(&BTreeSet::new()));
    }

    #[test]
    fn link_added_creates_the_target_set_on_demand() {
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let index = fold(&[
            IndexEvent::Created,
            IndexEvent::LinkAdded {
                owner_id: owner,
                other_id: other,
            },
        ]);
        assert_eq!(
            index.reverse_links.get(&other),
            Some(&BTreeSet::from([owner]))
        );
    }

    #[test]
    fn entry_removed_scrubs_the_id_from_every_reverse_link_set() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let index = fold(&[
            IndexEvent::Created,
            IndexEvent::EntryAdded { document_id: a },
            IndexEvent::EntryAdded { document_id: b },
            IndexEvent::LinkAdded {
                owner_id: b,
                other_id: a,
            },
            IndexEvent::EntryRemoved { document_id: b },
        ]);

        assert!(!index.entries.contains(&b));
        assert!(!index.reverse_links.contains_key(&b));
        assert_eq!(
            index.reverse_links.get(&a),
            Some(&BTreeSet::new()),
            "b must be scrubbed from a's reverse-link set"
        );
    }

    #[test]
    fn removing_an_unknown_entry_is_a_no_op() {
        let index = fold(&[
            IndexEvent::Created,
            IndexEvent::EntryRemoved {
                document_id: Uuid::new_v4(),
            },
        ]);
        assert_eq!(index, fold(&[IndexEvent::Created]));
    }
}
