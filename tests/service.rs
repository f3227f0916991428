//! End-to-end tests of the document service.

use std::collections::BTreeSet;

use docledger::{
    application::{CommandError, LoadError},
    documents::DocumentsIndex,
    domain::DocumentError,
    service::DocumentService,
};

#[tokio::test]
async fn created_documents_are_retrievable_at_version_zero() {
    let service = DocumentService::start();

    let id = service.create("user guide").unwrap();
    let doc = service.get_one(id).unwrap();

    assert_eq!(doc.id, id);
    assert_eq!(doc.version, 0);
    assert_eq!(doc.state.name, "user guide");
    assert!(doc.state.related.is_empty());
    assert!(!doc.state.deleted);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let service = DocumentService::start();
    let id = uuid::Uuid::new_v4();

    assert!(matches!(
        service.get_one(id),
        Err(LoadError::NotFound { .. })
    ));
    assert!(matches!(
        service.update(id, "renamed"),
        Err(CommandError::Load(LoadError::NotFound { .. }))
    ));
    assert!(matches!(
        service.delete(id),
        Err(CommandError::Load(LoadError::NotFound { .. }))
    ));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn get_all_serves_documents_from_the_index() {
    let service = DocumentService::start();

    let a = service.create("a").unwrap();
    let b = service.create("b").unwrap();
    service.wait_until_caught_up().await.unwrap();

    let all = service.get_all().unwrap();
    let ids: BTreeSet<_> = all.iter().map(|doc| doc.id).collect();
    assert_eq!(ids, BTreeSet::from([a, b]));

    let mut sorted = ids.iter().copied().collect::<Vec<_>>();
    sorted.sort_unstable();
    let listed: Vec<_> = all.iter().map(|doc| doc.id).collect();
    assert_eq!(listed, sorted, "listing follows index order");

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn deleted_documents_read_as_deleted_and_leave_the_listing() {
    let service = DocumentService::start();

    let id = service.create("ephemeral").unwrap();
    service.wait_until_caught_up().await.unwrap();
    assert_eq!(service.get_all().unwrap().len(), 1);

    service.delete(id).unwrap();
    service.wait_until_caught_up().await.unwrap();

    let doc = service.get_one(id).unwrap();
    assert!(doc.state.deleted, "the stream survives deletion");
    assert!(service.get_all().unwrap().is_empty());

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn delete_is_idempotent_in_effect() {
    let service = DocumentService::start();

    let id = service.create("twice").unwrap();
    service.delete(id).unwrap();
    service.delete(id).unwrap();

    let doc = service.get_one(id).unwrap();
    assert!(doc.state.deleted);
    assert_eq!(doc.version, 2, "each delete appends another marker");

    service.wait_until_caught_up().await.unwrap();
    assert!(service.get_all().unwrap().is_empty());

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn commands_on_deleted_documents_are_rejected() {
    let service = DocumentService::start();

    let id = service.create("doomed").unwrap();
    let other = service.create("other").unwrap();
    service.delete(id).unwrap();

    assert!(matches!(
        service.update(id, "zombie"),
        Err(CommandError::Rejected(DocumentError::Deleted))
    ));
    assert!(matches!(
        service.link(id, other),
        Err(CommandError::Rejected(DocumentError::Deleted))
    ));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn links_are_projected_into_the_reverse_link_table() {
    let service = DocumentService::start();

    let a = service.create("a").unwrap();
    let b = service.create("b").unwrap();
    service.link(a, b).unwrap();
    service.wait_until_caught_up().await.unwrap();

    assert_eq!(service.get_one(a).unwrap().state.related, vec![b]);

    let index = service.runner().get::<DocumentsIndex>().unwrap();
    let state = index.get().unwrap();
    assert_eq!(state.reverse_links.get(&b), Some(&BTreeSet::from([a])));
    assert_eq!(state.reverse_links.get(&a), Some(&BTreeSet::new()));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn deleting_a_link_target_scrubs_every_reverse_link_set() {
    let service = DocumentService::start();

    let a = service.create("a").unwrap();
    let b = service.create("b").unwrap();
    let c = service.create("c").unwrap();
    service.link(a, b).unwrap();
    service.link(c, a).unwrap();
    service.delete(b).unwrap();
    service.wait_until_caught_up().await.unwrap();

    let index = service.runner().get::<DocumentsIndex>().unwrap();
    let state = index.get().unwrap();

    assert!(!state.entries.contains(&b));
    assert!(!state.reverse_links.contains_key(&b));
    assert_eq!(
        state.reverse_links.get(&a),
        Some(&BTreeSet::from([c])),
        "a's reverse links keep unrelated entries"
    );

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn sequential_renames_apply_in_order() {
    let service = DocumentService::start();

    let id = service.create("v1").unwrap();
    service.update(id, "v2").unwrap();
    service.update(id, "v3").unwrap();

    let doc = service.get_one(id).unwrap();
    assert_eq!(doc.state.name, "v3");
    assert_eq!(doc.version, 2);

    service.shutdown().await.unwrap();
}
