//! Runner lifecycle and recovery tests.

use docledger::{
    application::Application,
    documents::{Documents, DocumentsIndex},
    domain::{DocumentEvent, DocumentIndex, IndexEvent, index_id},
    follower::{Follower, Policy},
    service::DocumentService,
    store::EventStore,
    system::{PumpConfig, Runner, RunnerError, System},
};
use thiserror::Error;
use uuid::Uuid;

#[tokio::test]
async fn runner_exposes_registered_applications() {
    let service = DocumentService::start();

    assert!(service.runner().get::<Documents>().is_some());
    assert!(service.runner().get::<DocumentsIndex>().is_some());
    assert!(service.runner().get::<Uuid>().is_none());

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn restarted_follower_resumes_from_its_tracking_position() {
    let document_store = EventStore::new();
    let index_store = EventStore::new();
    let config = PumpConfig::default();

    // First run: project two documents, then shut down.
    let service = DocumentService::resume(document_store.clone(), index_store.clone(), config);
    let a = service.create("a").unwrap();
    let b = service.create("b").unwrap();
    service.wait_until_caught_up().await.unwrap();
    service.shutdown().await.unwrap();

    // Commands keep landing while no pump is running.
    let offline = Documents::new(document_store.clone());
    let c = offline.create("c").unwrap();

    // Second run: the follower picks up at its persisted position.
    let service = DocumentService::resume(document_store, index_store.clone(), config);
    service.wait_until_caught_up().await.unwrap();

    let index = service.runner().get::<DocumentsIndex>().unwrap();
    let entries = index.get().unwrap().entries;
    assert_eq!(entries, std::collections::BTreeSet::from([a, b, c]));

    // Exactly-once: the index stream holds one creation event plus one
    // entry per document, nothing was projected twice.
    let model: Application<DocumentIndex> = Application::new("documents-index", index_store);
    assert_eq!(model.get(index_id()).unwrap().version, 3);

    service.shutdown().await.unwrap();
}

#[derive(Debug, Error)]
#[error("index rebuild is out of service")]
struct OutOfService;

/// Policy that refuses every creation event, for testing pump faults.
struct RefuseCreations;

impl Policy for RefuseCreations {
    type Upstream = DocumentEvent;
    type Model = DocumentIndex;
    type Error = OutOfService;

    fn model_id(&self) -> Uuid {
        index_id()
    }

    fn bootstrap(&self) -> IndexEvent {
        IndexEvent::Created
    }

    fn policy(
        &self,
        _origin: Uuid,
        event: &DocumentEvent,
        _model: &DocumentIndex,
    ) -> Result<Vec<IndexEvent>, OutOfService> {
        match event {
            DocumentEvent::Created { .. } => Err(OutOfService),
            _ => Ok(Vec::new()),
        }
    }
}

#[tokio::test]
async fn policy_failure_halts_the_pump_without_advancing() {
    let documents = Documents::new(EventStore::new());
    let index_store = EventStore::new();
    let follower = Follower::new(
        "refusing-index",
        documents.log(),
        Application::new("refusing-index", index_store.clone()),
        RefuseCreations,
    );
    let runner = Runner::start(System::new().pipe(follower), PumpConfig::default());

    documents.create("unprocessable").unwrap();

    let wait = runner.wait_until_caught_up().await;
    assert!(matches!(wait, Err(RunnerError::Halted { .. })));
    assert_eq!(
        index_store.tracking("refusing-index"),
        None,
        "the position must not move past the failing notification"
    );

    let stopped = runner.stop().await;
    assert!(matches!(stopped, Err(RunnerError::Pump { .. })));
}

#[tokio::test]
async fn stop_lets_the_current_batch_finish() {
    let service = DocumentService::with_config(PumpConfig {
        poll_interval: std::time::Duration::from_millis(10),
        batch_size: 1,
    });

    for i in 0..10 {
        service.create(&format!("doc-{i}")).unwrap();
    }
    service.wait_until_caught_up().await.unwrap();
    assert_eq!(service.get_all().unwrap().len(), 10);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn interrupted_projection_converges_to_the_uninterrupted_result() {
    let config = PumpConfig::default();

    // Reference: one uninterrupted run.
    let reference = DocumentService::with_config(config);
    let mut names = Vec::new();
    for i in 0..5 {
        let name = format!("doc-{i}");
        reference.create(&name).unwrap();
        names.push(name);
    }
    reference.wait_until_caught_up().await.unwrap();
    let expected: Vec<String> = {
        let mut all: Vec<String> = reference
            .get_all()
            .unwrap()
            .into_iter()
            .map(|doc| doc.state.name)
            .collect();
        all.sort();
        all
    };
    reference.shutdown().await.unwrap();

    // Same commands, but the runner restarts between every command.
    let document_store = EventStore::new();
    let index_store = EventStore::new();
    for name in &names {
        let service =
            DocumentService::resume(document_store.clone(), index_store.clone(), config);
        service.create(name).unwrap();
        service.wait_until_caught_up().await.unwrap();
        service.shutdown().await.unwrap();
    }

    let service = DocumentService::resume(document_store, index_store, config);
    service.wait_until_caught_up().await.unwrap();
    let mut actual: Vec<String> = service
        .get_all()
        .unwrap()
        .into_iter()
        .map(|doc| doc.state.name)
        .collect();
    actual.sort();
    assert_eq!(actual, expected);
    service.shutdown().await.unwrap();
}
