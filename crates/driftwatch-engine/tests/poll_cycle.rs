//! Two consecutive cycles over one event, driven through the dispatcher.

use std::sync::Arc;

use driftwatch_core::GatewayError;
use driftwatch_embeddings::MockEmbeddingService;
use driftwatch_engine::{
    Dispatcher, DispatcherConfig, OrchestratorConfig, PollOrchestrator, ProviderStatus, Services,
};
use driftwatch_llm::{
    MockFactExtractor, MockProvider, MockResponse, MockSearch, PolledModel, SearchHit,
};
use driftwatch_store::{
    ContextRejectionRepo, CycleStatus, Database, DriftScoreRepo, EventRepo, MemoryHoleRepo,
    NewEvent, PollCycleRepo, SearchResultRepo, SnapshotRepo, SourceRepo,
};

const FIRST: &str = "The dam held.\nNo injuries reported.";
const SECOND: &str = "The dam failed.\nTwo towns evacuated.";

fn embeddings() -> MockEmbeddingService {
    let svc = MockEmbeddingService::new(3);
    svc.pin(FIRST, vec![1.0, 0.0, 0.0]);
    svc.pin(SECOND, vec![0.0, 1.0, 0.0]);
    svc.pin("The dam held.", vec![1.0, 0.0, 0.0]);
    svc.pin("No injuries reported.", vec![0.0, 0.0, 1.0]);
    svc.pin("The dam failed.", vec![0.6, 0.8, 0.0]);
    svc.pin("Two towns evacuated.", vec![0.0, 1.0, 0.0]);
    svc.pin("Officials confirm the dam held.", vec![1.0, 0.0, 0.0]);
    svc.pin("Engineers inspected the spillway.", vec![0.0, 1.0, 0.0]);
    svc
}

fn search() -> MockSearch {
    MockSearch::with_hits(vec![SearchHit {
        title: "Dam update".into(),
        url: "https://news.example/dam".into(),
        content: "Officials confirm the dam held.\nEngineers inspected the spillway.".into(),
        score: 0.87,
        published_date: Some("2026-10-15".into()),
    }])
}

#[tokio::test]
async fn narrative_flip_without_new_evidence() {
    let db = Database::in_memory().unwrap();
    let event = EventRepo::new(db.clone())
        .create(&NewEvent::new("Dam Breach", "What is the status of the dam?"))
        .unwrap();
    SourceRepo::new(db.clone())
        .create(&event.id, "County bulletin", None, "Water levels are rising.")
        .unwrap();

    let gpt = Arc::new(MockProvider::named(
        "openai",
        "gpt-4o",
        vec![MockResponse::text(FIRST), MockResponse::text(SECOND)],
    ));
    let grok = Arc::new(
        MockProvider::named("xai", "grok-3", vec![])
            .repeating(MockResponse::Error(GatewayError::AuthenticationFailed("revoked".into()))),
    );
    let analyst = Arc::new(
        MockProvider::named("openai", "gpt-4o-mini", vec![])
            .repeating(MockResponse::text("The account reversed with no new sources.")),
    );
    let services = Services {
        providers: vec![PolledModel::new(gpt.clone(), 2000), PolledModel::new(grok, 2000)],
        analyst,
        embeddings: Arc::new(embeddings()),
        facts: Arc::new(MockFactExtractor::new()),
        search: Some(Arc::new(search())),
    };
    let orchestrator = Arc::new(PollOrchestrator::new(
        db.clone(),
        Arc::new(services),
        OrchestratorConfig::default(),
    ));
    let dispatcher = Dispatcher::new(db.clone(), orchestrator, DispatcherConfig::default());

    let first = dispatcher.poll_inline(&event.id).await.unwrap();
    assert_eq!(first.results.len(), 2);
    assert_eq!(first.fulfilled(), 1);
    assert!(matches!(first.results[1].status, ProviderStatus::Rejected { .. }));

    dispatcher.trigger(&event.id).unwrap();
    dispatcher.drain().await;

    let cycles = PollCycleRepo::new(db.clone()).list_for_event(&event.id, 10).unwrap();
    assert_eq!(cycles.len(), 2);
    assert!(cycles.iter().all(|c| c.status == CycleStatus::Completed));
    assert_eq!(cycles[0].frozen_source_ids, cycles[1].frozen_source_ids);
    assert!(EventRepo::new(db.clone()).get(&event.id).unwrap().last_polled_at.is_some());

    let snapshots = SnapshotRepo::new(db.clone()).latest_for(&event.id, "gpt-4o", 10).unwrap();
    assert_eq!(snapshots.len(), 2);
    let (latest, earlier) = (&snapshots[0], &snapshots[1]);
    assert_eq!(latest.response_text, SECOND);
    assert!(latest.prompt_used.contains("[Source 1] County bulletin\nWater levels are rising."));
    assert!(latest.prompt_used.contains(
        "[Search 1] Dam update (https://news.example/dam) [2026-10-15]"
    ));

    let scores = DriftScoreRepo::new(db.clone()).list_for_event(&event.id, 10).unwrap();
    assert_eq!(scores.len(), 1);
    let score = &scores[0];
    assert_eq!(score.snapshot_id, latest.id);
    assert_eq!(score.previous_snapshot_id, earlier.id);
    assert!(score.cosine_similarity.abs() < 1e-9);
    assert!((score.drift_magnitude - 1.0).abs() < 1e-9);
    assert!(score.ghost_pivot);
    assert_eq!(
        score.explanation.as_deref(),
        Some("The account reversed with no new sources.")
    );

    let holes = MemoryHoleRepo::new(db.clone()).list_missing_from(&latest.id).unwrap();
    let mut vanished: Vec<&str> = holes.iter().filter_map(|h| h.claim.as_deref()).collect();
    vanished.sort_unstable();
    assert_eq!(vanished, vec!["No injuries reported.", "The dam held."]);
    assert!(holes.iter().all(|h| h.last_seen_snapshot_id == earlier.id));

    let grounding = SearchResultRepo::new(db.clone()).list_for_event(&event.id, 10).unwrap();
    assert_eq!(grounding.len(), 2);

    let rejections = ContextRejectionRepo::new(db.clone()).list_for_snapshot(&latest.id).unwrap();
    assert_eq!(rejections.len(), 2);
    let rejected: Vec<&str> = rejections
        .iter()
        .filter(|r| r.rejected)
        .map(|r| r.provided_fact.as_str())
        .collect();
    assert_eq!(rejected, vec!["Officials confirm the dam held."]);
    assert_eq!(
        ContextRejectionRepo::new(db).list_for_event(&event.id, 10).unwrap().len(),
        4
    );
}

#[tokio::test]
async fn evidence_change_is_drift_but_not_a_ghost_pivot() {
    let db = Database::in_memory().unwrap();
    let event = EventRepo::new(db.clone())
        .create(&NewEvent::new("Dam Breach", "Status?"))
        .unwrap();
    let sources = SourceRepo::new(db.clone());
    let bulletin = sources
        .create(&event.id, "County bulletin", None, "Water levels are rising.")
        .unwrap();

    let gpt = Arc::new(MockProvider::named(
        "openai",
        "gpt-4o",
        vec![MockResponse::text(FIRST), MockResponse::text(SECOND)],
    ));
    let analyst = Arc::new(MockProvider::new(vec![]));
    let services = Services {
        providers: vec![PolledModel::new(gpt, 2000)],
        analyst: analyst.clone(),
        embeddings: Arc::new(embeddings()),
        facts: Arc::new(MockFactExtractor::new()),
        search: None,
    };
    let orchestrator =
        PollOrchestrator::new(db.clone(), Arc::new(services), OrchestratorConfig::default());

    orchestrator.run(&event.id).await.unwrap();
    sources.set_active(&bulletin.id, false).unwrap();
    sources
        .create(
            &event.id,
            "Engineering report",
            Some("https://example.gov/dam"),
            "Spillway breached.",
        )
        .unwrap();
    orchestrator.run(&event.id).await.unwrap();

    let scores = DriftScoreRepo::new(db.clone()).list_for_event(&event.id, 10).unwrap();
    assert_eq!(scores.len(), 1);
    assert!(scores[0].drift_magnitude > 0.05);
    assert!(!scores[0].ghost_pivot);
    assert!(scores[0].explanation.is_none());
    assert_eq!(analyst.call_count(), 0);
    assert!(ContextRejectionRepo::new(db).list_for_event(&event.id, 10).unwrap().is_empty());
}
