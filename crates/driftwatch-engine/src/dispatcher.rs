//! Outer loop: decide which events are due, fan work out under a global
//! concurrency ceiling, retry failed orchestrations with backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use driftwatch_core::ids::{EventId, SourceId};
use driftwatch_settings::DriftwatchSettings;
use driftwatch_store::{Database, EventRepo, PollCycleRepo};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{DispatchError, EngineError};
use crate::orchestrator::{PollOrchestrator, PollReport, Synthesis};
use crate::scheduler::{is_due_for_poll, tier_for};

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Running cycles older than this are failed at the start of a tick,
    /// unless their event is still in flight.
    pub stale_after: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_retries: 2,
            retry_base_delay: Duration::from_secs(2),
            stale_after: Duration::from_secs(30 * 60),
        }
    }
}

impl DispatcherConfig {
    pub fn from_settings(settings: &DriftwatchSettings) -> Self {
        let polling = &settings.polling;
        Self {
            max_concurrent: polling.max_concurrent_cycles.max(1),
            max_retries: polling.max_retries,
            retry_base_delay: Duration::from_millis(polling.retry_base_delay_ms),
            stale_after: Duration::from_secs(polling.stale_cycle_after_secs),
        }
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Active events considered.
    pub active: usize,
    pub due: usize,
    /// Active events that are not due yet: `active - due`.
    pub skipped: usize,
    pub dispatched: usize,
    /// Due, but a cycle for the event is already in flight.
    pub in_flight: usize,
    /// Abandoned `running` cycles marked failed before dispatch.
    pub stale_failed: usize,
}

/// Marks an event as in flight; dropping it clears the mark.
struct InFlightGuard {
    map: Arc<DashMap<EventId, Instant>>,
    event_id: EventId,
}

impl InFlightGuard {
    fn claim(map: &Arc<DashMap<EventId, Instant>>, event_id: &EventId) -> Option<Self> {
        match map.entry(event_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let _ = slot.insert(Instant::now());
                Some(Self {
                    map: Arc::clone(map),
                    event_id: event_id.clone(),
                })
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let _ = self.map.remove(&self.event_id);
    }
}

/// The part of the dispatcher a spawned work item needs.
#[derive(Clone)]
struct Worker {
    orchestrator: Arc<PollOrchestrator>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    config: DispatcherConfig,
}

impl Worker {
    #[instrument(skip_all, fields(event_id = %event_id))]
    async fn run_with_retries(&self, event_id: EventId) -> Option<PollReport> {
        let mut attempt = 0;
        loop {
            let permit = tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("cancelled before acquiring a slot");
                    return None;
                }
                permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok()?,
            };
            let result = self.orchestrator.run(&event_id).await;
            drop(permit);

            match result {
                Ok(report) => return Some(report),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "orchestration failed, retrying"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => return None,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, attempts = attempt + 1, "orchestration failed");
                    return None;
                }
            }
        }
    }
}

pub struct Dispatcher {
    db: Database,
    worker: Worker,
    in_flight: Arc<DashMap<EventId, Instant>>,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        orchestrator: Arc<PollOrchestrator>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            db,
            worker: Worker {
                orchestrator,
                semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
                cancel: CancellationToken::new(),
                config,
            },
            in_flight: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Events with a cycle currently queued or running.
    pub fn in_flight(&self) -> Vec<EventId> {
        let mut ids: Vec<EventId> = self.in_flight.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn is_in_flight(&self, event_id: &EventId) -> bool {
        self.in_flight.contains_key(event_id)
    }

    /// One scheduling pass. Returns as soon as work is submitted; cycles
    /// run in the background.
    #[instrument(skip_all, fields(now = %now))]
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, DispatchError> {
        if self.worker.cancel.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        let cutoff = chrono::Duration::from_std(self.worker.config.stale_after)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let live = self.in_flight();
        let stale_failed = PollCycleRepo::new(self.db.clone()).fail_stale(cutoff, &live)?;

        let events = EventRepo::new(self.db.clone()).list_active()?;
        let mut report = TickReport {
            active: events.len(),
            stale_failed,
            ..TickReport::default()
        };

        for event in events {
            if !is_due_for_poll(event.created_at, event.last_polled_at, now) {
                report.skipped += 1;
                continue;
            }
            report.due += 1;
            match self.submit(&event.id) {
                Ok(()) => {
                    report.dispatched += 1;
                    debug!(
                        event_id = %event.id,
                        tier = tier_for(event.created_at, now).label,
                        "event dispatched"
                    );
                }
                Err(DispatchError::AlreadyRunning(_)) => report.in_flight += 1,
                Err(e) => return Err(e),
            }
        }

        info!(
            active = report.active,
            due = report.due,
            dispatched = report.dispatched,
            skipped = report.skipped,
            in_flight = report.in_flight,
            stale_failed = report.stale_failed,
            "tick complete"
        );
        Ok(report)
    }

    /// Queue one cycle for an event regardless of its schedule.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub fn trigger(&self, event_id: &EventId) -> Result<(), DispatchError> {
        if EventRepo::new(self.db.clone()).find(event_id)?.is_none() {
            return Err(DispatchError::NotFound(event_id.clone()));
        }
        self.submit(event_id)
    }

    /// Run one cycle on the caller's task and wait for its report. Takes a
    /// concurrency slot like any other cycle, but is never retried.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn poll_inline(&self, event_id: &EventId) -> Result<PollReport, DispatchError> {
        if self.worker.cancel.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        let _guard = InFlightGuard::claim(&self.in_flight, event_id)
            .ok_or_else(|| DispatchError::AlreadyRunning(event_id.clone()))?;
        let _permit = Arc::clone(&self.worker.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::ShuttingDown)?;
        self.worker
            .orchestrator
            .run(event_id)
            .await
            .map_err(|e| match e {
                EngineError::EventNotFound(id) => DispatchError::NotFound(id),
                other => DispatchError::Failed(other),
            })
    }

    /// One-off answer from a chosen subset of sources. Not a poll cycle:
    /// nothing is stored and the event's schedule is untouched.
    pub async fn synthesize(
        &self,
        event_id: &EventId,
        source_ids: Option<&[SourceId]>,
        model_id: Option<&str>,
    ) -> Result<Synthesis, DispatchError> {
        if self.worker.cancel.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        self.worker
            .orchestrator
            .synthesize(event_id, source_ids, model_id)
            .await
            .map_err(|e| match e {
                EngineError::EventNotFound(id) => DispatchError::NotFound(id),
                other => DispatchError::Failed(other),
            })
    }

    fn submit(&self, event_id: &EventId) -> Result<(), DispatchError> {
        if self.worker.cancel.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        let guard = InFlightGuard::claim(&self.in_flight, event_id)
            .ok_or_else(|| DispatchError::AlreadyRunning(event_id.clone()))?;
        let worker = self.worker.clone();
        let event_id = event_id.clone();
        let _ = self.tracker.spawn(async move {
            let _guard = guard;
            let _ = worker.run_with_retries(event_id).await;
        });
        Ok(())
    }

    /// Tick every `interval` until shutdown.
    pub async fn run_loop(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "dispatcher loop started");
        loop {
            tokio::select! {
                () = self.worker.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()) {
                        error!(error = %e, "tick failed");
                    }
                }
            }
        }
        info!("dispatcher loop stopped");
    }

    /// Wait for every submitted cycle to finish. New work can still be
    /// submitted afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        let _ = self.tracker.reopen();
    }

    /// Stop accepting work, abandon queued retries, and wait for running
    /// cycles to finish.
    pub async fn shutdown(&self) {
        self.worker.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("dispatcher shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{OrchestratorConfig, Services};
    use driftwatch_embeddings::MockEmbeddingService;
    use driftwatch_llm::{
        MockFactExtractor, MockProvider, MockResponse, MockSearch, PolledModel, SearchHit,
    };
    use driftwatch_store::{CycleStatus, EventStatus, NewEvent};

    fn services_for(provider: Arc<MockProvider>) -> Services {
        Services {
            providers: vec![PolledModel::new(provider, 2000)],
            analyst: Arc::new(MockProvider::new(vec![]).repeating(MockResponse::text("why"))),
            embeddings: Arc::new(MockEmbeddingService::new(4)),
            facts: Arc::new(MockFactExtractor::new()),
            search: None,
        }
    }

    fn dispatcher_from(db: &Database, services: Services, config: DispatcherConfig) -> Dispatcher {
        let orchestrator = Arc::new(PollOrchestrator::new(
            db.clone(),
            Arc::new(services),
            OrchestratorConfig::default(),
        ));
        Dispatcher::new(db.clone(), orchestrator, config)
    }

    fn dispatcher_with(db: &Database, provider: MockProvider) -> (Dispatcher, Arc<MockProvider>) {
        let provider = Arc::new(provider);
        let services = services_for(provider.clone());
        (dispatcher_from(db, services, DispatcherConfig::default()), provider)
    }

    fn slow(secs: u64) -> MockProvider {
        MockProvider::named("openai", "gpt-4o", vec![]).repeating(MockResponse::delayed(
            Duration::from_secs(secs),
            MockResponse::text("eventually"),
        ))
    }

    fn count_cycles(db: &Database, event_id: &EventId, status: &str) -> usize {
        db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM poll_cycles WHERE event_id = ?1 AND status = ?2",
                [event_id.as_str(), status],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .unwrap()
    }

    fn answering() -> MockProvider {
        MockProvider::named("openai", "gpt-4o", vec![]).repeating(MockResponse::text("Steady."))
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(Duration::MAX, 40), Duration::MAX);
    }

    #[test]
    fn config_from_settings() {
        let mut settings = DriftwatchSettings::default();
        settings.polling.max_concurrent_cycles = 0;
        let config = DispatcherConfig::from_settings(&settings);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.retry_base_delay, Duration::from_millis(2_000));
        assert_eq!(config.stale_after, Duration::from_secs(1_800));
    }

    #[tokio::test]
    async fn tick_dispatches_only_due_events() {
        let db = Database::in_memory().unwrap();
        let events = EventRepo::new(db.clone());
        let now = Utc::now();

        let fresh = events.create(&NewEvent::new("Fresh", "t")).unwrap();
        let recent = events.create(&NewEvent::new("Recent", "t")).unwrap();
        events.mark_polled(&recent.id, now - chrono::Duration::minutes(5)).unwrap();
        let paused = events.create(&NewEvent::new("Paused", "t")).unwrap();
        events.set_status(&paused.id, EventStatus::Paused).unwrap();

        let (dispatcher, provider) = dispatcher_with(&db, answering());
        let report = dispatcher.tick(now).unwrap();
        assert_eq!(report.active, 2);
        assert_eq!(report.due, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.in_flight, 0);
        assert!(dispatcher.is_in_flight(&fresh.id));

        dispatcher.drain().await;
        assert!(dispatcher.in_flight().is_empty());
        assert_eq!(provider.call_count(), 1);
        let cycles = PollCycleRepo::new(db.clone()).list_for_event(&fresh.id, 10).unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].status, CycleStatus::Completed);
        assert!(PollCycleRepo::new(db).list_for_event(&recent.id, 10).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_event_is_skipped() {
        let db = Database::in_memory().unwrap();
        let event = EventRepo::new(db.clone()).create(&NewEvent::new("Slow", "t")).unwrap();
        let (dispatcher, _) = dispatcher_with(&db, slow(30));

        let first = dispatcher.tick(Utc::now()).unwrap();
        assert_eq!(first.dispatched, 1);
        let second = dispatcher.tick(Utc::now()).unwrap();
        assert_eq!(second.due, 1);
        assert_eq!(second.skipped, 0);
        assert_eq!(second.in_flight, 1);
        assert_eq!(second.dispatched, 0);

        assert!(matches!(
            dispatcher.trigger(&event.id),
            Err(DispatchError::AlreadyRunning(_))
        ));
        assert!(matches!(
            dispatcher.poll_inline(&event.id).await,
            Err(DispatchError::AlreadyRunning(_))
        ));

        dispatcher.drain().await;
        assert!(dispatcher.trigger(&event.id).is_ok());
        dispatcher.drain().await;
    }

    #[tokio::test]
    async fn stale_cycles_failed_on_tick() {
        let db = Database::in_memory().unwrap();
        let event = EventRepo::new(db.clone()).create(&NewEvent::new("Stale", "t")).unwrap();
        let now = Utc::now();
        let cycles = PollCycleRepo::new(db.clone());
        let abandoned = cycles
            .create_at(&event.id, &[], now - chrono::Duration::hours(2))
            .unwrap();
        EventRepo::new(db.clone()).mark_polled(&event.id, now).unwrap();

        let (dispatcher, _) = dispatcher_with(&db, answering());
        let report = dispatcher.tick(now).unwrap();
        assert_eq!(report.stale_failed, 1);
        assert_eq!(report.dispatched, 0);
        assert_eq!(cycles.get(&abandoned.id).unwrap().status, CycleStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_sweep_spares_in_flight_cycle() {
        let db = Database::in_memory().unwrap();
        let event = EventRepo::new(db.clone()).create(&NewEvent::new("Long", "t")).unwrap();
        let config = DispatcherConfig {
            stale_after: Duration::from_secs(10),
            ..DispatcherConfig::default()
        };
        let dispatcher = dispatcher_from(&db, services_for(Arc::new(slow(60))), config);

        assert_eq!(dispatcher.tick(Utc::now()).unwrap().dispatched, 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count_cycles(&db, &event.id, "running"), 1);

        let later = dispatcher.tick(Utc::now() + chrono::Duration::hours(1)).unwrap();
        assert_eq!(later.stale_failed, 0);
        assert_eq!(later.in_flight, 1);
        assert_eq!(count_cycles(&db, &event.id, "running"), 1);

        dispatcher.drain().await;
        assert_eq!(count_cycles(&db, &event.id, "completed"), 1);
        assert_eq!(count_cycles(&db, &event.id, "failed"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_runs_max_retries_more_times() {
        let db = Database::in_memory().unwrap();
        let event = EventRepo::new(db.clone()).create(&NewEvent::new("Flaky", "t")).unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_search BEFORE INSERT ON search_results
                 BEGIN SELECT RAISE(ABORT, 'search_results is read-only'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        let provider = Arc::new(answering());
        let search = Arc::new(MockSearch::with_hits(vec![SearchHit {
            title: "Wire".into(),
            url: "https://news.example/wire".into(),
            content: "Update.".into(),
            score: 0.5,
            published_date: None,
        }]));
        let mut services = services_for(provider.clone());
        services.search = Some(search.clone());
        let config = DispatcherConfig::default();
        let max_retries = config.max_retries as usize;
        let dispatcher = dispatcher_from(&db, services, config);

        dispatcher.trigger(&event.id).unwrap();
        dispatcher.drain().await;
        assert_eq!(search.queries().len(), max_retries + 1);
        assert_eq!(count_cycles(&db, &event.id, "failed"), max_retries + 1);
        assert_eq!(provider.call_count(), 0);
        assert!(EventRepo::new(db).get(&event.id).unwrap().last_polled_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_row_is_not_retried() {
        let db = Database::in_memory().unwrap();
        let event = EventRepo::new(db.clone()).create(&NewEvent::new("Broken", "t")).unwrap();
        let cycles = PollCycleRepo::new(db.clone());
        let old = cycles
            .create_at(&event.id, &[], Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        cycles.complete(&old.id).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE poll_cycles SET frozen_source_ids = 'not json' WHERE id = ?1",
                [old.id.as_str()],
            )?;
            Ok(())
        })
        .unwrap();

        let (dispatcher, provider) = dispatcher_with(&db, answering());
        dispatcher.trigger(&event.id).unwrap();
        dispatcher.drain().await;
        assert_eq!(count_cycles(&db, &event.id, "failed"), 1);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_event_is_not_retried() {
        let db = Database::in_memory().unwrap();
        let event = EventRepo::new(db.clone()).create(&NewEvent::new("Gone", "t")).unwrap();
        let (dispatcher, provider) = dispatcher_with(&db, answering());
        dispatcher.trigger(&event.id).unwrap();
        db.with_conn(|conn| {
            conn.execute("DELETE FROM events WHERE id = ?1", [event.id.as_str()])?;
            Ok(())
        })
        .unwrap();

        let started = tokio::time::Instant::now();
        dispatcher.drain().await;
        assert!(started.elapsed() < DispatcherConfig::default().retry_base_delay);
        assert_eq!(provider.call_count(), 0);
        assert!(PollCycleRepo::new(db).list_for_event(&event.id, 10).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_ceiling_holds() {
        let db = Database::in_memory().unwrap();
        let events = EventRepo::new(db.clone());
        let ids: Vec<EventId> = ["A", "B", "C"]
            .into_iter()
            .map(|t| events.create(&NewEvent::new(t, "t")).unwrap().id)
            .collect();
        let (dispatcher, provider) = dispatcher_with(&db, slow(30));
        assert_eq!(dispatcher.worker.config.max_concurrent, 2);

        assert_eq!(dispatcher.tick(Utc::now()).unwrap().dispatched, 3);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let running: usize = ids.iter().map(|id| count_cycles(&db, id, "running")).sum();
        assert_eq!(running, 2);
        assert_eq!(provider.call_count(), 2);

        dispatcher.drain().await;
        for id in &ids {
            assert_eq!(count_cycles(&db, id, "completed"), 1);
        }
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn synthesize_maps_missing_event() {
        let db = Database::in_memory().unwrap();
        let event = EventRepo::new(db.clone()).create(&NewEvent::new("Ask", "t")).unwrap();
        let (dispatcher, _) = dispatcher_with(&db, answering());
        let synthesis = dispatcher.synthesize(&event.id, None, None).await.unwrap();
        assert_eq!(synthesis.synthesized_text, "Steady.");
        assert!(matches!(
            dispatcher.synthesize(&EventId::new(), None, None).await,
            Err(DispatchError::NotFound(_))
        ));
        assert!(PollCycleRepo::new(db).list_for_event(&event.id, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn trigger_unknown_event() {
        let db = Database::in_memory().unwrap();
        let (dispatcher, _) = dispatcher_with(&db, answering());
        let missing = EventId::new();
        assert!(matches!(dispatcher.trigger(&missing), Err(DispatchError::NotFound(_))));
        assert!(matches!(
            dispatcher.poll_inline(&missing).await,
            Err(DispatchError::NotFound(_))
        ));
        assert!(dispatcher.in_flight().is_empty());
    }

    #[tokio::test]
    async fn poll_inline_returns_report() {
        let db = Database::in_memory().unwrap();
        let event = EventRepo::new(db.clone()).create(&NewEvent::new("Direct", "t")).unwrap();
        let (dispatcher, _) = dispatcher_with(&db, answering());
        let report = dispatcher.poll_inline(&event.id).await.unwrap();
        assert_eq!(report.event_id, event.id);
        assert_eq!(report.fulfilled(), 1);
        assert!(!dispatcher.is_in_flight(&event.id));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let db = Database::in_memory().unwrap();
        let event = EventRepo::new(db.clone()).create(&NewEvent::new("Late", "t")).unwrap();
        let (dispatcher, provider) = dispatcher_with(&db, answering());
        dispatcher.shutdown().await;
        assert!(matches!(dispatcher.tick(Utc::now()), Err(DispatchError::ShuttingDown)));
        assert!(matches!(dispatcher.trigger(&event.id), Err(DispatchError::ShuttingDown)));
        assert_eq!(provider.call_count(), 0);
    }
}
