//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where publishers post four hundred slots at 6am..."
//! 🎬 "One coordinator dared to refresh them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The PipelineCoordinator: owns the [`RefreshQueue`], starts the consumer
//! loops once, broadcasts what they are doing, and tears it all down.
//!
//! ```text
//!   request_refresh ──▶ RefreshQueue ──▶ ConsumerWorker × worker_count ──▶ IngestWorker::process
//!                                              │
//!                                              └──▶ broadcast: Started / Finished
//! ```
//!
//! 🔒 Shutdown drains: the queue stops accepting, everything already accepted
//! is still processed, and whatever is left after `shutdown_grace_secs` is
//! abandoned.
//!
//! ⚠️ The workers stay private. The coordinator is the only one who talks to them.

mod queue;
mod workers;

pub use queue::RefreshQueue;
pub use workers::IngestWorker;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinError};
use tracing::{error, info, warn};

use crate::app_config::RuntimeConfig;
use crate::common::SourceRef;
use crate::errors::{PipelineError, QueueError};
use crate::report::ProcessingEvent;
use workers::{ConsumerWorker, InFlight, Worker};

/// 📣 Events a slow subscriber may fall behind by before it starts seeing `Lagged`.
const EVENT_CAPACITY: usize = 1024;

type ConsumerExit = (usize, Result<anyhow::Result<()>, JoinError>);

/// 📦 Front door of the pipeline. Started once, shut down once.
pub struct PipelineCoordinator {
    queue: RefreshQueue,
    events: broadcast::Sender<ProcessingEvent>,
    in_flight: InFlight,
    consumers: FuturesUnordered<BoxFuture<'static, ConsumerExit>>,
    abort_handles: Vec<AbortHandle>,
    shutdown_grace: Duration,
}

impl std::fmt::Debug for PipelineCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 boxed futures don't do Debug. neither do we, before coffee.
        f.debug_struct("PipelineCoordinator")
            .field("queue", &self.queue)
            .field("consumers", &self.consumers.len())
            .field("shutdown_grace", &self.shutdown_grace)
            .finish()
    }
}

impl PipelineCoordinator {
    /// 🚀 Spawn `worker_count` consumer loops over a fresh queue.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(runtime: &RuntimeConfig, ingest: IngestWorker) -> Self {
        let queue = RefreshQueue::new(runtime.queue_capacity);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let in_flight = InFlight::default();
        let ingest = Arc::new(ingest);

        let consumers = FuturesUnordered::new();
        let mut abort_handles = Vec::new();
        for id in 0..runtime.worker_count.max(1) {
            let handle = ConsumerWorker::new(
                id,
                queue.receiver(),
                Arc::clone(&ingest),
                events.clone(),
                in_flight.clone(),
            )
            .start();
            abort_handles.push(handle.abort_handle());
            consumers.push(async move { (id, handle.await) }.boxed());
        }

        info!(
            workers = abort_handles.len(),
            queue_capacity = runtime.queue_capacity,
            "🧵 pipeline started"
        );
        Self {
            queue,
            events,
            in_flight,
            consumers,
            abort_handles,
            shutdown_grace: Duration::from_secs(runtime.shutdown_grace_secs),
        }
    }

    /// 📥 Ask for one source to be refreshed. Only queue errors come back here;
    /// everything downstream shows up in logs and [`ProcessingEvent`]s.
    pub fn request_refresh(&self, source: SourceRef) -> Result<(), QueueError> {
        self.queue.enqueue(source)
    }

    /// 📡 Enqueue every source in order. Stops at the first one the queue refuses.
    pub fn refresh_sources(&self, sources: &[SourceRef]) -> Result<(), QueueError> {
        for source in sources {
            self.request_refresh(source.clone())?;
        }
        Ok(())
    }

    /// 📣 Every dequeue and every finished source from here on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessingEvent> {
        self.events.subscribe()
    }

    /// 🛫 Sources some consumer is processing right now.
    pub fn in_flight(&self) -> Vec<SourceRef> {
        self.in_flight.snapshot()
    }

    /// 📬 Accepted but not yet picked up.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// 💀 Wait for a consumer loop to die abnormally.
    ///
    /// Clean exits are skipped. Returns `None` once every loop has exited
    /// cleanly, which only happens after the queue is closed. Cancel-safe.
    pub async fn next_failure(&mut self) -> Option<PipelineError> {
        while let Some((worker, exit)) = self.consumers.next().await {
            if let Some(fatal) = consumer_fatal(worker, exit) {
                error!(worker, error = %fatal, "💀 consumer loop died");
                return Some(fatal);
            }
        }
        None
    }

    /// 🛑 Stop accepting, drain what was accepted, then stop the loops.
    ///
    /// Waits up to `shutdown_grace_secs`; whatever is still running after that
    /// is aborted and abandoned. Returns the first consumer failure seen while
    /// draining.
    pub async fn shutdown(&mut self) -> Result<(), PipelineError> {
        self.queue.close();
        info!(pending = self.queue.pending(), in_flight = self.in_flight().len(), "🛑 shutting down, draining accepted work");

        let grace = self.shutdown_grace;
        // 📌 Lives outside the timeout so a failure seen before the deadline survives it.
        let mut first_failure = None;
        let drained = tokio::time::timeout(grace, async {
            while let Some(fatal) = self.next_failure().await {
                first_failure.get_or_insert(fatal);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_secs = grace.as_secs(),
                pending = self.queue.pending(),
                abandoned = ?self.in_flight(),
                "⏳ shutdown grace period over, abandoning remaining work"
            );
            for handle in &self.abort_handles {
                handle.abort();
            }
            // 🧹 Reap the aborted tasks. Cancellation is not a failure, a panic still is.
            while let Some((worker, exit)) = self.consumers.next().await {
                if let Some(fatal) = consumer_fatal(worker, exit) {
                    error!(worker, error = %fatal, "💀 consumer loop died");
                    first_failure.get_or_insert(fatal);
                }
            }
        }

        match first_failure {
            None => {
                info!("🏁 pipeline drained and stopped");
                Ok(())
            }
            Some(fatal) => Err(fatal),
        }
    }
}

fn consumer_fatal(worker: usize, exit: Result<anyhow::Result<()>, JoinError>) -> Option<PipelineError> {
    match exit {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(PipelineError::ConsumerFatal {
            worker,
            reason: format!("{error:#}"),
        }),
        Err(join_error) if join_error.is_cancelled() => None,
        Err(join_error) => Some(PipelineError::ConsumerFatal {
            worker,
            reason: panic_reason(join_error.into_panic()),
        }),
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{EntityRepository, InMemoryRepository};
    use crate::common::ExternalId;
    use crate::decoder::RecordDecoder;
    use crate::entities::ScheduleFields;
    use crate::merge_store::MergeStore;
    use crate::report::SourceOutcome;
    use crate::source_client::{HttpConfig, ManifestClient};
    use crate::test_support::FailingRepository;
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ingest_over(repository: Arc<dyn EntityRepository>) -> IngestWorker {
        let client = ManifestClient::new(&HttpConfig::default()).expect("💀 client should build");
        IngestWorker::new(
            client,
            RecordDecoder::default(),
            Arc::new(MergeStore::new(repository)),
            &RuntimeConfig::default(),
        )
    }

    /// 🏗️ Every `/{name}/$bulk-publish` answers with an empty manifest.
    async fn empty_publishers() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/[a-z]+/\$bulk-publish$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": []})))
            .mount(&server)
            .await;
        server
    }

    fn runtime(worker_count: usize) -> RuntimeConfig {
        RuntimeConfig {
            worker_count,
            shutdown_grace_secs: 5,
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test]
    async fn the_one_where_sources_start_in_the_order_they_were_asked_for() {
        let server = empty_publishers().await;
        let mut coordinator =
            PipelineCoordinator::start(&runtime(1), ingest_over(Arc::new(InMemoryRepository::new())));
        let mut events = coordinator.subscribe();
        let sources: Vec<SourceRef> = ["a", "b", "c"]
            .iter()
            .map(|name| SourceRef::new(format!("{}/{name}", server.uri())))
            .collect();

        coordinator.refresh_sources(&sources).expect("💀 room for three");

        let mut started = Vec::new();
        while started.len() < 3 {
            match events.recv().await.expect("💀 events should keep coming") {
                ProcessingEvent::Started(source) => started.push(source),
                ProcessingEvent::Finished(report) => assert!(report.is_completed()),
            }
        }
        assert_eq!(started, sources);
        coordinator.shutdown().await.expect("💀 clean shutdown");
    }

    #[tokio::test]
    async fn the_one_where_shutdown_drains_what_was_already_accepted() {
        let server = empty_publishers().await;
        let mut coordinator =
            PipelineCoordinator::start(&runtime(2), ingest_over(Arc::new(InMemoryRepository::new())));
        let mut events = coordinator.subscribe();
        for name in ["a", "b", "c"] {
            coordinator
                .request_refresh(SourceRef::new(format!("{}/{name}", server.uri())))
                .expect("💀 room");
        }

        coordinator.shutdown().await.expect("💀 clean shutdown");

        let mut finished = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ProcessingEvent::Finished(_)) {
                finished += 1;
            }
        }
        assert_eq!(finished, 3, "every accepted request was processed");
        assert!(coordinator.in_flight().is_empty());
    }

    #[tokio::test]
    async fn the_one_where_the_door_is_closed_after_shutdown() {
        let mut coordinator =
            PipelineCoordinator::start(&runtime(1), ingest_over(Arc::new(InMemoryRepository::new())));
        coordinator.shutdown().await.expect("💀 clean shutdown");

        assert_eq!(
            coordinator.request_refresh("http://late.example".into()),
            Err(QueueError::Closed("http://late.example".into()))
        );
    }

    #[tokio::test]
    async fn the_one_where_a_full_queue_stops_the_roll_call() {
        let mut coordinator = PipelineCoordinator::start(
            &RuntimeConfig {
                queue_capacity: 1,
                ..runtime(1)
            },
            ingest_over(Arc::new(InMemoryRepository::new())),
        );
        // 🧊 Single-threaded test runtime: the consumer cannot dequeue anything
        // until this test awaits, so the second source already finds the queue full.
        let sources: Vec<SourceRef> = (0..50)
            .map(|n| SourceRef::new(format!("http://127.0.0.1:9/{n}")))
            .collect();

        let refused = coordinator.refresh_sources(&sources);

        assert!(matches!(refused, Err(QueueError::Full(_))));
        coordinator.shutdown().await.expect("💀 clean shutdown");
    }

    #[tokio::test]
    async fn the_one_where_a_dead_consumer_is_not_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/$bulk-publish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": [{"type": "Slot", "url": "/slots.ndjson"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/slots.ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                json!({"resourceType": "Slot", "id": "a", "schedule": {"reference": "Schedule/7"}}).to_string(),
            ))
            .mount(&server)
            .await;
        let repo = InMemoryRepository::new();
        repo.insert_schedule(ExternalId::original("7"), ScheduleFields::default())
            .await
            .expect("💀 seeding the parent should work");
        let mut coordinator =
            PipelineCoordinator::start(&runtime(1), ingest_over(Arc::new(FailingRepository::panicking(repo))));

        coordinator
            .request_refresh(SourceRef::new(server.uri()))
            .expect("💀 room for one");
        let failure = tokio::time::timeout(Duration::from_secs(10), coordinator.next_failure())
            .await
            .expect("💀 the consumer should have died by now");

        match failure {
            Some(PipelineError::ConsumerFatal { worker, reason }) => {
                assert_eq!(worker, 0);
                assert!(reason.contains("repository exploded"), "reason was: {reason}");
            }
            None => panic!("💀 the panic was swallowed"),
        }
    }

    async fn seeded_repository() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.insert_schedule(ExternalId::original("7"), ScheduleFields::default())
            .await
            .expect("💀 seeding the parent should work");
        repo
    }

    /// 🏗️ `/{name}/$bulk-publish` lists one file holding one Slot under Schedule/7.
    async fn mount_slot_publisher(server: &MockServer, name: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{name}/$bulk-publish")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": [{"type": "Slot", "url": "/slots.ndjson"}]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/{name}/data/slots.ndjson")))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                json!({"resourceType": "Slot", "id": name, "schedule": {"reference": "Schedule/7"}}).to_string(),
            ))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn the_one_where_a_broken_source_does_not_take_the_loop_with_it() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down/$bulk-publish"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_slot_publisher(&server, "up").await;
        let repo = seeded_repository().await;
        let mut coordinator = PipelineCoordinator::start(&runtime(1), ingest_over(Arc::new(repo.clone())));
        let mut events = coordinator.subscribe();

        coordinator
            .refresh_sources(&[
                SourceRef::new(format!("{}/down", server.uri())),
                SourceRef::new(format!("{}/up", server.uri())),
            ])
            .expect("💀 room for two");

        let mut finished = Vec::new();
        while finished.len() < 2 {
            if let ProcessingEvent::Finished(report) = events.recv().await.expect("💀 events should keep coming") {
                finished.push(report);
            }
        }
        assert!(matches!(finished[0].outcome, SourceOutcome::Aborted { .. }));
        assert_eq!(finished[1].outcome, SourceOutcome::Completed);
        assert_eq!(finished[1].records.inserted, 1);
        assert_eq!(repo.count_slots().await, Ok(1));
        coordinator.shutdown().await.expect("💀 the loop survived, so shutdown is clean");
    }

    #[tokio::test]
    async fn the_one_where_a_crash_during_drain_outlives_the_grace_period() {
        let server = MockServer::start().await;
        mount_slot_publisher(&server, "boom").await;
        Mock::given(method("GET"))
            .and(path("/slow/$bulk-publish"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"output": []}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;
        let repo = seeded_repository().await;
        let mut coordinator = PipelineCoordinator::start(
            &RuntimeConfig {
                shutdown_grace_secs: 2,
                ..runtime(2)
            },
            ingest_over(Arc::new(FailingRepository::panicking(repo))),
        );

        coordinator
            .refresh_sources(&[
                SourceRef::new(format!("{}/boom", server.uri())),
                SourceRef::new(format!("{}/slow", server.uri())),
            ])
            .expect("💀 room for two");
        let outcome = coordinator.shutdown().await;

        match outcome {
            Err(PipelineError::ConsumerFatal { reason, .. }) => {
                assert!(reason.contains("repository exploded"), "reason was: {reason}");
            }
            Ok(()) => panic!("💀 the crash was forgotten when the grace period ran out"),
        }
    }
}
