//! 🎬 *[the queue hands over a URL. the consumer takes it without a word.]*
//! *[it will not take another until this one is done.]*
//!
//! 🔁 The ConsumerWorker: one loop, one source at a time, until the queue
//! closes and drains. Several of these share one queue receiver, so each
//! accepted request lands in exactly one of them.

use std::sync::Arc;

use anyhow::Result;
use async_channel::Receiver;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{InFlight, IngestWorker, Worker};
use crate::common::SourceRef;
use crate::report::ProcessingEvent;

#[derive(Debug)]
pub(crate) struct ConsumerWorker {
    id: usize,
    rx: Receiver<SourceRef>,
    ingest: Arc<IngestWorker>,
    events: broadcast::Sender<ProcessingEvent>,
    in_flight: InFlight,
}

impl ConsumerWorker {
    pub(crate) fn new(
        id: usize,
        rx: Receiver<SourceRef>,
        ingest: Arc<IngestWorker>,
        events: broadcast::Sender<ProcessingEvent>,
        in_flight: InFlight,
    ) -> Self {
        Self {
            id,
            rx,
            ingest,
            events,
            in_flight,
        }
    }
}

impl Worker for ConsumerWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!(worker = self.id, "📥 ConsumerWorker started draining the refresh queue...");
            while let Ok(source) = self.rx.recv().await {
                info!(worker = self.id, source = %source, pending = self.rx.len(), "📤 refresh dequeued");
                // 📣 No subscribers is fine. Send only fails when nobody is listening.
                let _ = self.events.send(ProcessingEvent::Started(source.clone()));

                let report = {
                    let _in_flight = self.in_flight.enter(source.clone());
                    self.ingest.process(&source).await
                };

                let _ = self.events.send(ProcessingEvent::Finished(report));
            }
            debug!(worker = self.id, "🏁 ConsumerWorker: queue closed and drained. Shutting down.");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryRepository;
    use crate::decoder::RecordDecoder;
    use crate::merge_store::MergeStore;
    use crate::report::SourceOutcome;
    use crate::source_client::{HttpConfig, ManifestClient};
    use crate::supervisors::RefreshQueue;
    use crate::app_config::RuntimeConfig;

    #[tokio::test]
    async fn the_one_where_the_loop_reports_and_then_goes_home() {
        let client = ManifestClient::new(&HttpConfig {
            connect_timeout_secs: 1,
            ..HttpConfig::default()
        })
        .expect("💀 client should build");
        let ingest = IngestWorker::new(
            client,
            RecordDecoder::default(),
            Arc::new(MergeStore::new(Arc::new(InMemoryRepository::new()))),
            &RuntimeConfig::default(),
        );
        let queue = RefreshQueue::new(4);
        let (events, mut rx) = broadcast::channel(16);
        let in_flight = InFlight::default();

        // 🔌 Port 9 on localhost: nobody home, so the manifest fetch fails fast.
        queue.enqueue("http://127.0.0.1:9".into()).expect("💀 room for one");
        queue.close();
        let handle = ConsumerWorker::new(0, queue.receiver(), Arc::new(ingest), events, in_flight.clone()).start();

        handle
            .await
            .expect("💀 consumer should not panic")
            .expect("💀 consumer should exit cleanly");

        assert_eq!(rx.recv().await, Ok(ProcessingEvent::Started("http://127.0.0.1:9".into())));
        match rx.recv().await {
            Ok(ProcessingEvent::Finished(report)) => {
                assert!(matches!(report.outcome, SourceOutcome::Aborted { .. }));
            }
            other => panic!("💀 expected a Finished event, got {other:?}"),
        }
        assert!(in_flight.snapshot().is_empty());
    }
}
