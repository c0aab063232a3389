//! 💉 vsx: pulls appointment-slot feeds off bulk-publish endpoints and merges
//! them into one store, one source at a time, without ever double-booking.
//!
//! 🎬 *[a publisher posts a manifest. vsx reads it. a pharmacy's 4pm slot is
//! now findable. nobody claps. that's fine.]*
//!
//! ```text
//!   run ─▶ PipelineCoordinator::refresh_sources
//!            └─▶ RefreshQueue ─▶ IngestWorker ─▶ ManifestClient ─▶ RecordDecoder ─▶ MergeStore
//! ```

pub mod app_config;
pub mod backends;
pub mod common;
pub mod decoder;
pub mod entities;
pub mod errors;
pub mod merge_store;
mod progress;
pub mod report;
pub mod source_client;
pub mod supervisors;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::app_config::AppConfig;
use crate::backends::StoreBackend;
use crate::decoder::RecordDecoder;
use crate::merge_store::MergeStore;
use crate::progress::{RefreshProgress, summary_table};
use crate::report::{ProcessingEvent, SourceReport};
use crate::source_client::ManifestClient;
use crate::supervisors::{IngestWorker, PipelineCoordinator};

/// 🚀 Wire everything up and refresh the configured sources.
///
/// Without `runtime.refresh_interval_secs` this is one cycle and out. With it,
/// every source is re-enqueued on each tick until Ctrl-C. Either way the
/// pipeline is drained before returning.
pub async fn run(app_config: AppConfig) -> Result<()> {
    app_config.validate()?;

    let store = Arc::new(MergeStore::new(Arc::new(StoreBackend::from_config(
        &app_config.store,
    ))));
    let client = ManifestClient::new(&app_config.http)
        .context("💀 Failed to build the HTTP client for the publishers")?;
    let decoder = RecordDecoder::new(app_config.decoder.max_line_bytes);
    let ingest = IngestWorker::new(client, decoder, Arc::clone(&store), &app_config.runtime);
    let mut coordinator = PipelineCoordinator::start(&app_config.runtime, ingest);

    let refreshed = if app_config.sources.is_empty() {
        warn!("🤷 no sources configured, nothing to refresh");
        Ok(())
    } else {
        match app_config.runtime.refresh_interval_secs {
            None => refresh_cycle(&mut coordinator, &app_config)
                .await
                .map(|reports| info!("🧾 refresh cycle summary\n{}", summary_table(&reports))),
            Some(interval_secs) => {
                refresh_forever(&mut coordinator, &app_config, Duration::from_secs(interval_secs)).await
            }
        }
    };

    // 🛑 Drain even when the cycle failed; the refresh error wins over the shutdown one.
    let stopped = coordinator
        .shutdown()
        .await
        .context("💀 A consumer loop died while the pipeline was draining");
    refreshed?;
    stopped?;

    let repository = store.repository();
    let schedules = repository
        .count_schedules()
        .await
        .context("💀 Failed to count schedules after the pipeline stopped")?;
    let slots = repository
        .count_slots()
        .await
        .context("💀 Failed to count slots after the pipeline stopped")?;
    info!(schedules, slots, "🗄️ store totals");
    Ok(())
}

/// 🔄 Enqueue every source once and wait for all of their reports.
async fn refresh_cycle(
    coordinator: &mut PipelineCoordinator,
    app_config: &AppConfig,
) -> Result<Vec<SourceReport>> {
    let sources = &app_config.sources;
    let mut events = coordinator.subscribe();
    coordinator.refresh_sources(sources).with_context(|| {
        format!(
            "💀 Could not enqueue all {} sources. runtime.queue_capacity is {}; raise it to at least the number of sources.",
            sources.len(),
            app_config.runtime.queue_capacity
        )
    })?;

    let mut progress = RefreshProgress::new(sources.len() as u64);
    let mut reports = Vec::with_capacity(sources.len());
    while reports.len() < sources.len() {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ProcessingEvent::Finished(report)) => {
                    progress.record(&report);
                    reports.push(report);
                }
                Ok(ProcessingEvent::Started(_)) => {}
                Err(RecvError::Lagged(missed)) => {
                    bail!("💀 Fell {missed} events behind the pipeline. The reports for this cycle are incomplete.")
                }
                Err(RecvError::Closed) => bail!("💀 The pipeline stopped broadcasting before the cycle finished."),
            },
            Some(fatal) = coordinator.next_failure() => {
                return Err(fatal).context("💀 A consumer loop died mid-cycle");
            }
        }
    }
    progress.finish();

    let totals = progress.totals();
    info!(
        sources = reports.len(),
        inserted = totals.inserted,
        merged = totals.merged,
        rejected = totals.rejected(),
        "✅ refresh cycle done"
    );
    Ok(reports)
}

/// ⏰ Re-enqueue every source each `interval` until Ctrl-C.
async fn refresh_forever(
    coordinator: &mut PipelineCoordinator,
    app_config: &AppConfig,
    interval: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // 🚧 Leftovers mean the last cycle is still queued. Skip the whole tick, don't pile on.
                let pending = coordinator.pending();
                if pending > 0 {
                    warn!(pending, "⏭️ previous cycle still queued, skipping this tick");
                } else {
                    coordinator
                        .refresh_sources(&app_config.sources)
                        .context("💀 The refresh queue refused a source on an empty queue")?;
                }
            }
            Some(fatal) = coordinator.next_failure() => {
                return Err(fatal).context("💀 A consumer loop died, refusing to keep scheduling refreshes");
            }
            signal = &mut ctrl_c => {
                signal.context("💀 Failed to listen for Ctrl-C")?;
                info!("🛑 Ctrl-C received, draining and shutting down");
                return Ok(());
            }
        }
    }
}
