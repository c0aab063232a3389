//! 🚚 IngestWorker: one source, front door to back shelf.
//!
//! 🎬 *[the manifest lists three files. one is fine. one has a typo on line
//! 4,012. one 404s. the worker shrugs, logs all three, and files a report.]*
//!
//! ```text
//!   process(source)
//!     ├─ fetch manifest ── failed? → SourceReport { Aborted }
//!     └─ for each output file (up to file_concurrency at once)
//!          fetch ─▶ decode ─▶ per record: merge
//!            DecodeError            → count, log, next line
//!            ParentMissing/Invalid  → count, log, next record
//!            Storage (transient)    → count, log, next record; N in a row → abandon file
//!            StoreUnavailable       → stop the file, abort the source
//! ```
//!
//! 🧠 Knowledge graph:
//! - `process` never returns an error. Everything that goes wrong below it
//!   ends up in the [`SourceReport`] and the logs.
//! - Within one file, records are merged in decoder order, one at a time.
//!   Across files there is no ordering.
//! - Each source run is an `info_span!("refresh")`, each file a `file` span.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::app_config::RuntimeConfig;
use crate::common::{OutputEntry, RawRecord, RecordKind, SourceRef};
use crate::decoder::RecordDecoder;
use crate::entities::slot_parent_key;
use crate::errors::UpsertError;
use crate::merge_store::{MergeStore, UpsertAction};
use crate::report::{RecordTally, SourceOutcome, SourceReport};
use crate::source_client::{ManifestClient, file_url};

/// 🚚 Fetches, decodes and merges everything one source publishes.
#[derive(Debug, Clone)]
pub struct IngestWorker {
    client: ManifestClient,
    decoder: RecordDecoder,
    store: Arc<MergeStore>,
    file_concurrency: usize,
    max_consecutive_storage_errors: u32,
}

/// 📄 How one file ended.
#[derive(Debug)]
enum FileFailure {
    Fetch(String),
    StreamBroken(String),
    StorageErrorsExhausted(u32),
    StoreUnavailable(String),
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFailure::Fetch(reason) => write!(f, "fetch failed: {reason}"),
            FileFailure::StreamBroken(reason) => write!(f, "stream broke: {reason}"),
            FileFailure::StorageErrorsExhausted(count) => {
                write!(f, "abandoned after {count} storage errors in a row")
            }
            FileFailure::StoreUnavailable(reason) => write!(f, "store unavailable: {reason}"),
        }
    }
}

#[derive(Debug)]
struct FileOutcome {
    records: RecordTally,
    failure: Option<FileFailure>,
}

impl IngestWorker {
    pub fn new(
        client: ManifestClient,
        decoder: RecordDecoder,
        store: Arc<MergeStore>,
        runtime: &RuntimeConfig,
    ) -> Self {
        Self {
            client,
            decoder,
            store,
            file_concurrency: runtime.file_concurrency.max(1),
            max_consecutive_storage_errors: runtime.max_consecutive_storage_errors.max(1),
        }
    }

    /// 🚀 Refresh one source. Infallible by contract: failures become report lines.
    pub async fn process(&self, source: &SourceRef) -> SourceReport {
        let span = info_span!("refresh", source = %source);
        self.process_source(source).instrument(span).await
    }

    async fn process_source(&self, source: &SourceRef) -> SourceReport {
        let started = Instant::now();
        info!(source = %source, "🚀 refresh started");

        let manifest = match self.client.fetch_manifest(source).await {
            Ok(manifest) => manifest,
            Err(fetch_error) => {
                let reason = fetch_error.describe();
                error!(source = %source, error = %reason, "💀 manifest fetch failed, source aborted");
                return SourceReport::aborted(source.clone(), reason, started.elapsed());
            }
        };

        info!(
            source = %source,
            files = manifest.output.len(),
            transaction_time = ?manifest.transaction_time,
            "📜 manifest fetched"
        );
        if !manifest.error.is_empty() {
            warn!(source = %source, error_files = manifest.error.len(), "⚠️ publisher listed error files, ignoring them");
        }

        let mut report = SourceReport {
            source: source.clone(),
            files_total: manifest.output.len(),
            files_failed: 0,
            records: RecordTally::default(),
            outcome: SourceOutcome::Completed,
            elapsed: Duration::ZERO,
        };

        // 📦 Futures are built up front; a borrowing closure inside the stream
        // is not Send for every lifetime, and the consumer task must be.
        let pending_files: Vec<_> = manifest
            .output
            .iter()
            .map(|entry| self.process_file(source, entry))
            .collect();
        let mut files = stream::iter(pending_files).buffer_unordered(self.file_concurrency);

        while let Some(file) = files.next().await {
            report.records.absorb(&file.records);
            match file.failure {
                None => {}
                Some(FileFailure::StoreUnavailable(reason)) => {
                    report.files_failed += 1;
                    error!(source = %source, reason = %reason, "☠️ store unavailable, source aborted");
                    report.outcome = SourceOutcome::Aborted {
                        reason: format!("store unavailable: {reason}"),
                    };
                    // 🛑 Dropping the stream cancels the files still in flight.
                    break;
                }
                Some(failure) => {
                    report.files_failed += 1;
                    warn!(source = %source, failure = %failure, "📄 file counted as failed");
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            source = %source,
            inserted = report.records.inserted,
            merged = report.records.merged,
            rejected = report.records.rejected(),
            files_failed = report.files_failed,
            outcome = %report.outcome,
            "🏁 refresh finished"
        );
        report
    }

    async fn process_file(&self, source: &SourceRef, entry: &OutputEntry) -> FileOutcome {
        let url = file_url(source, entry);
        let span = info_span!("file", url = %url, kind = ?entry.kind);
        self.ingest_file(source, entry).instrument(span).await
    }

    async fn ingest_file(&self, source: &SourceRef, entry: &OutputEntry) -> FileOutcome {
        let mut records = RecordTally::default();

        let body = match self.client.fetch_file(source, entry).await {
            Ok(body) => body,
            Err(fetch_error) => {
                let reason = fetch_error.describe();
                error!(source = %source, error = %reason, "💀 file fetch failed, skipping file");
                return FileOutcome {
                    records,
                    failure: Some(FileFailure::Fetch(reason)),
                };
            }
        };

        let mut decoded = pin!(self.decoder.decode(body));
        let mut consecutive_storage_errors = 0u32;

        while let Some(item) = decoded.next().await {
            let record = match item {
                Ok(record) => record,
                Err(decode_error) => {
                    records.decode_errors += 1;
                    warn!(source = %source, line = decode_error.line(), error = %decode_error, "🧩 line skipped");
                    if decode_error.is_terminal() {
                        error!(source = %source, error = %decode_error, "🔌 file stream broke, rest of file lost");
                        return FileOutcome {
                            records,
                            failure: Some(FileFailure::StreamBroken(decode_error.to_string())),
                        };
                    }
                    continue;
                }
            };

            let record_id = record.resource_id().unwrap_or("<no id>").to_string();
            match self.merge_record(&record).await {
                Ok(Some(UpsertAction::Inserted)) => {
                    consecutive_storage_errors = 0;
                    records.inserted += 1;
                }
                Ok(Some(UpsertAction::Merged)) => {
                    consecutive_storage_errors = 0;
                    records.merged += 1;
                }
                Ok(None) => {
                    records.skipped += 1;
                    debug!(source = %source, line = record.line, kind = %record.kind, "⏭️ kind not ingested");
                }
                Err(UpsertError::ParentMissing(parent)) => {
                    consecutive_storage_errors = 0;
                    records.parent_missing += 1;
                    warn!(source = %source, line = record.line, record_id = %record_id, parent = %parent, "🧷 parent schedule missing, slot rejected");
                }
                Err(UpsertError::Invalid(reason)) => {
                    records.invalid += 1;
                    warn!(source = %source, line = record.line, record_id = %record_id, reason = %reason, "🚫 record failed validation");
                }
                Err(UpsertError::Storage(reason)) => {
                    records.storage_errors += 1;
                    consecutive_storage_errors += 1;
                    error!(source = %source, line = record.line, record_id = %record_id, reason = %reason, "🗄️ storage error, record dropped");
                    if consecutive_storage_errors >= self.max_consecutive_storage_errors {
                        error!(source = %source, consecutive = consecutive_storage_errors, "🗑️ too many storage errors in a row, abandoning file");
                        return FileOutcome {
                            records,
                            failure: Some(FileFailure::StorageErrorsExhausted(consecutive_storage_errors)),
                        };
                    }
                }
                Err(UpsertError::StoreUnavailable(reason)) => {
                    records.storage_errors += 1;
                    error!(source = %source, line = record.line, record_id = %record_id, reason = %reason, "☠️ store unavailable");
                    return FileOutcome {
                        records,
                        failure: Some(FileFailure::StoreUnavailable(reason)),
                    };
                }
            }
        }

        info!(
            source = %source,
            persisted = records.persisted(),
            decode_errors = records.decode_errors,
            rejected = records.rejected(),
            "✅ file done"
        );
        FileOutcome {
            records,
            failure: None,
        }
    }

    /// 🔀 Route one record to the right upsert. `Ok(None)` means "not ours".
    async fn merge_record(&self, record: &RawRecord) -> Result<Option<UpsertAction>, UpsertError> {
        match record.kind {
            RecordKind::Slot => {
                let parent_key = slot_parent_key(record)?;
                let upserted = self.store.upsert(&parent_key, record).await?;
                Ok(Some(upserted.action))
            }
            RecordKind::Schedule => {
                let upserted = self.store.upsert_schedule(record).await?;
                Ok(Some(upserted.action))
            }
            RecordKind::Location | RecordKind::Other(_) => Ok(None),
        }
    }
}
