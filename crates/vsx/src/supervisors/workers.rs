//! 🧵 Workers: the ones who actually do the work while the coordinator takes
//! all the credit in the sprint retro.
//!
//! - [`IngestWorker`]: one source, end to end. Manifest, files, records, merges.
//! - [`ConsumerWorker`]: the loop that pulls sources off the queue and hands
//!   them to the IngestWorker, one at a time, until the queue closes.
//!
//! ⚠️ "If you're reading this, the code review went poorly." 🦆

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::common::SourceRef;

mod consumer_worker;
mod ingest_worker;

pub(crate) use consumer_worker::ConsumerWorker;
pub use ingest_worker::IngestWorker;

/// 🏗️ A background worker, that does work. duh.
pub trait Worker {
    /// 🚀 Start the worker. Returns a JoinHandle because we trust but verify.
    fn start(self) -> JoinHandle<Result<()>>;
}

/// 🛫 The sources being processed right now, across every consumer loop.
///
/// A plain `std` mutex: the guard below releases its entry from `Drop`, and
/// `Drop` cannot await.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlight(Arc<Mutex<Vec<SourceRef>>>);

impl InFlight {
    pub(crate) fn enter(&self, source: SourceRef) -> InFlightGuard {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(source.clone());
        InFlightGuard {
            in_flight: self.clone(),
            source,
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<SourceRef> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// 🎫 Holds one entry in [`InFlight`]. Released on drop, panics included.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    in_flight: InFlight,
    source: SourceRef,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut sources = self
            .in_flight
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(position) = sources.iter().position(|source| *source == self.source) {
            sources.remove(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_a_source_checks_in_and_checks_out() {
        let in_flight = InFlight::default();

        let first = in_flight.enter("http://a".into());
        let second = in_flight.enter("http://a".into());
        assert_eq!(in_flight.snapshot().len(), 2, "the same source can be in flight twice");

        drop(first);
        assert_eq!(in_flight.snapshot(), vec![SourceRef::new("http://a")]);
        drop(second);
        assert!(in_flight.snapshot().is_empty());
    }
}
