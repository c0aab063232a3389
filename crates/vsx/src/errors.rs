//! 💀 The error taxonomy. Every way this pipeline can disappoint you, sorted by
//! how far the disappointment is allowed to travel.
//!
//! | error            | blast radius | who hears about it            |
//! |------------------|--------------|-------------------------------|
//! | `QueueError`     | the caller   | whoever called `request_refresh` |
//! | `FetchError`     | one source or one file | logs + `SourceReport` |
//! | `DecodeError`    | one line     | logs + `SourceReport`         |
//! | `UpsertError`    | one record (unless the store is gone) | logs + `SourceReport` |
//! | `PipelineError`  | the process  | `run()` and the CLI exit code |

use thiserror::Error;

use crate::common::{ExternalId, SourceRef};

/// 📬 Why a refresh request bounced off the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// 🚧 The queue is at capacity. Try again later, nothing was dropped.
    #[error("refresh queue is full, rejected source {0}")]
    Full(SourceRef),
    /// 🔒 Shutdown has begun and the queue no longer takes requests.
    #[error("refresh queue is closed, rejected source {0}")]
    Closed(SourceRef),
}

/// 📡 A manifest or file fetch that never produced usable bytes.
#[derive(Debug, Error)]
#[error("fetch from source {source_ref} failed")]
pub struct FetchError {
    pub source_ref: SourceRef,
    #[source]
    pub cause: FetchCause,
}

#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        error: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("manifest at {url} could not be parsed")]
    Body {
        url: String,
        #[source]
        error: reqwest::Error,
    },
}

impl FetchError {
    pub(crate) fn new(source: &SourceRef, cause: FetchCause) -> Self {
        Self {
            source_ref: source.clone(),
            cause,
        }
    }

    /// 🧅 The whole cause chain on one line, `outer: inner: innermost`.
    ///
    /// `Display` stops at this error; reports and log lines want the full story.
    pub fn describe(&self) -> String {
        let mut message = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(inner) = cause {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            cause = inner.source();
        }
        message
    }
}

/// 🧩 One line that refused to become a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("line {line} is not valid JSON: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("line {line} has no resourceType")]
    MissingResourceType { line: usize },
    #[error("line {line} is longer than {max_line_bytes} bytes and was skipped")]
    LineTooLong { line: usize, max_line_bytes: usize },
    /// 🔌 The byte stream itself broke. Nothing after this point will arrive.
    #[error("byte stream failed after line {line}: {reason}")]
    Stream { line: usize, reason: String },
}

impl DecodeError {
    /// Terminal errors end the sequence, everything else is one bad line.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }

    pub fn line(&self) -> usize {
        match self {
            Self::Malformed { line, .. }
            | Self::MissingResourceType { line }
            | Self::LineTooLong { line, .. }
            | Self::Stream { line, .. } => *line,
        }
    }
}

/// 🗄️ What the persistence collaborator can say when it fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// 🔄 Worth trying again with the next record.
    #[error("transient storage failure: {0}")]
    Transient(String),
    /// ☠️ The store is gone. Trying again with the next record is just rude.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// 🧷 Why one record could not be merged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpsertError {
    #[error("parent {0} does not exist")]
    ParentMissing(ExternalId),
    #[error("record failed validation: {0}")]
    Invalid(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for UpsertError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Transient(reason) => Self::Storage(reason),
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
        }
    }
}

/// 🚨 Process-level failures. The only thing allowed to escape the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 💀 A consumer loop died. Nothing will be ingested until someone restarts us.
    #[error("consumer loop {worker} died: {reason}")]
    ConsumerFatal { worker: usize, reason: String },
}
