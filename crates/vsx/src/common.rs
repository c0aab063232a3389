//! 📦 Common data structures, the building blocks of vsx.
//!
//! 🎬 COLD OPEN: INT. PUBLISHER ENDPOINT, 6:00 AM
//!
//! Somewhere, a pharmacy just opened four hundred appointment slots and told
//! exactly one JSON file about it. This module holds the small, load-bearing
//! types that carry that news from the publisher to the store: where the feed
//! lives ([`SourceRef`]), what the feed says it has ([`Manifest`]), and one line
//! of what it actually sent ([`RawRecord`]).
//!
//! 🦆

use std::fmt;

use serde::Deserialize;

/// 🏷️ The identifier system stamped on every entity we learn about from a
/// publisher. The value half is the publisher's own resource id.
pub const ORIGINAL_ID_SYSTEM: &str = "http://usds.gov/vaccine/source-identifier";

/// 📡 The base address of one publishing feed.
///
/// Opaque and immutable. It is what gets enqueued, what gets logged, and what
/// the manifest and data paths are hung off of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(String);

impl SourceRef {
    pub fn new(base: impl Into<String>) -> Self {
        Self(base.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 🔧 Base address without trailing slashes, so `format!("{base}/x")` never
    /// produces `//x`. One slash of difference, infinite suffering of difference.
    pub fn base(&self) -> &str {
        self.0.trim_end_matches('/')
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// 📜 The `$bulk-publish` response. Fetched, consumed, forgotten.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub transaction_time: Option<String>,
    #[serde(default)]
    pub request: Option<String>,
    /// 📦 The files to download, in publisher order.
    pub output: Vec<OutputEntry>,
    #[serde(default)]
    pub error: Vec<OutputEntry>,
}

/// 📄 One downloadable file in a manifest.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OutputEntry {
    /// 🏷️ Resource type the publisher claims lives in this file. Advisory only,
    /// the decoder trusts each line's own `resourceType`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub url: String,
}

/// 🔑 A (system, value) pair recognising the same logical entity across
/// repeated ingestions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalId {
    pub system: String,
    pub value: String,
}

impl ExternalId {
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            value: value.into(),
        }
    }

    /// 🏷️ Identity minted from a publisher-side resource id.
    pub fn original(value: impl Into<String>) -> Self {
        Self::new(ORIGINAL_ID_SYSTEM, value)
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.system, self.value)
    }
}

/// 🎭 The discriminator of a decoded record, read from `resourceType`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Location,
    Schedule,
    Slot,
    /// Anything else the publisher felt like sending. We nod politely.
    Other(String),
}

impl RecordKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Location => "Location",
            Self::Schedule => "Schedule",
            Self::Slot => "Slot",
            Self::Other(kind) => kind,
        }
    }
}

impl From<&str> for RecordKind {
    fn from(value: &str) -> Self {
        match value {
            "Location" => Self::Location,
            "Schedule" => Self::Schedule,
            "Slot" => Self::Slot,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 🎯 One decoded line: a kind, the JSON body, and the line it came from.
///
/// Lives only between the decoder and the merge. Nobody persists a RawRecord.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub kind: RecordKind,
    /// 📏 1-based line number inside the file, for log lines you can grep.
    pub line: usize,
    pub body: serde_json::Value,
}

impl RawRecord {
    /// 🏷️ The publisher's `id` for this resource, if it bothered to send one.
    pub fn resource_id(&self) -> Option<&str> {
        self.body
            .get("id")
            .and_then(serde_json::Value::as_str)
            .filter(|id| !id.trim().is_empty())
    }
}
