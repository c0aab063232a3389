//! # 📡 THE PUBLISHER CLIENT
//!
//! 🎬 COLD OPEN: INT. SOMEONE ELSE'S SERVER, 6:01 AM
//!
//! The manifest endpoint answers. It lists three files. The second one is
//! 400 MB. The third one 404s. Nobody is surprised, least of all us.
//!
//! [`ManifestClient`] speaks the two requests a publisher understands:
//!
//! ```text
//!   GET {base}/$bulk-publish     → Manifest { output: [ { type, url } ] }
//!   GET {base}/data{url}         → NDJSON byte stream (or the url itself, if absolute)
//! ```
//!
//! Every request carries its own timeout. There is no retry here. A failed
//! fetch becomes a [`FetchError`] and the caller decides what that costs.
//!
//! 🦆 (the duck refuses to follow redirects. reqwest does it anyway.)

use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;
use tracing::debug;

use crate::common::{Manifest, OutputEntry, SourceRef};
use crate::errors::{FetchCause, FetchError};

/// 🌊 A file body, chunk by chunk, as the network delivers it.
pub type FileBody = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// 📡 HTTP knobs. Timeouts are per request, not per source.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// ⏱️ Budget for the whole manifest request, body included.
    #[serde(default = "default_manifest_timeout_secs")]
    pub manifest_timeout_secs: u64,
    /// ⏱️ Budget for one data file, from first byte to last. Files are big.
    #[serde(default = "default_file_timeout_secs")]
    pub file_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

// 🔌 10 seconds to shake hands. If the publisher can't manage that, it's not having a good day.
fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_manifest_timeout_secs() -> u64 {
    30
}

// 📦 Five minutes per file. A county's worth of slots is not a small JSON.
fn default_file_timeout_secs() -> u64 {
    300
}

fn default_user_agent() -> String {
    format!("vsx/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            manifest_timeout_secs: default_manifest_timeout_secs(),
            file_timeout_secs: default_file_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// 📡 Fetches manifests and data files from publishers.
///
/// Cheap to clone: the inner `reqwest::Client` is an `Arc` around a
/// connection pool, shared across every source and file.
#[derive(Debug, Clone)]
pub struct ManifestClient {
    client: reqwest::Client,
    manifest_timeout: Duration,
    file_timeout: Duration,
}

impl ManifestClient {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS backend that could not find its certificates. We cannot talk to any publisher without it.")?;

        Ok(Self {
            client,
            manifest_timeout: Duration::from_secs(config.manifest_timeout_secs),
            file_timeout: Duration::from_secs(config.file_timeout_secs),
        })
    }

    /// 📜 One GET to `{base}/$bulk-publish`. Non-2xx is a failure, not a manifest.
    pub async fn fetch_manifest(&self, source: &SourceRef) -> Result<Manifest, FetchError> {
        let url = manifest_url(source);
        debug!(source = %source, url = %url, "📡 fetching manifest");

        let response = self
            .client
            .get(&url)
            .timeout(self.manifest_timeout)
            .send()
            .await
            .map_err(|error| {
                FetchError::new(source, FetchCause::Transport { url: url.clone(), error })
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(source, FetchCause::Status { url, status }));
        }

        response
            .json::<Manifest>()
            .await
            .map_err(|error| FetchError::new(source, FetchCause::Body { url, error }))
    }

    /// 🌊 Open one data file as a byte stream. Nothing is buffered here: the
    /// body arrives as the consumer polls it.
    pub async fn fetch_file(
        &self,
        source: &SourceRef,
        entry: &OutputEntry,
    ) -> Result<FileBody, FetchError> {
        let url = file_url(source, entry);
        debug!(source = %source, url = %url, kind = ?entry.kind, "📡 opening data file");

        let response = self
            .client
            .get(&url)
            .timeout(self.file_timeout)
            .send()
            .await
            .map_err(|error| {
                FetchError::new(source, FetchCause::Transport { url: url.clone(), error })
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(source, FetchCause::Status { url, status }));
        }

        Ok(response.bytes_stream().boxed())
    }
}

pub fn manifest_url(source: &SourceRef) -> String {
    format!("{}/$bulk-publish", source.base())
}

/// 🔗 Where a manifest entry's bytes actually live.
///
/// Absolute urls are taken as-is. Anything else hangs off `{base}/data`.
pub fn file_url(source: &SourceRef, entry: &OutputEntry) -> String {
    let url = entry.url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    if url.starts_with('/') {
        format!("{}/data{}", source.base(), url)
    } else {
        format!("{}/data/{}", source.base(), url)
    }
}
