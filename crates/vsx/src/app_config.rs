//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! ```toml
//! sources = ["https://publisher.example/fhir"]
//! store = "InMemory"
//!
//! [runtime]
//! queue_capacity = 64
//! worker_count = 1
//! file_concurrency = 1
//! max_consecutive_storage_errors = 25
//! shutdown_grace_secs = 30
//! refresh_interval_secs = 900   # leave out for a single cycle
//!
//! [http]
//! connect_timeout_secs = 10
//! manifest_timeout_secs = 30
//! file_timeout_secs = 300
//!
//! [decoder]
//! max_line_bytes = 1048576
//! ```

use anyhow::{Context, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::backends::StoreConfig;
use crate::common::SourceRef;
use crate::decoder::DEFAULT_MAX_LINE_BYTES;
use crate::source_client::HttpConfig;

/// 📦 One struct to rule them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct AppConfig {
    /// 📡 The feeds every refresh cycle walks through, in this order.
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// 🧵 How many of everything, and how long to wait for it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// 📬 Pending refresh requests before `request_refresh` starts saying `Full`.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// 🧵 Consumer loops. Each one processes a whole source at a time.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// 📄 Files of one manifest downloaded at the same time.
    #[serde(default = "default_file_concurrency")]
    pub file_concurrency: usize,
    /// 🗄️ Transient storage failures in a row before we give up on a file.
    #[serde(default = "default_max_consecutive_storage_errors")]
    pub max_consecutive_storage_errors: u32,
    /// ⏳ How long shutdown waits for accepted work to drain before abandoning it.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// 🔄 Re-enqueue every source this often. `None` means one cycle and done.
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_worker_count() -> usize {
    1
}

fn default_file_concurrency() -> usize {
    1
}

// 🗄️ 25 strikes. Baseball is more forgiving about it, but not by much.
fn default_max_consecutive_storage_errors() -> u32 {
    25
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
            file_concurrency: default_file_concurrency(),
            max_consecutive_storage_errors: default_max_consecutive_storage_errors(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            refresh_interval_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DecoderConfig {
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl AppConfig {
    /// 🔒 Reject knobs that would deadlock or panic the runtime instead of
    /// letting them do it at 3am.
    pub fn validate(&self) -> anyhow::Result<()> {
        let runtime = &self.runtime;
        if runtime.queue_capacity == 0 {
            bail!("💀 runtime.queue_capacity is 0. A queue that holds nothing accepts nothing. Use at least 1.");
        }
        if runtime.worker_count == 0 {
            bail!("💀 runtime.worker_count is 0. Somebody has to do the work. Use at least 1.");
        }
        if runtime.file_concurrency == 0 {
            bail!("💀 runtime.file_concurrency is 0. Files do not download themselves. Use at least 1.");
        }
        if runtime.max_consecutive_storage_errors == 0 {
            bail!("💀 runtime.max_consecutive_storage_errors is 0. That abandons every file before its first record. Use at least 1.");
        }
        if runtime.refresh_interval_secs == Some(0) {
            bail!("💀 runtime.refresh_interval_secs is 0. That is not an interval, that is a denial of service. Leave it out for a single cycle.");
        }
        if self.sources.len() > runtime.queue_capacity {
            bail!(
                "💀 {} sources but runtime.queue_capacity is {}. A refresh cycle enqueues every source at once. Raise queue_capacity to at least {}.",
                self.sources.len(),
                runtime.queue_capacity,
                self.sources.len()
            );
        }
        if self.decoder.max_line_bytes == 0 {
            bail!("💀 decoder.max_line_bytes is 0. Every line would be too long.");
        }
        Ok(())
    }
}

/// 🚀 Load the config from env vars (`VSX_*`) and, if given, a TOML file.
///
/// 📐 DESIGN NOTE:
///   - `config_file_name` is None  → env vars only.
///   - `config_file_name` is Some  → env vars + TOML file, merged. TOML wins on conflicts.
///   - Nested keys use a double underscore: `VSX_RUNTIME__WORKER_COUNT=4`.
///
/// 💀 Errors if the result does not parse or does not validate.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("VSX_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (VSX_*). \
             The file exists in our hearts, but apparently not in a shape serde recognises.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (VSX_*). \
                 No file was provided, this one's all on the environment. Classic."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config.validate()?;
    Ok(app_config)
}
