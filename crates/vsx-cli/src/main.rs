//! 🚀 vsx-cli: the front door, the bouncer, the maitre d' of vsx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config,
//! sets up logging, and then lets the real code do the heavy lifting.
//! Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 💉 Refresh appointment-slot feeds from bulk-publish endpoints.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// 🔧 TOML config. Used if it exists; otherwise env vars (`VSX_*`) only.
    #[arg(default_value = "vsx.toml")]
    config: PathBuf,

    /// 🔂 One refresh cycle and exit, even if the config sets an interval.
    #[arg(long)]
    once: bool,
}

/// 🚀 main(): where it all begins. The "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the thing (send it and pray 🙏)
/// 5. Handle errors (cry)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle choice we're trying to move past
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_file = args.config.as_path();
    let config_file_if_it_exists = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't tell whether the configuration file exists. If it's a relative path, \
             check your cwd, or use an absolute path to be absolutely certain. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None, // 💤 Not there. Env vars it is.
    };

    let mut app_config = vsx::app_config::load_config(config_file_if_it_exists)
        .context("💀 In vsx-cli, main, we couldn't load the configuration. Take a look at the file and the VSX_* env vars.")?;
    if args.once {
        app_config.runtime.refresh_interval_secs = None;
    }

    // 🚀 SEND IT.
    let result = vsx::run(app_config).await;

    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like a publisher isn't reachable. \
                Double-check the `sources` URLs and that the feed is up: \
                `curl <source>/$bulk-publish` should answer with a manifest. ☕"
            );
        }

        // 🗑️ Exit with prejudice.
        std::process::exit(1);
    }

    Ok(())
}
