//! # daisuke-daemon
//!
//! The Daisuke runner host daemon.
//!
//! This daemon is responsible for:
//! - Discovering and loading runners from the runners directories
//! - Backing runner value stores with the SQLite library database
//! - Periodic library update checks against every content source
//! - Recording the application log
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      daisuke-daemon                          │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │    Runner    │  │   Library    │  │   Library    │      │
//! │  │   Registry   │  │   Updater    │  │   Store      │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────┐    │
//! │  │                  Application Log                    │    │
//! │  └────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//!
//! The daemon reads configuration from `$XDG_CONFIG_HOME/daisuke/config.toml`.
//!
//! ## Running
//!
//! ```bash
//! # Start the daemon
//! cargo run --bin daisuke-daemon
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin daisuke-daemon
//! ```

use anyhow::Result;
use daisuke_bridge::{HostServices, LogSink, RunnerRegistry, TracingNotifier};
use daisuke_runtime::FixtureEngineFactory;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use daisuke_daemon::config::Config;
use daisuke_daemon::logger::{Logger, LoggerOptions};
use daisuke_daemon::store::SqliteStore;
use daisuke_daemon::updater::{LibraryUpdater, UpdateSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from config.toml
    let config_result = Config::load_default();
    let config = config_result.as_ref().cloned().unwrap_or_default();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting daisuke-daemon v{}", env!("CARGO_PKG_VERSION"));
    match &config_result {
        Ok(_) => info!("Loaded configuration from default path"),
        Err(e) => warn!("Failed to load config, using defaults: {:#}", e),
    }

    // Initialize library store (SQLite)
    let store_path = config.store_path()?;
    info!("Initializing library store at: {}", store_path.display());
    let store = Arc::new(SqliteStore::open_at(&store_path)?);

    // Application log
    let notifier = Arc::new(TracingNotifier);
    let log_sink: Arc<dyn LogSink> = Arc::new(Logger::new(
        config.log_path()?,
        LoggerOptions {
            developer_mode: config.daemon.developer_mode,
            log_address: config.daemon.log_address.clone(),
        },
        notifier.clone(),
    ));

    // Discover and load runners
    let services = HostServices::new(store.clone(), log_sink.clone(), notifier);
    let mut registry = RunnerRegistry::new(services, Arc::new(FixtureEngineFactory));
    let runner_dirs = config.runner_dirs();
    let discovered = if config.runners.skip_user_directory {
        registry.load_from_dirs(&runner_dirs)
    } else {
        registry.discover_and_load(&runner_dirs)
    };
    match discovered {
        Ok(count) => info!("Loaded {} runner(s)", count),
        Err(e) => warn!("Runner discovery: {}", e),
    }

    for runner in registry.list_runners() {
        info!(
            "Runner: {} v{} ({}) - source: {}, tracker: {}",
            runner.name, runner.version, runner.id, runner.is_source, runner.is_tracker
        );
    }

    let updater = LibraryUpdater::new(
        store,
        UpdateSettings::from(&config.updates),
        log_sink,
    );

    if let Err(e) = updater.handle_foreground_update(&registry).await {
        warn!("Initial library update failed: {:#}", e);
    }

    info!("Daemon startup complete");
    info!("Press Ctrl+C to stop");

    let period = config.update_interval()?;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = updater.handle_background_update(&registry).await {
                    warn!("Background library update failed: {:#}", e);
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    info!("Daemon stopped");
    Ok(())
}
