use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tally_watch::config::constants::REPORT_TIMEOUT_SECS;
use tally_watch::engine::{Monitor, MonitorDeps, NoPresence, SystemClock};
use tally_watch::network::{BrowserIdentity, ReqwestHttpClient};
use tally_watch::ops::{init_tracing, init_tracing_pretty, start_metrics_server, LoggingSink, RingLog};
use tally_watch::persistence::{JsonFileStore, KeyValueStore};
use tally_watch::{ConfigSource, FileConfigSource};

#[derive(Parser)]
#[command(name = "tally-watch")]
#[command(about = "Watches a page's unread counter and alerts on new activity")]
#[command(version)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "tally-watch.json")]
    config: PathBuf,

    /// Log level (RUST_LOG overrides)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Human readable logs instead of JSON
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the monitor until interrupted (default)
    Run,
    /// Probe once and print the classification; nothing is updated
    Probe,
    /// Fire a test-mode activity alert without touching the baseline
    Simulate,
    /// Send one status update to the collector
    PushStatus,
    /// Print the current monitor status
    Status,
    /// Print the persisted rolling log
    ShowLog {
        /// Only the newest N lines
        #[arg(short, long)]
        lines: Option<usize>,
    },
    /// Empty the persisted rolling log
    ClearLog,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let source = FileConfigSource::new(&args.config);
    let config = source.load_current()?;
    config.validate()?;

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&config.state_path)?);
    let ring_log = RingLog::new(config.log_capacity);
    ring_log.load(store.as_ref());

    if args.pretty {
        init_tracing_pretty(&args.log_level, &ring_log);
    } else {
        init_tracing(&args.log_level, &ring_log);
    }
    tracing::debug!(config = %args.config.display(), "Configuration loaded");

    let collector = ReqwestHttpClient::new(
        &BrowserIdentity::default(),
        Duration::from_secs(REPORT_TIMEOUT_SECS),
    )?;
    let deps = MonitorDeps {
        clock: Arc::new(SystemClock),
        store,
        collector: Arc::new(collector),
        sink: Arc::new(LoggingSink),
        presence: Arc::new(NoPresence),
        ring_log: ring_log.clone(),
        sandbox: None,
    };
    let monitor = Arc::new(Monitor::new(config, deps)?);

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(monitor, source).await?,
        Command::Probe => {
            if let Some(result) = monitor.test_discovery().await {
                println!("{}: {}", result.label(), result.describe());
            }
            monitor.checkpoint()?;
        }
        Command::Simulate => {
            let change = monitor.simulate_activity().await;
            println!("{:?}", change);
            monitor.checkpoint()?;
        }
        Command::PushStatus => {
            let outcome = monitor.push_status_now().await;
            monitor.checkpoint()?;
            println!("{:?}", outcome?);
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&monitor.status().await)?);
        }
        Command::ShowLog { lines } => {
            let lines = lines.unwrap_or(ring_log.capacity());
            for line in ring_log.recent(lines) {
                println!("{}", line);
            }
        }
        Command::ClearLog => {
            monitor.clear_log()?;
            println!("Log cleared");
        }
    }

    Ok(())
}

async fn run(monitor: Arc<Monitor>, source: FileConfigSource) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = match monitor.config().metrics_port {
        Some(port) => Some(start_metrics_server(port).await),
        None => None,
    };

    monitor.start().await;
    wait_for_shutdown(&monitor, &source).await;

    monitor.stop().await;
    if let Some(metrics) = metrics {
        metrics.shutdown();
    }
    // * Shutdown is the checkpoint for the rolling log
    monitor.checkpoint()?;
    tracing::info!("Tally-Watch stopped");
    Ok(())
}

#[cfg_attr(not(unix), allow(dead_code))]
async fn reload(monitor: &Monitor, source: &FileConfigSource) {
    match source.load_current() {
        Ok(config) => {
            if let Err(e) = monitor.apply_and_restart(config).await {
                tracing::error!(error = %e, "Reloaded configuration rejected, keeping the current one");
            }
        }
        Err(e) => tracing::error!(error = %e, path = %source.path().display(), "Configuration reload failed"),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(monitor: &Monitor, source: &FileConfigSource) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP handler unavailable, reload disabled");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, reloading configuration");
                reload(monitor, source).await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_monitor: &Monitor, _source: &FileConfigSource) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown requested");
}
