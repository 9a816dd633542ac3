//! wordgated - automated task-acceptance gate daemon.
//!
//! CLI entry point: loads configuration, sets up logging, and dispatches
//! to the daemon lifecycle or one of the direct inspection commands.

use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{error, info, warn};

use wordgate::cli::{CalendarCommand, CapacityCommand, Cli, Command, DaemonCommand};
use wordgate::config::Config;
use wordgate::daemon::DaemonManager;
use wordgate::{Calendar, CapacityStore, Event, EventBus};

fn setup_logging(level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("wordgate").join("logs");
    std::fs::create_dir_all(&log_dir).context("failed to create log directory")?;

    let default_level = level.unwrap_or("info");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref()).context("failed to set up logging")?;

    let config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;
    info!(concurrency = config.queue.concurrency, pool_size = config.pool.size, "wordgated starting");

    match cli.command {
        None | Some(Command::Daemon(DaemonCommand::Status { detailed: false })) => {
            print_status(&config, false);
            Ok(())
        }
        Some(Command::Daemon(DaemonCommand::Start { foreground })) => run_daemon_start(&config, foreground),
        Some(Command::Daemon(DaemonCommand::Stop)) => {
            DaemonManager::new().stop().context("failed to stop daemon")
        }
        Some(Command::Daemon(DaemonCommand::Status { detailed })) => {
            print_status(&config, detailed);
            Ok(())
        }
        Some(Command::Calendar { command: CalendarCommand::Check { date } }) => run_calendar_check(&config, &date),
        Some(Command::Capacity { command: CapacityCommand::Show }) => run_capacity_show(&config),
        Some(Command::Capacity { command: CapacityCommand::Adjust { date, delta } }) => {
            run_capacity_adjust(&config, &date, delta)
        }
        Some(Command::RunDaemon) => run_daemon_foreground(&config),
    }
}

fn print_status(_config: &Config, detailed: bool) {
    let manager = DaemonManager::new();
    let status = manager.status();
    println!("wordgated v{}", env!("CARGO_PKG_VERSION"));
    if status.running {
        println!("  status: running (pid {})", status.pid.unwrap());
    } else {
        println!("  status: not running");
    }
    if detailed {
        println!("  pid file: {}", status.pid_file.display());
    }
}

fn run_daemon_start(_config: &Config, foreground: bool) -> Result<()> {
    let manager = DaemonManager::new();
    if foreground {
        warn!("--foreground runs the daemon loop inline; this blocks the current terminal");
        return run_daemon_foreground(_config);
    }
    let pid = manager.start().context("failed to start daemon")?;
    println!("wordgated started (pid {pid})");
    Ok(())
}

fn run_calendar_check(config: &Config, date: &str) -> Result<()> {
    let holidays_path = config.storage.dir.join("holidays.json");
    let calendar = Calendar::open(holidays_path).context("failed to open calendar")?;
    let parsed = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").context("invalid date, expected YYYY-MM-DD")?;
    println!("{date}: business day = {}", calendar.is_business_day(parsed));
    if let Some(name) = calendar.holiday_name(parsed) {
        println!("  holiday: {name}");
    }
    Ok(())
}

fn run_capacity_show(config: &Config) -> Result<()> {
    let store = CapacityStore::open(&config.storage.dir)
        .context("failed to open capacity store")?
        .with_default_cap(config.policy.default_cap);
    let capacity = store.snapshot_capacity().context("failed to read capacity map")?;
    let overrides = store.snapshot_overrides().context("failed to read overrides map")?;
    let mut dates: Vec<_> = capacity.keys().copied().collect();
    dates.sort();
    for date in dates {
        let used = capacity.get(&date).copied().unwrap_or(0);
        let cap = overrides.get(&date).copied().unwrap_or(config.policy.default_cap);
        println!("{date}: {used}/{cap}");
    }
    Ok(())
}

fn run_capacity_adjust(config: &Config, date: &str, delta: i64) -> Result<()> {
    let store = CapacityStore::open(&config.storage.dir)
        .context("failed to open capacity store")?
        .with_default_cap(config.policy.default_cap);
    let parsed = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").context("invalid date, expected YYYY-MM-DD")?;
    let summary = store.adjust(parsed, delta).context("failed to adjust capacity")?;
    println!("{date}: {:?} -> {:?}", summary.before.get(&parsed), summary.after.get(&parsed));
    Ok(())
}

/// Runs the daemon loop in the current process. Wires every component that
/// does not depend on a concrete browser-automation driver (calendar,
/// capacity, state, events, metrics, journal); the browser pool and
/// coordinator need a real [`wordgate::pool::SessionFactory`], which spec.md
/// Non-goals exclude from this crate, so this entry point stops short of
/// submitting task offers and instead just keeps the process alive,
/// handling signals, until one is provided by the embedding application.
fn run_daemon_foreground(config: &Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async_main(config.clone()))
}

async fn async_main(config: Config) -> Result<()> {
    let manager = DaemonManager::new();
    manager.register_self().context("failed to register daemon pid")?;

    std::fs::create_dir_all(&config.storage.dir).context("failed to create storage directory")?;
    let events = wordgate::create_event_bus();
    spawn_login_expired_watchdog(events.clone());
    let state = wordgate::StateManager::spawn(config.storage.dir.join("state.json"), events.clone());
    let _capacity = wordgate::CapacityStore::open(&config.storage.dir)
        .context("failed to open capacity store")?
        .with_default_cap(config.policy.default_cap);
    let _calendar = Calendar::open(config.storage.dir.join("holidays.json")).context("failed to open calendar")?;
    let _metrics = std::sync::Arc::new(wordgate::MetricsCollector::new());

    state.set_system_status(wordgate::state::SystemStatus::Ready).await.ok();
    info!("wordgated ready, awaiting shutdown signal");

    wait_for_shutdown_signal().await;

    info!("shutdown signal received, draining");
    state.set_system_status(wordgate::state::SystemStatus::ShuttingDown).await.ok();
    state.save_to_file().await.ok();
    state.shutdown().await;
    info!("wordgated exiting cleanly");
    Ok(())
}

/// `LoginExpired` bypasses the coordinator's usual error classification
/// entirely and terminates the process (spec §4.I/§5/§7): a dashboard
/// reconnect or retry cannot recover from an expired session, so the
/// process exits with code 12 for the surrounding supervisor to restart
/// once credentials are refreshed.
fn spawn_login_expired_watchdog(events: std::sync::Arc<EventBus>) {
    tokio::spawn(async move {
        let mut rx = events.subscribe();
        loop {
            match rx.recv().await {
                Ok(Event::LoginExpired) => {
                    error!("login expired, exiting with code 12");
                    std::process::exit(12);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
