//! Sensor Monitor CLI
//!
//! Reports how long ago every registered sensor was last active.

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use sensor_monitor::{
    config::Config,
    health::{create_shared_stats_with_persistence, PersistedStats, SharedMonitorStats},
    roster::{decode_roster, partition, PartitionPlan},
    MemoryStore, MonitorSupervisor, Store, StoreConnection, VERSION,
};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sensor-monitor")]
#[command(version = VERSION)]
#[command(about = "Concurrent staleness monitor for registered sensors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring sensor activity
    Start {
        /// Redis connection URL (overrides the config file)
        #[arg(long)]
        redis_url: Option<String>,

        /// Upper bound on concurrent pollers
        #[arg(long)]
        max_workers: Option<usize>,

        /// Measurement period in seconds
        #[arg(long)]
        period: Option<f64>,

        /// Run against a JSON roster fixture instead of Redis
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Decode the roster and show the partition plan without polling
    Roster {
        /// Redis connection URL (overrides the config file)
        #[arg(long)]
        redis_url: Option<String>,

        /// Upper bound on concurrent pollers
        #[arg(long)]
        max_workers: Option<usize>,

        /// Read a JSON roster fixture instead of Redis
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Show cumulative statistics of previous runs
    Status,

    /// Show configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            redis_url,
            max_workers,
            period,
            snapshot,
        } => {
            let mut config = load_config(redis_url, max_workers)?;
            if let Some(secs) = period {
                config.measurement_period =
                    Duration::try_from_secs_f64(secs).context("invalid --period")?;
                config.validate()?;
            }
            cmd_start(config, snapshot)
        }
        Commands::Roster {
            redis_url,
            max_workers,
            snapshot,
        } => cmd_roster(load_config(redis_url, max_workers)?, snapshot),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sensor_monitor=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(redis_url: Option<String>, max_workers: Option<usize>) -> anyhow::Result<Config> {
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(url) = redis_url {
        config.redis_url = url;
    }
    if let Some(n) = max_workers {
        config.max_workers = n;
    }
    Ok(config)
}

fn cmd_start(config: Config, snapshot: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Sensor Monitor v{VERSION}");
    println!();

    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    let stats = create_shared_stats_with_persistence(config.stats_path());

    println!("Starting monitor...");
    println!("  Max workers: {}", config.max_workers);
    println!(
        "  Measurement period: {:.1}s",
        config.measurement_period.as_secs_f64()
    );
    match &snapshot {
        Some(path) => println!("  Store: in-memory snapshot {path:?}"),
        None => println!("  Store: {}", config.redis_url),
    }
    println!();
    println!("Press Ctrl+C to stop.");
    println!();

    match snapshot {
        Some(path) => {
            let store = MemoryStore::load_fixture(&path, &config.keys)
                .with_context(|| format!("failed to load snapshot {path:?}"))?;
            run_monitor(store, &config, stats)
        }
        None => run_monitor(open_redis(&config)?, &config, stats),
    }
}

fn run_monitor<S: Store>(
    store: S,
    config: &Config,
    stats: SharedMonitorStats,
) -> anyhow::Result<()> {
    let mut supervisor =
        MonitorSupervisor::with_stats(store, config.supervisor_config(), stats.clone());

    let signal = supervisor.termination_signal();
    let handler_signal = signal.clone();
    ctrlc::set_handler(move || {
        handler_signal.raise();
    })
    .context("Error setting Ctrl+C handler")?;

    // Print reports as they arrive
    let reports = supervisor.reports().clone();
    let printer_signal = signal.clone();
    let printer = thread::Builder::new()
        .name("report-printer".to_string())
        .spawn(move || loop {
            match reports.recv_timeout(Duration::from_millis(200)) {
                Ok(report) => println!("{report}"),
                Err(RecvTimeoutError::Timeout) if !printer_signal.is_terminating() => {}
                Err(_) => break,
            }
        })
        .context("failed to spawn report printer")?;

    let result = supervisor.run();

    // Unblocks the printer if run() returned on an error
    signal.raise();
    if printer.join().is_err() {
        eprintln!("Warning: report printer panicked");
    }

    println!();
    println!("{}", stats.summary());
    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save stats: {e}");
    }

    result.context("monitor failed")
}

fn cmd_roster(config: Config, snapshot: Option<PathBuf>) -> anyhow::Result<()> {
    match snapshot {
        Some(path) => {
            let store = MemoryStore::load_fixture(&path, &config.keys)
                .with_context(|| format!("failed to load snapshot {path:?}"))?;
            print_roster(&store, &config)
        }
        None => print_roster(&open_redis(&config)?, &config),
    }
}

fn print_roster<S: Store>(store: &S, config: &Config) -> anyhow::Result<()> {
    let roster = store
        .connect()?
        .fetch_roster(&config.keys)
        .context("failed to read roster")?;
    let decoded = decode_roster(&roster.records, &roster.members, &roster.capabilities);
    let chunks = partition(&decoded.sensors, config.max_workers);
    let plan = PartitionPlan::of(&chunks);

    println!("Roster");
    println!("======");
    println!();
    println!("Registered sensors: {}", roster.members.len());
    println!("Monitored sensors: {}", plan.sensors);
    println!(
        "Pollers: {} (max {} sensors each)",
        plan.workers, plan.max_chunk
    );
    println!();

    for (worker, chunk) in chunks.iter().enumerate() {
        println!("  poller-{worker}: {}", chunk.sensor_ids().join(", "));
    }

    if !decoded.rejected.is_empty() {
        println!();
        println!("Malformed records:");
        for (sensor, err) in &decoded.rejected {
            println!("  {sensor}: {err}");
        }
    }
    if !decoded.unknown.is_empty() {
        println!();
        println!("Records for unregistered sensors: {}", decoded.unknown.join(", "));
    }
    if !decoded.unconfigured.is_empty() {
        println!();
        println!(
            "Registered sensors without a record: {}",
            decoded.unconfigured.join(", ")
        );
    }

    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Sensor Monitor Status");
    println!("=====================");
    println!();
    println!("Store: {}", config.redis_url);
    println!("Max workers: {}", config.max_workers);
    println!(
        "Measurement period: {:.1}s",
        config.measurement_period.as_secs_f64()
    );
    println!();

    let stats_path = config.stats_path();
    if !stats_path.exists() {
        println!("No previous run data found.");
        return Ok(());
    }

    let content = std::fs::read_to_string(&stats_path)
        .with_context(|| format!("failed to read {stats_path:?}"))?;
    let stats: PersistedStats =
        serde_json::from_str(&content).with_context(|| format!("failed to parse {stats_path:?}"))?;

    println!("Cumulative Statistics:");
    println!("  Reports emitted: {}", stats.reports);
    println!("  Sensors without activity: {}", stats.no_activity);
    println!("  Store failures: {}", stats.store_failures);
    println!("  Unknown sensor references: {}", stats.unknown_sensors);
    println!("  Malformed records: {}", stats.malformed_records);
    println!("  Roster change events: {}", stats.roster_events);
    println!("  Restarts: {}", stats.restarts);
    println!("  Last run: {} ({})", stats.last_run_id, stats.last_updated);

    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}

#[cfg(feature = "redis")]
fn open_redis(config: &Config) -> anyhow::Result<sensor_monitor::RedisStore> {
    sensor_monitor::RedisStore::open(&config.redis_url)
        .with_context(|| format!("failed to open {}", config.redis_url))
}

#[cfg(not(feature = "redis"))]
fn open_redis(config: &Config) -> anyhow::Result<MemoryStore> {
    anyhow::bail!(
        "cannot connect to {}: built without the `redis` feature, use --snapshot FILE",
        config.redis_url
    )
}
