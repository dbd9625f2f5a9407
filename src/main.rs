//! storagepulse - Disk usage monitor with history and duplicate detection.
//!
//! Usage:
//!   storagepulse serve                 Run the monitor (periodic + change-driven scans)
//!   storagepulse add PATH              Start monitoring a directory
//!   storagepulse remove ID             Stop monitoring a root
//!   storagepulse roots                 List monitored roots
//!   storagepulse scan [--root ID]      Run one scan cycle now
//!   storagepulse status                Show stored totals
//!   storagepulse history               Show usage history
//!   storagepulse types                 Show usage per file type
//!   storagepulse duplicates            Show duplicate candidates
//!   storagepulse reset --yes           Clear all monitoring data

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use tokio_util::sync::CancellationToken;

use storagepulse_core::{MonitorConfig, RootId, ScanScope};
use storagepulse_monitor::{CycleReport, StorageMonitor, StorageSummary};

#[derive(Parser)]
#[command(
    name = "storagepulse",
    version,
    about = "Disk usage monitor with history, duplicate detection and change-driven rescans",
    long_about = "storagepulse tracks how much space a set of directories use over time.\n\n\
                  Add directories with `storagepulse add PATH`, then run `storagepulse serve` \
                  to keep their figures fresh."
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor until interrupted
    Serve {
        /// Seconds between full scans (overrides the config file)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Start monitoring a directory
    Add {
        /// Directory to monitor
        path: PathBuf,

        /// Do not scan the directory right away
        #[arg(long)]
        no_scan: bool,
    },

    /// Stop monitoring a root
    Remove {
        /// Root identifier (see `roots`)
        id: String,
    },

    /// List monitored roots
    Roots,

    /// Run one scan cycle and wait for it
    Scan {
        /// Only scan this root
        #[arg(short, long)]
        root: Option<String>,
    },

    /// Show stored totals and the last completed scan
    ///
    /// Scan progress and health live in the `serve` process; this command
    /// reads only what the database records.
    Status,

    /// Show usage history
    History {
        /// Number of snapshots to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show usage per file type
    Types {
        /// Number of types to show
        #[arg(short = 'n', long, default_value = "20")]
        top: usize,
    },

    /// Show files sharing a name and size
    Duplicates {
        /// Maximum number of groups to show
        #[arg(short = 'n', long, default_value = "20")]
        top: usize,
    },

    /// Delete all roots, records, history and duplicate groups
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = MonitorConfig::load(cli.config.as_deref()).context("Invalid configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match cli.command {
        Command::Serve { interval } => {
            if let Some(interval) = interval {
                config.scan_interval_secs = interval;
            }
            config.validate().context("Invalid configuration")?;
            run_serve(config).await
        }
        Command::Add { path, no_scan } => {
            config.watch_enabled = false;
            config.scan_on_add = !no_scan;
            let monitor = open(config)?;
            run_add(&monitor, &path, cli.format).await
        }
        command => {
            config.watch_enabled = false;
            config.scan_on_add = false;
            let monitor = open(config)?;
            run_query(&monitor, command, cli.format).await
        }
    }
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("storagepulse={level},storagepulse_monitor={level}"))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn open(config: MonitorConfig) -> Result<StorageMonitor> {
    let path = config.database_path.clone();
    StorageMonitor::open(config)
        .with_context(|| format!("Failed to open database {}", path.display()))
}

async fn run_serve(config: MonitorConfig) -> Result<()> {
    let monitor = open(config)?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
        }
        shutdown.cancel();
    });

    monitor.run(cancel).await;
    monitor.wait_idle().await;
    Ok(())
}

async fn run_add(monitor: &StorageMonitor, path: &Path, format: OutputFormat) -> Result<()> {
    let id = monitor.add_root(path)?;
    monitor.wait_idle().await;

    let root = monitor
        .roots()?
        .into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| color_eyre::eyre::eyre!("root {id} vanished"))?;

    match format {
        OutputFormat::Text => {
            println!("Added {} ({})", root.path.display(), root.id);
            if root.is_scanned() {
                println!(
                    " {} in {} files",
                    format_size(root.size),
                    root.items
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&root)?),
    }
    Ok(())
}

async fn run_query(monitor: &StorageMonitor, command: Command, format: OutputFormat) -> Result<()> {
    match command {
        Command::Remove { id } => {
            monitor.remove_root(&RootId::new(id.clone()))?;
            if let OutputFormat::Text = format {
                println!("Removed {id}");
            }
        }
        Command::Roots => {
            let roots = monitor.roots()?;
            match format {
                OutputFormat::Text => {
                    if roots.is_empty() {
                        println!("No monitored folders.");
                    }
                    for root in &roots {
                        let last_scan = root
                            .last_scan
                            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_else(|| "never".to_string());
                        println!(
                            "{}  {:>10}  {:>8} files  {}  (last scan: {})",
                            root.id,
                            format_size(root.size),
                            root.items,
                            root.path.display(),
                            last_scan
                        );
                    }
                    let summary = monitor.storage_summary()?;
                    if summary.root_count > 0 {
                        println!();
                        println!(
                            "Total: {} in {} files across {} folders",
                            format_size(summary.total_bytes),
                            summary.total_items,
                            summary.root_count
                        );
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&roots)?),
            }
        }
        Command::Scan { root } => {
            let scope = match root {
                Some(id) => ScanScope::Root(RootId::new(id)),
                None => ScanScope::AllRoots,
            };
            eprintln!("Scanning {scope}...");
            let report = monitor.request_scan(scope)?.wait().await?;
            print_cycle(&report, format)?;
        }
        Command::Status => {
            let summary = monitor.storage_summary()?;
            match format {
                OutputFormat::Text => {
                    for line in status_lines(&summary) {
                        println!("{line}");
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            }
        }
        Command::History { limit } => {
            let history = monitor.usage_history(limit)?;
            match format {
                OutputFormat::Text => {
                    if history.is_empty() {
                        println!("No usage history yet.");
                    }
                    for snapshot in &history {
                        println!(
                            "{}  {}  used {:>10}  free {:>10}",
                            snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            snapshot.root_id,
                            format_size(snapshot.used_bytes),
                            format_size(snapshot.free_bytes)
                        );
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&history)?),
            }
        }
        Command::Types { top } => {
            let mut types = monitor.file_type_breakdown()?;
            types.truncate(top);
            match format {
                OutputFormat::Text => {
                    for stats in &types {
                        println!(
                            "{:<12} {:>10}  {:>8} files",
                            stats.file_type,
                            format_size(stats.total_size),
                            stats.count
                        );
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&types)?),
            }
        }
        Command::Duplicates { top } => {
            let mut groups = monitor.duplicate_groups()?;
            groups.truncate(top);
            match format {
                OutputFormat::Text => {
                    println!();
                    println!("{}", "─".repeat(70));
                    println!(" Duplicate File Report");
                    println!("{}", "─".repeat(70));
                    println!();

                    if groups.is_empty() {
                        println!(" No duplicate files found.");
                    } else {
                        let wasted: u64 = groups.iter().map(|g| g.wasted_bytes()).sum();
                        println!(" Showing {} duplicate groups", groups.len());
                        println!(" Wasted space: {}", format_size(wasted));
                        println!();

                        for (i, group) in groups.iter().enumerate() {
                            println!(
                                " Group {}: {} ({} files, {} each, {} wasted)",
                                i + 1,
                                group.name,
                                group.count(),
                                format_size(group.size),
                                format_size(group.wasted_bytes())
                            );
                            for path in &group.paths {
                                println!("   {}", path.display());
                            }
                            println!();
                        }
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&groups)?),
            }
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("Refusing to delete all monitoring data without --yes");
            }
            monitor.reset_all()?;
            if let OutputFormat::Text = format {
                println!("All monitoring data cleared.");
            }
        }
        Command::Serve { .. } | Command::Add { .. } => unreachable!("handled in main"),
    }
    Ok(())
}

fn print_cycle(report: &CycleReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(60));
            println!(
                " {} in {} files across {} folders",
                format_size(report.total_size()),
                report.total_items(),
                report.roots.len()
            );
            println!(" Scanned in {:.2}s", report.duration.as_secs_f64());
            if let Some(groups) = report.duplicate_groups {
                println!(" {groups} duplicate groups");
            }
            println!("{}", "─".repeat(60));

            if !report.errors.is_empty() {
                println!();
                println!("{} error(s) during scan", report.errors.len());
                for error in report.errors.iter().take(10) {
                    println!("  {error}");
                }
            }
        }
        OutputFormat::Json => {
            let roots: Vec<_> = report
                .roots
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "root_id": r.root_id,
                        "path": r.root_path,
                        "size": r.size,
                        "items": r.items,
                        "free_bytes": r.free_bytes,
                        "warnings": r.warnings.len(),
                    })
                })
                .collect();
            let value = serde_json::json!({
                "scope": report.scope,
                "started_at": report.started_at,
                "completed_at": report.completed_at,
                "roots": roots,
                "errors": report.errors,
                "duplicate_groups": report.duplicate_groups,
                "store_failed": report.store_failed,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

fn status_lines(summary: &StorageSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "Monitoring {} folders, {} in {} files",
        summary.root_count,
        format_size(summary.total_bytes),
        summary.total_items
    )];
    match summary.last_scan {
        Some(at) => lines.push(format!(
            "Last completed scan: {}",
            at.format("%Y-%m-%d %H:%M:%S")
        )),
        None => lines.push("No completed scans yet.".to_string()),
    }
    lines
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
