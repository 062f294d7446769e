//! Watch directories and print changes until Ctrl-C

use crate::config::{self, CliConfig};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::Args;
use dirwatch::config::DEFAULT_BUFFER_SIZE;
use dirwatch::{rescan_since, ChangeSource, FileAction, FileChange, WatchOptions, Watcher};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Directories to watch
    pub directories: Vec<String>,

    /// Only watch the directories themselves, not their subdirectories
    #[arg(long)]
    pub no_recursive: bool,

    /// Bytes per change buffer (default: 32768)
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// TOML config file with watcher settings and more directories
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Milliseconds between queue drains (default: 50)
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// After an overflow, list files modified since the previous drain
    #[arg(long)]
    pub rescan: bool,
}

/// A directory to watch and how
#[derive(Debug, Clone, PartialEq)]
struct Target {
    path: String,
    options: WatchOptions,
}

pub async fn run(args: WatchArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => config::load(path)?,
        None => CliConfig::default(),
    };
    let targets = collect_targets(&args, &config)?;
    let poll_ms = args.poll_ms.unwrap_or(config.poll_interval_ms);
    if poll_ms == 0 {
        bail!("--poll-ms must be positive");
    }

    watch_native(config, targets, Duration::from_millis(poll_ms), args.rescan).await
}

#[cfg(windows)]
async fn watch_native(
    config: CliConfig,
    targets: Vec<Target>,
    interval: Duration,
    rescan: bool,
) -> Result<()> {
    let watcher = dirwatch::DirectoryWatcher::with_config(config.watcher)
        .context("Failed to start directory watcher")?;
    let result = watch(&watcher, &targets, interval, rescan).await;
    watcher.shut_down();
    result
}

#[cfg(not(windows))]
async fn watch_native(
    _config: CliConfig,
    _targets: Vec<Target>,
    _interval: Duration,
    _rescan: bool,
) -> Result<()> {
    bail!("Directory watching is only supported on Windows")
}

/// Merge config-file directories with command-line ones
fn collect_targets(args: &WatchArgs, config: &CliConfig) -> Result<Vec<Target>> {
    if args.buffer_size == Some(0) {
        bail!("--buffer-size must be positive");
    }

    let mut targets: Vec<Target> = config
        .directories
        .iter()
        .map(|directory| Target {
            path: directory.path.clone(),
            options: directory.options(),
        })
        .collect();

    let options = WatchOptions::new()
        .recursive(!args.no_recursive)
        .buffer_size(args.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE));
    for path in &args.directories {
        if path.is_empty() {
            bail!("Directory paths must not be empty");
        }
        targets.push(Target {
            path: path.clone(),
            options,
        });
    }

    if targets.is_empty() {
        bail!("No directories to watch. Pass them as arguments or list them in a config file.");
    }
    Ok(targets)
}

#[cfg_attr(not(windows), allow(dead_code))]
async fn watch<S: ChangeSource>(
    watcher: &Watcher<S>,
    targets: &[Target],
    interval: Duration,
    rescan: bool,
) -> Result<()> {
    for target in targets {
        watcher
            .add_directory_with(&target.path, target.options)
            .with_context(|| format!("Failed to watch {}", target.path))?;
        println!("{} {}", "Watching".bold(), target.path.cyan());
    }
    println!("{}", "Press Ctrl-C to stop".dimmed());

    let mut timer = tokio::time::interval(interval);
    let mut last_drain = SystemTime::now();

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let drained_at = SystemTime::now();
                for change in watcher.changes() {
                    println!("{}", render(&change));
                    if rescan && change.action == FileAction::TooManyChanges {
                        report_rescan(&change.path, targets, last_drain);
                    }
                }
                last_drain = drained_at;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[cfg_attr(not(windows), allow(dead_code))]
fn report_rescan(directory: &str, targets: &[Target], since: SystemTime) {
    let recursive = targets
        .iter()
        .find(|target| target.path == directory)
        .map_or(true, |target| target.options.recursive);

    match rescan_since(Path::new(directory), since, recursive) {
        Ok(paths) => {
            for path in paths {
                println!("  {} {}", "rescan".magenta(), Path::new(directory).join(path).display());
            }
        }
        Err(e) => warn!("Rescan of {} failed: {}", directory, e),
    }
}

fn label(action: FileAction) -> &'static str {
    match action {
        FileAction::None => "none",
        FileAction::Added => "added",
        FileAction::Removed => "removed",
        FileAction::Modified => "modified",
        FileAction::RenamedFrom => "renamed from",
        FileAction::RenamedTo => "renamed to",
        FileAction::TooManyChanges => "overflow",
        FileAction::WatchStopped => "stopped",
    }
}

/// Timestamp shown for a change: the file's own modification time when known
fn timestamp(change: &FileChange) -> String {
    let time: DateTime<Local> = change
        .modified_at()
        .map(DateTime::from)
        .unwrap_or_else(Local::now);
    time.format("%H:%M:%S%.3f").to_string()
}

fn render(change: &FileChange) -> String {
    let text = format!("{:>12}", label(change.action));
    let action = match change.action {
        FileAction::Added => text.green().to_string(),
        FileAction::Removed => text.red().to_string(),
        FileAction::Modified => text.yellow().to_string(),
        FileAction::RenamedFrom | FileAction::RenamedTo => text.blue().to_string(),
        FileAction::TooManyChanges => text.magenta().bold().to_string(),
        FileAction::WatchStopped => text.red().bold().to_string(),
        FileAction::None => text.dimmed().to_string(),
    };
    let kind = if change.is_directory { "dir " } else { "file" };

    format!(
        "{} {} {} {}",
        timestamp(change).dimmed(),
        action,
        kind.dimmed(),
        change.path
    )
}
