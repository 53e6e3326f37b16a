//! dado - download dashcam recordings that contain activity
//!
//! Polls the camera, runs motion detection over its thumbnails, and fetches
//! and merges the recordings around each period of activity, plus any range
//! an operator asked for with a marker file.
//!
//! Uses XDG Base Directory specification for file locations:
//! - State: $XDG_DATA_HOME/dado/state.db (~/.local/share/dado/state.db)
//! - Logs: $XDG_STATE_HOME/dado/ (~/.local/state/dado/)
//! - Config: $XDG_CONFIG_HOME/dado/config.toml (~/.config/dado/config.toml)

mod process_lock;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use dado_core::camera::DdpaiCamera;
use dado_core::poller::Stage;
use dado_core::{Config, CursorStore, CycleResult, Database, MemoryCursorStore, PollCoordinator};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::acquire_daemon_guard;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "dado")]
#[command(about = "Download dashcam recordings that contain activity")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/dado/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single polling cycle and exit
    #[arg(long)]
    once: bool,

    /// List and classify without downloading or saving state (implies --once)
    #[arg(long)]
    dry_run: bool,

    /// Verbose output (-v per-request details)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let _log_guard =
        dado_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(dry_run = args.dry_run, "dado starting");
    if args.verbose > 0 {
        println!("Logs: {}", dado_core::logging::log_dir().display());
    }

    let camera = DdpaiCamera::new(config.camera.clone()).context("failed to create camera client")?;
    let db_path = Config::database_path();

    if args.dry_run {
        let cursor = if db_path.exists() {
            let db = Database::open(&db_path).context("failed to open database")?;
            db.migrate().context("failed to run database migrations")?;
            db.load_cursor().context("failed to read processing cursor")?
        } else {
            None
        };
        let store = MemoryCursorStore::with_cursor(cursor);
        println!("Dry run - nothing will be downloaded or saved");
        return run(config, camera, &store, None, &args);
    }

    // One daemon per state database
    let _daemon_guard = acquire_daemon_guard(&db_path).context("failed to acquire process lock")?;

    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());

    run(config, camera, &db, Some(&db), &args)
}

fn run<S: CursorStore>(
    config: Config,
    camera: DdpaiCamera,
    store: &S,
    request_log: Option<&Database>,
    args: &Args,
) -> Result<()> {
    let sleep_interval = Duration::from_secs(config.daemon.sleep_interval_secs);
    let mut coordinator = PollCoordinator::new(config, camera, store).dry_run(args.dry_run);

    if args.once || args.dry_run {
        let result = run_cycle(&mut coordinator, request_log)?;
        print_cycle_result(&result, args.verbose);
        return Ok(());
    }

    // Set up signal handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    println!(
        "Polling every {}s. Press Ctrl+C to stop.",
        sleep_interval.as_secs()
    );
    println!();

    let mut iteration = 0u64;

    while running.load(Ordering::SeqCst) {
        iteration += 1;

        match run_cycle(&mut coordinator, request_log) {
            Ok(result) => {
                print_cycle_result(&result, args.verbose);
                tracing::info!(
                    iteration,
                    requests = result.handled.len(),
                    recordings = result.recordings.downloaded,
                    "Polling cycle complete"
                );
            }
            Err(e) => {
                eprintln!("Polling cycle failed: {:#}", e);
                tracing::error!(iteration, error = %e, "Polling cycle failed");
            }
        }

        tracing::info!("Sleeping for {} seconds", sleep_interval.as_secs());
        sleep_while_running(&running, sleep_interval);
    }

    println!("Stopped.");
    tracing::info!("dado stopped");

    Ok(())
}

/// Run one cycle with a progress bar and record handled requests
fn run_cycle<S: CursorStore>(
    coordinator: &mut PollCoordinator<'_, DdpaiCamera, S>,
    request_log: Option<&Database>,
) -> Result<CycleResult> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:>10} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress bar template")?
            .progress_chars("#>-"),
    );

    let result = coordinator
        .run_cycle_with_progress(|stage: Stage, current, total, name: &str| {
            if current == 0 {
                pb.set_length(total as u64);
                pb.set_prefix(stage.to_string());
            }
            pb.set_position(current as u64);
            pb.set_message(name.to_string());
        })
        .context("polling cycle failed")?;

    pb.finish_and_clear();

    if let Some(db) = request_log {
        for entry in &result.handled {
            if let Err(e) = db.log_request(entry) {
                tracing::warn!(error = %e, "Failed to record handled request");
            }
        }
    }

    Ok(result)
}

/// Sleep in short steps so Ctrl+C is noticed promptly
fn sleep_while_running(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(std::cmp::min(deadline - now, Duration::from_millis(250)));
    }
}

/// Print cycle summary
fn print_cycle_result(result: &CycleResult, verbose: u8) {
    let timestamp = chrono::Local::now().format("%H:%M:%S");

    if !result.camera_available {
        println!("[{}] Camera not available", timestamp);
        return;
    }

    println!(
        "[{}] {} recordings ({} new), {} requests, {} downloaded, {} merged",
        timestamp,
        result.recordings_listed,
        result.recordings_unprocessed,
        result.requests_matched,
        result.recordings.downloaded,
        result.merges_succeeded
    );

    if verbose >= 1 {
        println!(
            "  Requests: {} motion, {} manual",
            result.motion_requests, result.manual_requests
        );
        println!(
            "  Thumbnails: {} downloaded, {} cached, {} failed",
            result.thumbnails.downloaded, result.thumbnails.skipped, result.thumbnails.failed
        );
        println!(
            "  Recordings: {} downloaded, {} cached, {} failed",
            result.recordings.downloaded, result.recordings.skipped, result.recordings.failed
        );
        if result.events.downloaded + result.events.skipped + result.events.failed > 0 {
            println!(
                "  Events: {} downloaded, {} cached, {} failed",
                result.events.downloaded, result.events.skipped, result.events.failed
            );
        }
        for entry in &result.handled {
            println!(
                "  {} {} -> {}: {}/{} recordings{}",
                entry.kind,
                entry.start_time.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
                entry.end_time.with_timezone(&chrono::Local).format("%H:%M:%S"),
                entry.downloaded_count,
                entry.recording_count,
                match entry.merge_status {
                    Some(true) => ", merged",
                    Some(false) => ", merge failed",
                    None => "",
                }
            );
        }
        if let Some(cursor) = &result.cursor {
            println!(
                "  Cursor: {}{}",
                cursor.end_time().with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
                if result.cursor_advanced { " (advanced)" } else { "" }
            );
        }
    }

    if result.merges_failed > 0 {
        println!("  {} merge(s) failed", result.merges_failed);
    }

    if !result.errors.is_empty() {
        println!("\nErrors ({}):", result.errors.len());
        for err in &result.errors {
            println!("  {}", err);
        }
    }
}
