//! dado-state - inspect and reset dado's persisted state
//!
//! Reads the same database as the daemon:
//! $XDG_DATA_HOME/dado/state.db (~/.local/share/dado/state.db)

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{ArgAction, Parser, Subcommand};
use dado_core::{Config, CursorStore, Database};

#[derive(Parser)]
#[command(name = "dado-state")]
#[command(about = "Inspect and reset dado's processing state")]
#[command(version)]
struct Args {
    /// Verbose output
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the last processed recording
    Cursor,
    /// Forget the processing cursor so the next cycle re-examines every recording
    Reset,
    /// List recently handled requests
    Requests {
        /// Maximum number of requests to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let db_path = Config::database_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    db.migrate().context("failed to run database migrations")?;

    if args.verbose > 0 {
        println!("Database: {}", db_path.display());
    }

    match args.command {
        Command::Cursor => show_cursor(&db, args.verbose),
        Command::Reset => reset_cursor(&db),
        Command::Requests { limit } => show_requests(&db, limit, args.verbose),
    }
}

fn show_cursor(db: &Database, verbose: u8) -> Result<()> {
    let Some(cursor) = db.load_cursor().context("failed to read processing cursor")? else {
        println!("No recordings processed yet");
        return Ok(());
    };

    let frame = &cursor.frame;
    println!("Last processed: {}", frame.name);
    println!("  Start: {}", format_local(frame.start_time));
    println!("  End:   {}", format_local(frame.end_time));

    if verbose > 0 {
        if let Some(score) = frame.dissimilarity {
            println!("  Dissimilarity: {:.1}", score);
        }
        if let Some(thumbnail) = &frame.thumbnail {
            println!("  Thumbnail: {}", thumbnail);
        }
    }

    if let Some(updated) = db.cursor_updated_at()? {
        println!("  Saved: {}", format_local(updated));
    }

    Ok(())
}

fn reset_cursor(db: &Database) -> Result<()> {
    if db.clear_cursor().context("failed to clear processing cursor")? {
        tracing::info!("Processing cursor cleared");
        println!("Processing cursor cleared");
    } else {
        println!("No processing cursor to clear");
    }
    Ok(())
}

fn show_requests(db: &Database, limit: usize, verbose: u8) -> Result<()> {
    let entries = db
        .recent_requests(limit)
        .context("failed to read request log")?;

    if entries.is_empty() {
        println!("No requests handled yet");
        return Ok(());
    }

    let total = db.request_count()?;
    println!("Showing {} of {} handled requests", entries.len(), total);
    println!();

    for entry in &entries {
        let merge = match entry.merge_status {
            Some(true) => "merged",
            Some(false) => "merge failed",
            None => "-",
        };
        println!(
            "{:<6}  {} -> {}  {}/{} recordings  {}",
            entry.kind,
            format_local(entry.start_time),
            format_local(entry.end_time),
            entry.downloaded_count,
            entry.recording_count,
            merge
        );
        if verbose > 0 {
            println!("        id {}  handled {}", entry.id, format_local(entry.handled_at));
        }
    }

    Ok(())
}

fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
