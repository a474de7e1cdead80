#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the event archive ingester.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use event_archive_cli_utils::IndicatifProgress;
use event_archive_database::EventStore;
use event_archive_database::event_db::DuckDbEventStore;
use event_archive_ingest::config::{Settings, load_env_file, resolve_before};
use event_archive_ingest::{CursorReport, IngestOptions, derive_cursor, run};
use event_archive_source::events_api::EventsApi;

#[derive(Parser)]
#[command(
    name = "event_archive_ingest",
    about = "Archive marketplace sale events and report the cursor for the next run"
)]
struct Cli {
    /// Path to the `DuckDB` store file (overrides `EVENT_ARCHIVE_DB`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Collection (table) to write events to (overrides `EVENT_ARCHIVE_COLLECTION`)
    #[arg(long, global = true)]
    collection: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch pages of events into the store, then print the new cursor
    Run(RunArgs),
    /// Print the cursor derived from the events already stored
    Cursor,
    /// Print the run state saved by the last run
    State,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Only fetch events that occurred before this unix timestamp
    /// (overrides `EVENT_ARCHIVE_BEFORE`)
    #[arg(long, conflicts_with = "resume")]
    before: Option<i64>,
    /// Continue from the cursor saved by the previous run
    #[arg(long)]
    resume: bool,
    /// Last page index to request, inclusive (overrides `EVENT_ARCHIVE_MAX_PAGE`)
    #[arg(long)]
    max_page: Option<u32>,
    /// Events endpoint (overrides `EVENT_ARCHIVE_API_URL`)
    #[arg(long)]
    api_url: Option<String>,
}

/// Prints the earliest stored date, then the cursor on its own line.
fn print_cursor(report: &CursorReport) {
    println!("{}", report.created_date.as_deref().unwrap_or_default());
    if let Some(cursor) = report.cursor {
        println!("{cursor}");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_file = load_env_file(None);
    let multi = event_archive_cli_utils::init_logger();
    match env_file? {
        Some(path) => log::debug!("Loaded environment from {}", path.display()),
        None => log::debug!("No .env file found"),
    }

    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    if let Some(collection) = cli.collection {
        settings.collection = collection;
    }

    let store = DuckDbEventStore::open(&settings.db_path, &settings.collection)?;

    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            let state = store.load_run_state()?;
            let before = resolve_before(settings.before(args.before)?, args.resume, state.as_ref())?;
            let max_page = settings.max_page(args.max_page)?;

            let mut api = EventsApi::builder(args.api_url.as_deref().unwrap_or(&settings.api_url));
            if let Some(key) = &settings.api_key {
                api = api.api_key(key);
            }
            let api = api.build()?;

            log::info!(
                "Archiving into {} ({}), before={before}, max_page={max_page}",
                settings.db_path.display(),
                store.collection()
            );

            let progress = IndicatifProgress::pages_bar(&multi, "Ingesting events");
            let options = IngestOptions::new(before).with_max_page(max_page);
            let report = run(&api, &store, &options, Some(progress)).await?;

            print_cursor(&report.cursor);
            log::info!(
                "Run complete: {} events in {} pages",
                report.summary.documents_written,
                report.summary.pages_written
            );
        }
        Commands::Cursor => {
            let report = derive_cursor(&store)?;
            print_cursor(&report);
        }
        Commands::State => match store.load_run_state()? {
            Some(state) => {
                println!("{:<12} {}", "last_cursor", state.last_cursor);
                println!("{:<12} {}", "last_run_at", state.last_run_at.to_rfc3339());
            }
            None => println!("No run state recorded for '{}'", settings.collection),
        },
    }

    Ok(())
}
