//! CLI smoke entry point for the chapterwatch store.
//!
//! # Responsibility
//! - Load config, start logging and open the subscription database.
//! - Print store status, or register one subscription for manual testing.

use chapterwatch_core::config::default_data_dir;
use chapterwatch_core::{
    core_version, init_logging, AppConfig, Clock, SqliteSubscriptionStore, SubscribeRequest,
    SubscriptionRepository, SubscriptionService, SystemClock,
};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "chapterwatch")]
#[command(version)]
#[command(about = "Series subscription store smoke tool", long_about = None)]
struct Cli {
    /// Config file; defaults to `$HOME/.chapterwatch/config.json`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print version, database path, interval and active subscription count.
    Status,
    /// Subscribe EMAIL to SERIES_ID, creating the user when unknown.
    Subscribe {
        email: String,
        series_id: String,
        title: Option<String>,
        /// Comma-separated language codes; defaults to the configured list.
        langs: Option<String>,
    },
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli_exit module=cli status=error error={message}");
            eprintln!("chapterwatch: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config_path = cli
        .config
        .unwrap_or_else(|| default_data_dir().join("config.json"));
    let config = AppConfig::load_or_default(&config_path).map_err(|err| err.to_string())?;

    if let Err(err) = init_logging(&config.logging) {
        eprintln!("chapterwatch: logging disabled: {err}");
    }

    let store = SqliteSubscriptionStore::open(&config.database_path)
        .map_err(|err| err.to_string())?;

    match cli.command.unwrap_or(Command::Status) {
        Command::Status => print_status(&config, &store),
        Command::Subscribe {
            email,
            series_id,
            title,
            langs,
        } => {
            let request = SubscribeRequest {
                email,
                series_id,
                series_title: title.unwrap_or_default(),
                languages: langs.unwrap_or_else(|| config.default_languages_csv()),
                now_ms: SystemClock.now_ms(),
            };
            subscribe(&store, &request)
        }
    }
}

fn print_status(config: &AppConfig, store: &SqliteSubscriptionStore) -> Result<(), String> {
    let active = store
        .with_repo(|repo| repo.list_active_subscriptions())
        .map_err(|err| err.to_string())?;

    println!("chapterwatch_core version={}", core_version());
    println!("database={}", config.database_path.display());
    println!("check_interval_secs={}", config.check_interval_secs);
    println!("active_subscriptions={}", active.len());
    Ok(())
}

fn subscribe(store: &SqliteSubscriptionStore, request: &SubscribeRequest) -> Result<(), String> {
    let subscription = store
        .with_repo(|repo| SubscriptionService::new(repo).subscribe(request))
        .map_err(|err| err.to_string())?;
    info!(
        "event=cli_subscribe module=cli status=ok subscription_id={}",
        subscription.id
    );
    println!(
        "subscribed id={} series={} languages={}",
        subscription.id,
        subscription.series_id,
        subscription.languages.to_storage_string()
    );
    Ok(())
}
