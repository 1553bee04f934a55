use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use feedmill::config::Config;
use feedmill::storage::{Database, FeedQuery, StoreError};
use feedmill::{FeedService, IngestionCoordinator};

/// Get the config directory path (~/.config/feedmill/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedmill"))
}

#[derive(Parser, Debug)]
#[command(name = "feedmill", about = "Concurrent RSS/Atom ingestion and deduplication")]
struct Args {
    /// Config file (default: ~/.config/feedmill/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides config and FEEDMILL_DATABASE
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest every feed on the configured interval until Ctrl-C
    Run {
        /// Minutes between passes, overrides refresh_interval_minutes
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run a single ingestion pass and print its summary
    Once,
    /// Register a feed URL
    Add { url: String },
    /// Register a YouTube channel's uploads feed by channel id
    AddYoutube { channel_id: String },
    /// Ingest one registered feed now
    Refresh { url: String },
    /// List registered feeds
    List,
    /// Show the newest articles of a feed
    Items {
        feed_url: String,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Search feeds by title, link or domain (case-insensitive)
    Search {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        link: Option<String>,
        #[arg(long)]
        domain: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let mut config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.apply_env();
    if let Some(database) = &args.database {
        config.database_path = database.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(StoreError::Locked) => {
            eprintln!(
                "Error: {} is locked by another process. Close it and try again.",
                config.database_path
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let coordinator = IngestionCoordinator::from_config(Arc::new(db), &config)
        .context("Failed to build HTTP client")?;
    let service = FeedService::new(coordinator);

    match args.command {
        Command::Run { interval } => {
            let minutes = interval.unwrap_or(config.refresh_interval_minutes);
            let ack = service.trigger_background_refresh(minutes);
            tracing::info!("{}", ack.message);

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down after the current pass");
            ack.handle
                .stop()
                .await
                .context("Scheduler task panicked")?;
        }
        Command::Once => {
            let summary = service
                .coordinator()
                .run_pass()
                .await
                .context("Ingestion pass failed")?;
            print_json(&summary)?;
        }
        Command::Add { url } => {
            let feed = service
                .add_feed(&url)
                .await
                .with_context(|| format!("Failed to add feed {}", url))?;
            print_json(&feed)?;
        }
        Command::AddYoutube { channel_id } => {
            let feed = service
                .add_youtube_channel(&channel_id)
                .await
                .with_context(|| format!("Failed to add YouTube channel {}", channel_id))?;
            print_json(&feed)?;
        }
        Command::Refresh { url } => {
            let outcome = service
                .coordinator()
                .refresh_feed(&url)
                .await
                .with_context(|| format!("Failed to refresh feed {}", url))?;
            print_json(&outcome)?;
        }
        Command::List => {
            print_json(&service.list_feeds().await?)?;
        }
        Command::Items { feed_url, limit } => {
            let items = service
                .get_feed_items(&feed_url, limit)
                .await
                .with_context(|| format!("Failed to load items for {}", feed_url))?;
            print_json(&items)?;
        }
        Command::Search {
            title,
            link,
            domain,
        } => {
            let query = FeedQuery {
                title,
                link,
                domain,
            };
            if query.is_empty() {
                anyhow::bail!("Give at least one of --title, --link or --domain");
            }
            print_json(&service.search_feeds(&query).await?)?;
        }
    }

    Ok(())
}
