//! Binary entry point for feedsift.
//!
//! This binary provides the CLI for loading catalogs, importing items and
//! rendering feeds.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use feedsift::blocks::BlockStream;
use feedsift::config::FeedsiftConfig;
use feedsift::observability;
use feedsift::services::{CatalogService, FeedService, ImportService, RenderedBlock};
use feedsift::{DigesterRegistry, EngineContext, FilterRegistry, ItemRepository, SqliteStore};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Feedsift - incremental relevance filtering for personal feeds.
#[derive(Parser)]
#[command(name = "feedsift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database (overrides configuration).
    #[arg(long, global = true, env = "FEEDSIFT_DATABASE_PATH")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Validate a catalog file and store its filters, blocks and feeds.
    Load {
        /// Catalog TOML file.
        catalog: PathBuf,
    },

    /// Import items from a JSON array.
    Import {
        /// Items JSON file.
        items: PathBuf,
    },

    /// List feeds.
    Feeds,

    /// Render a feed.
    Render {
        /// Feed title.
        feed: String,

        /// Print one JSON object per line.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init(&config.logging.clone().with_verbose(cli.verbose)) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FeedsiftConfig> {
    let config = match path {
        Some(path) => FeedsiftConfig::load_from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => FeedsiftConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}

async fn run_command(cli: Cli, mut config: FeedsiftConfig) -> anyhow::Result<()> {
    if let Some(database) = cli.database {
        config = config.with_database_path(database);
    }
    let store = Arc::new(
        SqliteStore::new(config.database_path.clone())
            .with_context(|| format!("opening {}", config.database_path.display()))?,
    );
    let context = EngineContext::from_store(
        Arc::clone(&store),
        FilterRegistry::with_builtins(),
        DigesterRegistry::with_builtins(),
    )
    .with_settings(config.engine_settings());

    match cli.command {
        Commands::Load { catalog } => cmd_load(context, &catalog).await,
        Commands::Import { items } => cmd_import(store, &items).await,
        Commands::Feeds => cmd_feeds(context).await,
        Commands::Render { feed, json } => cmd_render(context, &feed, json).await,
    }
}

async fn cmd_load(context: EngineContext, path: &Path) -> anyhow::Result<()> {
    let summary = CatalogService::new(context)
        .load_file(path)
        .await
        .with_context(|| format!("loading {}", path.display()))?;
    println!(
        "Loaded {} filters, {} blocks, {} feeds",
        summary.filters, summary.blocks, summary.feeds
    );
    Ok(())
}

async fn cmd_import(store: Arc<SqliteStore>, path: &Path) -> anyhow::Result<()> {
    let items: Arc<dyn ItemRepository> = store;
    let written = ImportService::new(items)
        .import_file(path)
        .await
        .with_context(|| format!("importing {}", path.display()))?;
    println!("Imported {written} items");
    Ok(())
}

async fn cmd_feeds(context: EngineContext) -> anyhow::Result<()> {
    let feeds = FeedService::new(context).list_feeds().await?;
    if feeds.is_empty() {
        println!("No feeds defined. Run `feedsift load <catalog.toml>` first.");
    }
    for feed in feeds {
        println!("{} ({} blocks)", feed.title, feed.blocks.len());
    }
    Ok(())
}

async fn cmd_render(context: EngineContext, feed: &str, json: bool) -> anyhow::Result<()> {
    let blocks = FeedService::new(context).render(feed).await?;
    for RenderedBlock { title, output } in blocks {
        if !json {
            println!("# {title}");
            println!();
        }
        match output.into_stream() {
            BlockStream::Items(mut items) => {
                while let Some(item) = items.next().await {
                    let item = item.with_context(|| format!("reading block '{title}'"))?;
                    if json {
                        println!(
                            "{}",
                            serde_json::json!({ "block": title, "item": item })
                        );
                    } else {
                        let byline = item.byline();
                        if byline.is_empty() {
                            println!("- [{}] {} ({})", item.id, item.title, item.source_name);
                        } else {
                            println!(
                                "- [{}] {} ({}, {byline})",
                                item.id, item.title, item.source_name
                            );
                        }
                    }
                }
            },
            BlockStream::Content(mut content) => {
                while let Some(chunk) = content.next().await {
                    let chunk =
                        chunk.with_context(|| format!("reading block '{title}'"))?;
                    if json {
                        println!(
                            "{}",
                            serde_json::json!({ "block": title, "content": chunk })
                        );
                    } else {
                        print!("{chunk}");
                    }
                }
            },
        }
        if !json {
            println!();
        }
    }
    Ok(())
}
