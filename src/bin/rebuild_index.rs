//! Rebuild the full-text search index from the host database.
//!
//! Reindexes the published submissions of the selected contexts, including
//! their proof-stage files, then prunes unpublished rows. Safe to re-run at
//! any point; every write is an idempotent upsert.
//!
//! Usage:
//!     rebuild_index --list
//!     rebuild_index --contexts 1,2
//!     rebuild_index --clear-legacy-tables

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use submission_search::search::{
    self, DefaultParserFactory, DEFAULT_LEGACY_SEARCH_TABLES,
};
use submission_search::{HostRepository, SqlHostRepository};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Rebuild the submission search index",
    long_about = "Reindexes the published submissions of the selected contexts and prunes\n\
                  rows whose submissions are no longer published. Safe to re-run."
)]
struct Args {
    /// Context ids to rebuild (default: all contexts)
    #[arg(long, value_delimiter = ',')]
    contexts: Vec<i64>,

    /// List available contexts and exit
    #[arg(long, default_value_t = false)]
    list: bool,

    /// Clear the host's legacy search tables after the rebuild
    #[arg(long, default_value_t = false)]
    clear_legacy_tables: bool,

    /// Legacy search tables to clear (default: both host API generations)
    #[arg(long, value_delimiter = ',')]
    legacy_tables: Vec<String>,

    /// Verbose output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let args = Args::parse();

    // Setup logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Connect to database
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let dialect = search::detect_dialect(&database_url)?;

    install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    info!("Connected to database ({} ranking dialect)", dialect.name());

    let dao = search::Dao::new(pool.clone(), dialect);
    let host = SqlHostRepository::new(pool.clone(), dialect);

    if args.list {
        for context in host.contexts().await? {
            println!("{}\t{}", context.id, context.name);
        }
        return Ok(());
    }

    search::ensure_schema(&pool, dialect)
        .await
        .context("Failed to create the search index schema")?;

    let context_ids: Vec<i64> = if args.contexts.is_empty() {
        host.contexts().await?.into_iter().map(|context| context.id).collect()
    } else {
        args.contexts.clone()
    };

    info!("Rebuilding {} context(s)", context_ids.len());

    let indexer = search::Indexer::new(
        dao.clone(),
        Arc::new(host),
        Arc::new(DefaultParserFactory),
        true,
    );
    let stats = indexer.rebuild(&context_ids).await?;

    info!(
        "Rebuild complete: {} submissions and {} files across {} context(s), {} stale rows pruned",
        stats.submissions, stats.files, stats.contexts, stats.pruned
    );

    if args.clear_legacy_tables {
        let tables: Vec<&str> = if args.legacy_tables.is_empty() {
            DEFAULT_LEGACY_SEARCH_TABLES.to_vec()
        } else {
            args.legacy_tables.iter().map(String::as_str).collect()
        };
        dao.clear_legacy_search_tables(&tables)
            .await
            .context("Failed to clear the legacy search tables")?;
        info!("Cleared legacy search tables: {}", tables.join(", "));
    }

    Ok(())
}
