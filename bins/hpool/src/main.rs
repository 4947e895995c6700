mod commands;

use clap::{Parser, Subcommand};
use hpool_core::config::Config;
use hpool_core::manager::PoolManager;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hpool")]
#[command(about = "Pool index updater and project cache checker", version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding pools.json (overrides hpool.toml and the default)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Update a pool's index; only the given files if any
    Update {
        /// Pool base path
        pool: PathBuf,

        /// Changed files for a partial update
        files: Vec<PathBuf>,
    },

    /// Manage the registered pools
    Pools {
        #[command(subcommand)]
        command: PoolsCommand,
    },

    /// Show the include chain of a pool in update order
    Deps {
        /// Pool base path
        pool: PathBuf,
    },

    /// Compare a project's cached items against their pools
    CacheStatus {
        /// Project pool base path
        project: PathBuf,
    },

    /// Keep reporting cache status as files change, until Ctrl+C
    WatchCache {
        /// Project pool base path
        project: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum PoolsCommand {
    /// List registered pools
    List,
    /// Register a pool and enable it
    Add { path: PathBuf },
    /// Forget a pool
    Remove { path: PathBuf },
    /// Enable a pool, disabling others with the same UUID
    Enable { path: PathBuf },
    /// Disable a pool
    Disable { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hpool=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = Config::load()?;
    if args.config_dir.is_some() {
        config.config_dir = args.config_dir.clone();
    }
    let config_dir = config.get_config_dir();
    debug!("Using config directory {:?}", config_dir);
    let manager = Arc::new(PoolManager::load(&config_dir)?);

    let pretty = args.pretty;
    match args.command {
        Commands::Update { pool, files } => commands::update(manager, pool, files, pretty).await,
        Commands::Pools { command } => match command {
            PoolsCommand::List => commands::pools_list(&manager, pretty),
            PoolsCommand::Add { path } => commands::pools_add(&manager, &path),
            PoolsCommand::Remove { path } => commands::pools_remove(&manager, &path),
            PoolsCommand::Enable { path } => commands::pools_set_enabled(&manager, &path, true),
            PoolsCommand::Disable { path } => commands::pools_set_enabled(&manager, &path, false),
        },
        Commands::Deps { pool } => commands::deps(&manager, &pool, pretty),
        Commands::CacheStatus { project } => commands::cache_status(manager, project, pretty).await,
        Commands::WatchCache { project } => {
            let debounce = std::time::Duration::from_millis(config.cache_debounce_ms);
            commands::watch_cache(manager, project, debounce).await
        }
    }
}
