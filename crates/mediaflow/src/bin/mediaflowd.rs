use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use mediaflow::config::load_config;
use mediaflow::stage::schedule_library_scan;
use mediaflow::{
    init_logging, register_command_operations, Clock, Coordinator, CoordinatorConfig,
    Database, OperationRegistry, RepositorySet, SharedClock, StageContext, SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "mediaflowd", version, about = "Media pipeline coordinator daemon")]
struct Args {
    /// Path to a YAML or JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Schedule an immediate scan of this library (repeatable)
    #[arg(long = "scan", value_name = "LIBRARY")]
    scan: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => CoordinatorConfig::default(),
    };
    init_logging(&config.logging)?;
    info!("Starting mediaflowd v{} as '{}'", env!("CARGO_PKG_VERSION"), config.system_name);

    let clock: SharedClock = Arc::new(SystemClock);
    let repos = match &config.database {
        Some(path) => {
            info!("Using database at {:?}", path);
            RepositorySet::sqlite(Database::open(path)?, clock.clone())
        }
        None => {
            info!("No database configured, state is kept in memory");
            RepositorySet::in_memory(clock.clone())
        }
    };

    let mut operations = OperationRegistry::new();
    register_command_operations(&mut operations, &config.operations);
    info!("Registered {} operations", operations.len());

    let catalog = config.catalog.clone();
    let ctx = StageContext::new(config, repos, clock.clone(), operations);
    if let Some(catalog) = &catalog {
        ctx.apply_catalog(catalog).await?;
    }
    for library in &args.scan {
        schedule_library_scan(&ctx, library, clock.now()).await?;
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Received interrupt, shutting down");
            shutdown.cancel();
        })?;
    }

    let mut coordinator = Coordinator::new(ctx);
    coordinator.start();
    if !args.scan.is_empty() {
        coordinator.awaken();
    }

    shutdown.cancelled().await;
    coordinator.stop();
    coordinator.join().await;
    if coordinator.is_running() {
        error!("Some loops did not exit cleanly");
    }
    info!("mediaflowd stopped");
    Ok(())
}
