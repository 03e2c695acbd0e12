//! TpcKv - Replicated Key-Value Store with Two-Phase Commit
//!
//! Runs either the coordinator or one replica.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tpckv::cache::KvCache;
use tpckv::commitlog::CommitLog;
use tpckv::config::{TpcKvConfig, SAMPLE_CONFIG};
use tpckv::coordinator::{CommitCoordinator, CoordinatorHandler, RetryPolicy};
use tpckv::error::Result;
use tpckv::network::{NetworkClient, NetworkServer};
use tpckv::registry::{RegistrationHandler, ReplicaRegistry};
use tpckv::replica::{ReplicaHandler, ReplicaNode};

/// TpcKv - Replicated Key-Value Store
#[derive(Parser)]
#[command(name = "tpckv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "tpckv.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator
    Coordinator {
        /// Send ignoreNext in place of the first phase-1 request
        #[arg(long)]
        ignore_next: bool,
    },

    /// Run a replica
    Replica {
        /// Replica name (overrides the configuration file)
        #[arg(long)]
        name: Option<String>,

        /// Coordinator host (overrides the configuration file)
        #[arg(long)]
        coordinator: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "tpckv.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_init(output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_validate(cli.config)
        }
        Commands::Coordinator { ignore_next } => {
            let config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));
            run_coordinator(config, ignore_next).await
        }
        Commands::Replica { name, coordinator } => {
            let mut config = load_config(&cli.config)?;
            if let Some(name) = name {
                config.replica.name = name;
                config.replica.id = None;
            }
            if let Some(host) = coordinator {
                config.replica.coordinator_host = host;
            }
            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));
            run_replica(config).await
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the configuration file, falling back to defaults when it is absent
fn load_config(path: &Path) -> Result<TpcKvConfig> {
    if path.exists() {
        TpcKvConfig::from_file(path)
    } else {
        eprintln!("Configuration file {} not found, using defaults", path.display());
        let config = TpcKvConfig::default();
        config.validate()?;
        Ok(config)
    }
}

/// Run the coordinator until interrupted
async fn run_coordinator(config: TpcKvConfig, ignore_next: bool) -> Result<()> {
    tracing::info!("Starting TpcKv coordinator...");

    let registry = Arc::new(ReplicaRegistry::new(config.coordinator.num_replicas));
    let coordinator = Arc::new(
        CommitCoordinator::new(
            Arc::clone(&registry),
            KvCache::new(config.cache.num_sets, config.cache.max_elems_per_set),
            NetworkClient::new(config.timeout()),
            RetryPolicy::from_config(&config),
        )
        .with_ignore_next(ignore_next),
    );

    let registration_server = NetworkServer::bind(
        &config.coordinator.registration_address,
        config.coordinator.workers,
        config.coordinator.queue_capacity,
        config.timeout(),
    )
    .await?;
    let client_server = NetworkServer::bind(
        &config.coordinator.client_address,
        config.coordinator.workers,
        config.coordinator.queue_capacity,
        config.timeout(),
    )
    .await?;

    tracing::info!(
        "Waiting for {} replicas on {}, serving clients on {}",
        config.coordinator.num_replicas,
        registration_server.local_addr()?,
        client_server.local_addr()?
    );

    let registration_shutdown = registration_server.shutdown_handle();
    let client_shutdown = client_server.shutdown_handle();
    let registration_handle = tokio::spawn(registration_server.run(Arc::new(RegistrationHandler::new(registry))));
    let client_handle = tokio::spawn(client_server.run(Arc::new(CoordinatorHandler::new(coordinator))));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    let _ = registration_shutdown.send(true);
    let _ = client_shutdown.send(true);
    for handle in [registration_handle, client_handle] {
        if let Ok(Err(e)) = handle.await {
            tracing::warn!("Server exited with error: {}", e);
        }
    }
    tracing::info!("TpcKv coordinator shutdown complete");
    Ok(())
}

/// Run one replica until interrupted
async fn run_replica(config: TpcKvConfig) -> Result<()> {
    let id = config.replica_id()?;
    tracing::info!("Starting TpcKv replica {} ({})...", id, config.replica.name);

    let log_path = config.commit_log_path()?;
    let log = match CommitLog::open(&log_path, config.commit_log_options()) {
        Ok(log) => log,
        Err(e) => {
            tracing::error!("Failed to open commit log {:?}: {}", log_path, e);
            return Err(e);
        }
    };
    tracing::info!("Commit log {:?} holds {} records", log_path, log.len());

    let node = Arc::new(ReplicaNode::new(config.cache.num_sets, config.cache.max_elems_per_set));
    let handler = Arc::new(ReplicaHandler::new(id, node, Arc::new(Mutex::new(log))).await?);

    let server = NetworkServer::bind(
        &config.replica.bind_address,
        config.replica.workers,
        config.replica.queue_capacity,
        config.timeout(),
    )
    .await?;
    let port = server.local_addr()?.port();
    let shutdown = server.shutdown_handle();
    let server_handle = tokio::spawn(server.run(handler.clone()));

    let client = NetworkClient::new(config.timeout());
    match handler
        .register_with_coordinator(&client, &config.registration_target(), &config.replica.advertise_host, port)
        .await
    {
        Ok(reply) => tracing::info!("{}", reply),
        Err(e) => {
            tracing::error!("Failed to register with {}: {}", config.registration_target(), e);
            server_handle.abort();
            return Err(e);
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    let _ = shutdown.send(true);
    if let Ok(Err(e)) = server_handle.await {
        tracing::warn!("Server exited with error: {}", e);
    }
    tracing::info!("TpcKv replica {} shutdown complete", id);
    Ok(())
}

/// Write a sample configuration file
fn run_init(output: PathBuf) -> Result<()> {
    std::fs::write(&output, SAMPLE_CONFIG)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the replica name and addresses for each process.");
    println!("Then start with: tpckv --config {} coordinator", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match TpcKvConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Client Address:       {}", config.coordinator.client_address);
            println!("  Registration Address: {}", config.coordinator.registration_address);
            println!("  Replicas:             {}", config.coordinator.num_replicas);
            println!("  Replica Name:         {}", config.replica.name);
            match config.commit_log_path() {
                Ok(path) => println!("  Commit Log:           {}", path.display()),
                Err(e) => println!("  Commit Log:           ({})", e),
            }
            println!(
                "  Cache:                {} sets x {} slots",
                config.cache.num_sets, config.cache.max_elems_per_set
            );
            println!("  Timeout:              {} ms", config.network.timeout_ms);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
