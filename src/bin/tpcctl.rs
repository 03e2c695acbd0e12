//! TpcCtl - Command line client for a TpcKv coordinator
//!
//! Usage:
//!   tpcctl get <key>           - Read a key
//!   tpcctl put <key> <value>   - Store a value
//!   tpcctl del <key>           - Delete a key
//!   tpcctl ignore-next         - Make every replica drop its next phase-1 request

use std::time::Duration;

use clap::{Parser, Subcommand};

use tpckv::client::KvClient;

/// TpcKv Control Tool
#[derive(Parser)]
#[command(name = "tpcctl")]
#[command(about = "Issue requests to a TpcKv coordinator", long_about = None)]
struct Cli {
    /// Coordinator client address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    endpoint: String,

    /// Request timeout in milliseconds
    #[arg(short, long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a key
    Get { key: String },
    /// Store a value
    Put { key: String, value: String },
    /// Delete a key
    Del { key: String },
    /// Make every replica drop its next phase-1 request
    IgnoreNext,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = KvClient::new(cli.endpoint, Duration::from_millis(cli.timeout_ms));

    let result = match cli.command {
        Commands::Get { key } => client.get(&key).await.map(|value| println!("{}", value)),
        Commands::Put { key, value } => client.put(&key, &value).await.map(|_| println!("Success")),
        Commands::Del { key } => client.del(&key).await.map(|_| println!("Success")),
        Commands::IgnoreNext => client.ignore_next().await.map(|_| println!("Success")),
    };

    if let Err(e) = result {
        eprintln!("✗ {}", e);
        std::process::exit(1);
    }
}
