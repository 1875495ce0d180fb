//! AtlasMC CLI Client
//!
//! Command-line interface for poking at memcached servers.

use std::process::ExitCode;
use std::time::Duration;

use atlasmc::{Client, Config, Expiry};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// AtlasMC CLI
#[derive(Parser, Debug)]
#[command(name = "atlasmc-cli")]
#[command(about = "CLI for memcached servers (binary protocol)")]
#[command(version)]
struct Args {
    /// Server address(es), comma-separated
    #[arg(short, long, env = "MC_HOST", default_value = "127.0.0.1:11211")]
    server: String,

    /// Request timeout in milliseconds (0 = none)
    #[arg(short, long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Expiry in seconds (0 = never)
        #[arg(short, long, default_value_t = 0)]
        expiry: u32,

        /// Flag word stored with the value
        #[arg(short, long, default_value_t = 0)]
        flags: u32,
    },

    /// Increment a counter
    Incr {
        key: String,

        #[arg(default_value_t = 1)]
        delta: u64,

        /// Create the counter with this value if it is missing
        #[arg(long)]
        initial: Option<u64>,
    },

    /// Decrement a counter (stops at zero)
    Decr {
        key: String,

        #[arg(default_value_t = 1)]
        delta: u64,

        /// Create the counter with this value if it is missing
        #[arg(long)]
        initial: Option<u64>,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,atlasmc=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let timeout = (args.timeout_ms > 0).then(|| Duration::from_millis(args.timeout_ms));
    let client = match Config::builder()
        .server(&args.server)
        .request_timeout(timeout)
        .build()
        .and_then(Client::with_config)
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    let code = run(&client, args.command).await;
    client.close().await;
    code
}

async fn run(client: &Client, command: Commands) -> ExitCode {
    let outcome: atlasmc::Result<Option<String>> = match command {
        Commands::Get { key } => client
            .get_item(&key)
            .await
            .map(|item| item.map(|item| String::from_utf8_lossy(&item.value).into_owned())),
        Commands::Set {
            key,
            value,
            expiry,
            flags,
        } => client
            .set_with_flags(&key, value, flags, Expiry::from(expiry))
            .await
            .map(|()| Some("STORED".to_string())),
        Commands::Incr {
            key,
            delta,
            initial,
        } => match initial {
            Some(initial) => client
                .increment_with_initial(&key, delta, initial, Expiry::Never)
                .await
                .map(Some),
            None => client.increment(&key, delta).await,
        }
        .map(|v| v.map(|v| v.to_string())),
        Commands::Decr {
            key,
            delta,
            initial,
        } => match initial {
            Some(initial) => client
                .decrement_with_initial(&key, delta, initial, Expiry::Never)
                .await
                .map(Some),
            None => client.decrement(&key, delta).await,
        }
        .map(|v| v.map(|v| v.to_string())),
        Commands::Del { key } => client
            .delete(&key)
            .await
            .map(|deleted| deleted.then(|| "DELETED".to_string())),
    };

    match outcome {
        Ok(Some(output)) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Ok(None) => {
            eprintln!("{}", atlasmc::compat::NOT_FOUND);
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}
