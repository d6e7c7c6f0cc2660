//! Cipherpost relay binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate and in-memory keys (development)
//! cipherpost-server --bind 0.0.0.0:4433
//!
//! # Start with TLS certificate and a durable key directory (production)
//! cipherpost-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem \
//!     --directory /var/lib/cipherpost/keys.json
//! ```

use std::path::PathBuf;

use cipherpost_server::{Server, ServerRuntimeConfig};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Cipherpost relay server
#[derive(Parser, Debug)]
#[command(name = "cipherpost-server")]
#[command(about = "End-to-end encrypted store-and-forward relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<PathBuf>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Key directory file (JSON). Omit to keep keys in memory only.
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Cipherpost relay starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        directory_path: args.directory,
    };

    let server = Server::bind(config)?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            server.shutdown();
        },
    }

    Ok(())
}
