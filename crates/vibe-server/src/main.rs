//! Vibe server binary.
//!
//! # Usage
//!
//! ```bash
//! # Development: self-signed cert, in-memory stores, any token accepted
//! vibe-server --bind 0.0.0.0:4433 --open-auth
//!
//! # Production: TLS cert, durable stores, provisioned tokens
//! vibe-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem \
//!     --store vibe.redb --token alice=tok-alice --token bob=tok-bob
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vibe_proto::UserId;
use vibe_server::{
    DriverConfig, Server, ServerError, ServerRuntimeConfig,
    auth::TokenAuthenticator,
    stores::{MemoryMessageStore, MemorySocialGraph, RedbStore},
};

/// Vibe presence and notification server
#[derive(Parser, Debug)]
#[command(name = "vibe-server")]
#[command(about = "Vibe presence and notification server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Path to the redb database file. In-memory stores when omitted.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Provision an auth token as user=token. Repeatable.
    #[arg(long, value_parser = parse_token)]
    token: Vec<(String, String)>,

    /// Accept any token, resolving it to an identity of the same name.
    /// Development only.
    #[arg(long)]
    open_auth: bool,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_token(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(user, token)| (user.to_string(), token.to_string()))
        .ok_or_else(|| format!("expected user=token, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Vibe server starting");
    tracing::info!("Binding to {}", args.bind);

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
        tracing::warn!("This is NOT suitable for production use!");
    }

    let auth = if args.open_auth {
        tracing::warn!("Open auth enabled - any token is accepted");
        TokenAuthenticator::permissive()
    } else {
        TokenAuthenticator::new()
    };
    for (user, token) in &args.token {
        auth.insert(token.clone(), UserId::new(user.clone()));
    }

    if !args.open_auth && args.token.is_empty() {
        tracing::warn!("No tokens provisioned - every handshake will be refused");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        driver: DriverConfig { max_connections: args.max_connections, ..Default::default() },
    };

    match args.store {
        Some(path) => {
            tracing::info!("Using redb store at {}", path.display());
            let store = RedbStore::open(&path)
                .map_err(|e| ServerError::Config(format!("failed to open store: {e}")))?;
            let server = Server::bind(config, auth, store.clone(), store)?;
            tracing::info!("Server listening on {}", server.local_addr()?);
            server.run().await?;
        },
        None => {
            tracing::info!("Using in-memory stores");
            let server = Server::bind(
                config,
                auth,
                MemorySocialGraph::new(),
                MemoryMessageStore::new(),
            )?;
            tracing::info!("Server listening on {}", server.local_addr()?);
            server.run().await?;
        },
    }

    Ok(())
}
