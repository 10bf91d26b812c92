//! nrelay-server: nostr relay.
//!
//! Accepts WebSocket connections, ingests signed events into an in-memory
//! store and streams them to matching subscriptions.

use clap::Parser;
use nrelay_core::RelayMessage;
use nrelay_server::config::RelayConfig;
use nrelay_server::connection::Connection;
use nrelay_server::relay::Relay;
use nrelay_server::store::MemoryStore;
use nrelay_server::transport::websocket;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info, warn};

/// nrelay-server: nostr relay
#[derive(Parser, Debug)]
#[command(name = "nrelay-server", version, about = "nostr relay")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.nrelay/config.toml")]
    config: String,

    /// Public relay URL; enables NIP-42 auth
    #[arg(long)]
    service_url: Option<String>,

    /// Maximum inbound message size in bytes
    #[arg(long)]
    max_message_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    // Load relay config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let config = match RelayConfig::load(
        Some(&config_path),
        cli.bind.as_deref(),
        cli.port,
        cli.service_url.as_deref(),
        cli.max_message_size,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let addr = match config.bind_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid listen address");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        auth = config.service_url.is_some(),
        "starting nrelay-server"
    );

    let announce_auth = config.announce_auth && config.service_url.is_some();
    let store = Arc::new(match config.max_events {
        Some(max) => MemoryStore::with_capacity(max),
        None => MemoryStore::new(),
    });
    let mut relay = Relay::new(config, store.clone()).with_counter(store);
    if announce_auth {
        relay = relay.on_connect(Arc::new(|conn: Arc<Connection>| {
            Box::pin(async move {
                let challenge = conn.challenge().to_string();
                conn.reply(&RelayMessage::Auth { challenge }).await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        }));
    }
    let relay = Arc::new(relay);

    let listener = match websocket::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = relay.clone().run(listener) => {
            if let Err(e) = result {
                error!(error = %e, "relay error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    relay.shutdown().await;
    info!("nrelay-server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
