//! NeoFS HTTP gateway - serves storage network objects over plain HTTP

use clap::Parser;
use neofs_http_gw::api::handlers::AppState;
use neofs_http_gw::api::router;
use neofs_http_gw::client::{address_scheme, memory, DialerRegistry, MemoryDialer, MemoryNetwork};
use neofs_http_gw::config::{Config, PeerConfig};
use neofs_http_gw::credentials::PrivateKey;
use neofs_http_gw::metrics::Metrics;
use neofs_http_gw::pool::Pool;
use neofs_http_gw::resolver::{ResolverChain, StaticResolver};
use neofs_http_gw::{logging, tls};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Smallest read buffer hyper accepts.
const MIN_READ_BUFFER_SIZE: usize = 8192;

/// NeoFS HTTP gateway
#[derive(Parser, Debug)]
#[command(name = "neofs_http_gw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Private key: hex, WIF or "generated" (overrides config)
    #[arg(short, long, value_name = "KEY")]
    key: Option<String>,

    /// Storage peer, repeatable (replaces configured peers)
    #[arg(short, long = "peer", value_name = "ADDR[=WEIGHT]", value_parser = parse_peer)]
    peers: Vec<PeerConfig>,

    /// Container created on the in-memory peers, repeatable (replaces configured ones)
    #[arg(long = "container", value_name = "NAME")]
    containers: Vec<String>,

    /// Serve Prometheus metrics on /metrics/
    #[arg(long)]
    metrics: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_peer(raw: &str) -> Result<PeerConfig, String> {
    match raw.rsplit_once('=') {
        Some((address, weight)) => {
            let weight: f64 = weight
                .parse()
                .map_err(|_| format!("invalid peer weight: {}", weight))?;
            Ok(PeerConfig {
                address: address.to_string(),
                weight,
            })
        }
        None => Ok(PeerConfig {
            address: raw.to_string(),
            weight: 1.0,
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;

    // CLI overrides
    if let Some(ref addr) = cli.listen {
        config.listen_address = addr.parse()?;
    }
    if let Some(ref key) = cli.key {
        config.key = Some(key.clone());
    }
    if !cli.peers.is_empty() {
        config.peers = cli.peers.clone();
    }
    if !cli.containers.is_empty() {
        config.memory.containers = cli.containers.clone();
    }
    if cli.metrics {
        config.metrics = true;
    }

    logging::init(&config.logger, cli.verbose)?;
    config.validate()?;

    info!("Starting NeoFS HTTP gateway {}", env!("CARGO_PKG_VERSION"));
    info!("  Listen address: {}", config.listen_address);
    for peer in &config.peers {
        info!("  Peer: {} (weight {})", peer.address, peer.weight);
    }

    let key_input = config.key.clone().unwrap_or_default();
    if key_input.trim() == neofs_http_gw::credentials::GENERATED_KEY {
        warn!("  Using a freshly generated private key");
    }
    let key = Arc::new(PrivateKey::parse(&key_input)?);
    info!("  Owner: {}", key.owner_id());

    let network = MemoryNetwork::new();
    let mut memory_peers = 0;
    for peer in &config.peers {
        if address_scheme(&peer.address) == Some(memory::SCHEME) {
            network.add_node(&peer.address);
            memory_peers += 1;
        }
    }
    let mut memory_containers = Vec::with_capacity(config.memory.containers.len());
    if memory_peers > 0 {
        warn!("  In-memory storage peers configured: objects are not persisted");
        if config.memory.containers.is_empty() {
            warn!("  No in-memory containers configured: set memory.containers to accept uploads");
        }
        for name in &config.memory.containers {
            let cid = network.create_container(name);
            info!("  Container {}: {}", name, cid);
            memory_containers.push((name.clone(), cid));
        }
    } else if !config.memory.containers.is_empty() {
        warn!("  memory.containers ignored: no in-memory storage peers configured");
    }
    let dialer = DialerRegistry::new().with(memory::SCHEME, Arc::new(MemoryDialer::new(network)));

    let pool = Arc::new(Pool::new(&config.pool_config(), key, &dialer).await?);

    let mut resolver =
        ResolverChain::from_order(&config.resolve_order, &config.resolver_settings())?;
    if !memory_containers.is_empty() {
        resolver.prepend(Arc::new(StaticResolver::new(memory_containers)));
    }
    info!("  Resolvers: {:?}", resolver.names());

    let metrics = if config.metrics {
        info!("  Metrics: enabled on /metrics/");
        Some(Arc::new(Metrics::new()?))
    } else {
        None
    };

    let state = Arc::new(AppState {
        pool: pool.clone(),
        resolver,
        settings: config.handler_settings(),
        metrics,
    });
    let app = router(state, &config.router_options());

    let handle = axum_server::Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone(), config.web.write_timeout));

    let read_buffer_size = config.web.read_buffer_size.max(MIN_READ_BUFFER_SIZE);
    let served = if config.tls.enabled() {
        let rustls = tls::build_rustls_config(&config.tls).await?;
        info!("NeoFS HTTP gateway listening on https://{}", config.listen_address);
        let mut server = axum_server::bind_rustls(config.listen_address, rustls).handle(handle);
        server.http_builder().http1().max_buf_size(read_buffer_size);
        server.serve(app.into_make_service()).await
    } else {
        info!("NeoFS HTTP gateway listening on http://{}", config.listen_address);
        let mut server = axum_server::bind(config.listen_address).handle(handle);
        server.http_builder().http1().max_buf_size(read_buffer_size);
        server.serve(app.into_make_service()).await
    };

    pool.close().await;
    if let Err(err) = served {
        error!("server failed: {}", err);
        return Err(err.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal, then drain connections for at most `grace`.
async fn graceful_shutdown(handle: axum_server::Handle, grace: Duration) {
    shutdown_signal().await;
    handle.graceful_shutdown(Some(grace));
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        let peer = parse_peer("memory://node1=2.5").unwrap();
        assert_eq!(peer.address, "memory://node1");
        assert_eq!(peer.weight, 2.5);

        let peer = parse_peer("memory://node1").unwrap();
        assert_eq!(peer.address, "memory://node1");
        assert_eq!(peer.weight, 1.0);

        assert!(parse_peer("memory://node1=heavy").is_err());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "neofs_http_gw",
            "--peer",
            "memory://a=1",
            "--peer",
            "memory://b",
            "--metrics",
            "--key",
            "generated",
        ]);
        assert_eq!(cli.peers.len(), 2);
        assert!(cli.metrics);
        assert_eq!(cli.key.as_deref(), Some("generated"));
    }
}
