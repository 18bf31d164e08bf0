//! Weighted, health-tracked pool of peer connections.
//!
//! One client and one session token per peer are established at startup and
//! kept for the pool's whole lifetime. A background rebalancer checks every
//! peer on a fixed interval and flips its health flag; request handlers draw
//! a healthy peer through the alias sampler.

use crate::client::{ClientError, DialOptions, Dialer, NodeClient};
use crate::credentials::PrivateKey;
use crate::sampler::{normalize, Sampler, SamplerError};
use crate::tokens::SessionToken;
use crate::types::{NetworkInfo, OwnerId};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors raised by the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no healthy peer")]
    NoHealthyPeer,

    #[error("no peers configured")]
    NoPeers,

    #[error("invalid peer weights")]
    Weights(#[from] SamplerError),

    #[error("failed to dial {address}")]
    Dial {
        address: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to create session on {address}")]
    Session {
        address: String,
        #[source]
        source: ClientError,
    },

    #[error("pool is closed")]
    Closed,
}

/// One storage peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub address: String,
    pub weight: f64,
}

impl Peer {
    pub fn new(address: impl Into<String>, weight: f64) -> Self {
        Self {
            address: address.into(),
            weight,
        }
    }
}

/// Pool construction parameters.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub peers: Vec<Peer>,
    /// Bound on establishing each connection.
    pub connect_timeout: Duration,
    /// Bound on each liveness check and each pool-issued call.
    pub request_timeout: Duration,
    /// Period of the health rebalancer.
    pub rebalance_interval: Duration,
    /// Expiration epoch of the per-peer session tokens.
    pub session_expiration_epoch: u64,
}

/// A usable client for one call, with the gateway's session on that peer.
#[derive(Clone)]
pub struct ConnectionArtifacts {
    pub client: Arc<dyn NodeClient>,
    pub session: SessionToken,
}

/// Snapshot of one peer's state.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerHealth {
    pub address: String,
    pub weight: f64,
    pub healthy: bool,
}

struct ClientPack {
    address: String,
    weight: f64,
    client: Arc<dyn NodeClient>,
    session: SessionToken,
}

struct Inner {
    /// Index-aligned with the sampler tables and `healthy`.
    packs: Vec<ClientPack>,
    healthy: RwLock<Vec<bool>>,
    sampler: Sampler,
    /// The generator is not shareable; draws are serialised through this lock.
    rng: Mutex<StdRng>,
    owner: OwnerId,
    request_timeout: Duration,
}

/// Connection pool over all configured peers.
pub struct Pool {
    inner: Arc<Inner>,
    shutdown: CancellationToken,
    rebalancer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Pool {
    /// Dial every peer, open a session on each and start the rebalancer.
    ///
    /// Any dial or session failure aborts construction: there is no partial
    /// pool. Connections opened before the failure are closed.
    pub async fn new(
        config: &PoolConfig,
        key: Arc<PrivateKey>,
        dialer: &dyn Dialer,
    ) -> Result<Self, PoolError> {
        if config.peers.is_empty() {
            return Err(PoolError::NoPeers);
        }
        let weights: Vec<f64> = config.peers.iter().map(|p| p.weight).collect();
        let normalized = normalize(&weights)?;
        let sampler = Sampler::new(&normalized)?;

        let owner = key.owner_id();
        let options = DialOptions {
            key,
            request_timeout: config.request_timeout,
        };

        let mut packs: Vec<ClientPack> = Vec::with_capacity(config.peers.len());
        for (peer, weight) in config.peers.iter().zip(normalized) {
            match Self::connect(peer, dialer, &options, config, owner).await {
                Ok((client, session)) => {
                    debug!("connected to peer {} (weight {:.3})", peer.address, weight);
                    packs.push(ClientPack {
                        address: peer.address.clone(),
                        weight,
                        client,
                        session,
                    });
                }
                Err(err) => {
                    for pack in &packs {
                        pack.client.close().await;
                    }
                    return Err(err);
                }
            }
        }

        let inner = Arc::new(Inner {
            healthy: RwLock::new(vec![true; packs.len()]),
            packs,
            sampler,
            rng: Mutex::new(StdRng::from_entropy()),
            owner,
            request_timeout: config.request_timeout,
        });

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_rebalancer(
            inner.clone(),
            config.rebalance_interval,
            shutdown.clone(),
        ));

        info!(
            "connection pool ready: {} peers, rebalance every {:?}",
            inner.packs.len(),
            config.rebalance_interval
        );

        Ok(Self {
            inner,
            shutdown,
            rebalancer: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }

    async fn connect(
        peer: &Peer,
        dialer: &dyn Dialer,
        options: &DialOptions,
        config: &PoolConfig,
        owner: OwnerId,
    ) -> Result<(Arc<dyn NodeClient>, SessionToken), PoolError> {
        let client = tokio::time::timeout(
            config.connect_timeout,
            dialer.dial(&peer.address, options),
        )
        .await
        .map_err(|_| ClientError::Timeout(config.connect_timeout))
        .and_then(|r| r)
        .map_err(|source| PoolError::Dial {
            address: peer.address.clone(),
            source,
        })?;

        let session = tokio::time::timeout(
            config.request_timeout,
            client.create_session(owner, config.session_expiration_epoch),
        )
        .await
        .map_err(|_| ClientError::Timeout(config.request_timeout))
        .and_then(|r| r);

        match session {
            Ok(session) => Ok((client, session)),
            Err(source) => {
                client.close().await;
                Err(PoolError::Session {
                    address: peer.address.clone(),
                    source,
                })
            }
        }
    }

    /// Pick a healthy peer for a single call.
    ///
    /// With one peer, that peer is returned iff healthy. Otherwise up to
    /// `3 * N` weighted draws are made; the first healthy draw wins.
    pub fn connection_artifacts(&self) -> Result<ConnectionArtifacts, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let inner = &self.inner;
        let healthy = inner.healthy.read();
        let n = inner.packs.len();

        let index = if n == 1 {
            healthy[0].then_some(0)
        } else {
            let mut rng = inner.rng.lock();
            (0..3 * n)
                .map(|_| inner.sampler.next(&mut *rng))
                .find(|&i| healthy[i])
        };

        let pack = &inner.packs[index.ok_or(PoolError::NoHealthyPeer)?];
        Ok(ConnectionArtifacts {
            client: pack.client.clone(),
            session: pack.session.clone(),
        })
    }

    /// Owner ID of the gateway's own key.
    pub fn owner(&self) -> OwnerId {
        self.inner.owner
    }

    /// Deadline applied to calls the gateway bounds itself.
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Current health of every peer, in configuration order.
    pub fn health(&self) -> Vec<PeerHealth> {
        let healthy = self.inner.healthy.read();
        self.inner
            .packs
            .iter()
            .zip(healthy.iter())
            .map(|(pack, &healthy)| PeerHealth {
                address: pack.address.clone(),
                weight: pack.weight,
                healthy,
            })
            .collect()
    }

    pub fn has_healthy_peer(&self) -> bool {
        self.inner.healthy.read().iter().any(|&h| h)
    }

    /// Fetch network parameters from a healthy peer, bounded by the request timeout.
    pub async fn network_info(&self) -> Result<NetworkInfo, PoolNetworkError> {
        let conn = self.connection_artifacts()?;
        let timeout = self.inner.request_timeout;
        tokio::time::timeout(timeout, conn.client.network_info())
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
            .map_err(PoolNetworkError::from)
    }

    /// Run one health-check round immediately.
    pub async fn rebalance(&self) {
        update_nodes_health(&self.inner).await;
    }

    /// Stop the rebalancer and close every connection. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let handle = self.rebalancer.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        for pack in &self.inner.packs {
            pack.client.close().await;
        }
        info!("connection pool closed");
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Failure of a pool-issued call.
#[derive(Debug, Error)]
pub enum PoolNetworkError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

async fn run_rebalancer(inner: Arc<Inner>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Peers start healthy; the first tick fires immediately and is skipped.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("rebalancer stopped");
                return;
            }
            _ = ticker.tick() => update_nodes_health(&inner).await,
        }
    }
}

async fn update_nodes_health(inner: &Inner) {
    let timeout = inner.request_timeout;
    let checks = inner.packs.iter().map(|pack| async move {
        match tokio::time::timeout(timeout, pack.client.endpoint_info()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ClientError::Timeout(timeout)),
        }
    });
    let results = futures::future::join_all(checks).await;

    for (i, result) in results.into_iter().enumerate() {
        let ok = result.is_ok();
        let was = {
            let mut healthy = inner.healthy.write();
            std::mem::replace(&mut healthy[i], ok)
        };
        let address = &inner.packs[i].address;
        match (was, result) {
            (true, Err(err)) => warn!("peer {} became unhealthy: {}", address, err),
            (false, Ok(())) => info!("peer {} is healthy again", address),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryDialer, MemoryNetwork};

    fn config(peers: &[(&str, f64)]) -> PoolConfig {
        PoolConfig {
            peers: peers.iter().map(|(a, w)| Peer::new(*a, *w)).collect(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_millis(200),
            rebalance_interval: Duration::from_secs(3600),
            session_expiration_epoch: u64::MAX,
        }
    }

    fn network(addresses: &[&str]) -> MemoryNetwork {
        let network = MemoryNetwork::new();
        for address in addresses {
            network.add_node(address);
        }
        network
    }

    async fn pool(network: &MemoryNetwork, peers: &[(&str, f64)]) -> Pool {
        Pool::new(
            &config(peers),
            Arc::new(PrivateKey::generate()),
            &MemoryDialer::new(network.clone()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_single_peer() {
        let net = network(&["memory://a"]);
        let pool = pool(&net, &[("memory://a", 1.0)]).await;
        let conn = pool.connection_artifacts().unwrap();
        assert_eq!(conn.client.address(), "memory://a");
        assert_eq!(conn.session.owner, pool.owner());

        net.set_available("memory://a", false);
        pool.rebalance().await;
        assert!(matches!(
            pool.connection_artifacts(),
            Err(PoolError::NoHealthyPeer)
        ));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_unhealthy_peer_is_never_selected() {
        let peers = [("memory://a", 1.0), ("memory://b", 1.0), ("memory://c", 2.0)];
        let net = network(&["memory://a", "memory://b", "memory://c"]);
        let pool = pool(&net, &peers).await;

        net.set_available("memory://b", false);
        pool.rebalance().await;

        for _ in 0..2_000 {
            let conn = pool.connection_artifacts().unwrap();
            assert_ne!(conn.client.address(), "memory://b");
        }
        let health = pool.health();
        assert!(health[0].healthy && !health[1].healthy && health[2].healthy);
        assert!((health[2].weight - 0.5).abs() < 1e-9);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_all_unhealthy() {
        let net = network(&["memory://a", "memory://b"]);
        let pool = pool(&net, &[("memory://a", 1.0), ("memory://b", 1.0)]).await;
        net.set_available("memory://a", false);
        net.set_available("memory://b", false);
        pool.rebalance().await;
        assert!(!pool.has_healthy_peer());
        assert!(matches!(
            pool.connection_artifacts(),
            Err(PoolError::NoHealthyPeer)
        ));

        net.set_available("memory://a", true);
        pool.rebalance().await;
        assert_eq!(
            pool.connection_artifacts().unwrap().client.address(),
            "memory://a"
        );
        pool.close().await;
    }

    #[tokio::test]
    async fn test_slow_health_check_marks_unhealthy() {
        let net = network(&["memory://a", "memory://b"]);
        let pool = pool(&net, &[("memory://a", 1.0), ("memory://b", 1.0)]).await;
        net.set_latency("memory://a", Duration::from_secs(5));
        pool.rebalance().await;
        let health = pool.health();
        assert!(!health[0].healthy);
        assert!(health[1].healthy);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_init_fails_on_unreachable_peer() {
        let net = network(&["memory://a"]);
        let result = Pool::new(
            &config(&[("memory://a", 1.0), ("memory://missing", 1.0)]),
            Arc::new(PrivateKey::generate()),
            &MemoryDialer::new(net.clone()),
        )
        .await;
        assert!(matches!(result, Err(PoolError::Dial { .. })));
        // The connection opened before the failure is released.
        assert_eq!(net.closes("memory://a"), 1);
    }

    #[tokio::test]
    async fn test_init_rejects_bad_weights() {
        let net = network(&["memory://a"]);
        let dialer = MemoryDialer::new(net);
        let key = Arc::new(PrivateKey::generate());
        assert!(matches!(
            Pool::new(&config(&[]), key.clone(), &dialer).await,
            Err(PoolError::NoPeers)
        ));
        assert!(matches!(
            Pool::new(&config(&[("memory://a", 0.0)]), key, &dialer).await,
            Err(PoolError::Weights(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let net = network(&["memory://a", "memory://b"]);
        let pool = pool(&net, &[("memory://a", 1.0), ("memory://b", 1.0)]).await;
        pool.close().await;
        pool.close().await;
        assert_eq!(net.closes("memory://a"), 1);
        assert_eq!(net.closes("memory://b"), 1);
        assert!(matches!(pool.connection_artifacts(), Err(PoolError::Closed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_selection() {
        let net = network(&["memory://a", "memory://b", "memory://c"]);
        let pool = Arc::new(
            pool(
                &net,
                &[("memory://a", 1.0), ("memory://b", 1.0), ("memory://c", 1.0)],
            )
            .await,
        );
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    for _ in 0..1_000 {
                        pool.connection_artifacts().unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        pool.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebalancer_runs_periodically() {
        let net = network(&["memory://a", "memory://b"]);
        let mut cfg = config(&[("memory://a", 1.0), ("memory://b", 1.0)]);
        cfg.rebalance_interval = Duration::from_secs(10);
        let pool = Pool::new(
            &cfg,
            Arc::new(PrivateKey::generate()),
            &MemoryDialer::new(net.clone()),
        )
        .await
        .unwrap();

        net.set_available("memory://a", false);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!pool.health()[0].healthy);

        net.set_available("memory://a", true);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(pool.health()[0].healthy);
        pool.close().await;
    }
}
