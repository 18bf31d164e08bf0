//! Shared test infrastructure for integration tests
//!
//! Provides TestServer (the gateway router served in-process on an ephemeral
//! port, backed by an in-memory storage network), a binary-spawning
//! GatewayProcess, and multipart/bearer helpers.

#![allow(dead_code)]

use neofs_http_gw::api::handlers::{AppState, HandlerSettings};
use neofs_http_gw::api::{router, RouterOptions};
use neofs_http_gw::client::{MemoryDialer, MemoryNetwork};
use neofs_http_gw::credentials::PrivateKey;
use neofs_http_gw::metrics::Metrics;
use neofs_http_gw::pool::{Peer, Pool, PoolConfig};
use neofs_http_gw::resolver::{ResolverChain, StaticResolver};
use neofs_http_gw::tokens::BearerToken;
use neofs_http_gw::types::{ContainerId, OwnerId};
use std::net::SocketAddr;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Port counter for spawned gateway binaries.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(19300);

/// Name of the container every TestServer starts with.
pub const TEST_CONTAINER: &str = "test-container";

/// Builder for [`TestServer`].
pub struct TestServerBuilder {
    peers: Vec<(String, f64)>,
    settings: HandlerSettings,
    options: RouterOptions,
    container_aliases: Vec<String>,
}

impl TestServerBuilder {
    /// Replace the default single peer.
    pub fn peers(mut self, peers: &[(&str, f64)]) -> Self {
        self.peers = peers
            .iter()
            .map(|(address, weight)| (address.to_string(), *weight))
            .collect();
        self
    }

    pub fn settings(mut self, settings: HandlerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn metrics(mut self) -> Self {
        self.options.metrics = true;
        self
    }

    /// Make the test container resolvable under `name`.
    pub fn container_alias(mut self, name: &str) -> Self {
        self.container_aliases.push(name.to_string());
        self
    }

    pub async fn start(self) -> TestServer {
        let network = MemoryNetwork::new();
        for (address, _) in &self.peers {
            network.add_node(address);
        }
        let container = network.create_container(TEST_CONTAINER);

        let key = Arc::new(PrivateKey::generate());
        let owner = key.owner_id();
        let config = PoolConfig {
            peers: self
                .peers
                .iter()
                .map(|(address, weight)| Peer::new(address.clone(), *weight))
                .collect(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            rebalance_interval: Duration::from_secs(60),
            session_expiration_epoch: u64::MAX,
        };
        let pool = Arc::new(
            Pool::new(&config, key, &MemoryDialer::new(network.clone()))
                .await
                .expect("Failed to build pool"),
        );

        let mut resolver = ResolverChain::default();
        if !self.container_aliases.is_empty() {
            let aliases = self
                .container_aliases
                .iter()
                .map(|name| (name.clone(), container));
            resolver.prepend(Arc::new(StaticResolver::new(aliases)));
        }

        let metrics = if self.options.metrics {
            Some(Arc::new(Metrics::new().expect("Failed to build metrics")))
        } else {
            None
        };

        let state = Arc::new(AppState {
            pool: pool.clone(),
            resolver,
            settings: self.settings,
            metrics,
        });
        let app = router(state, &self.options);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Failed to read local address");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        TestServer {
            addr,
            network,
            container,
            owner,
            pool,
            task,
        }
    }
}

/// Gateway router served in-process
pub struct TestServer {
    addr: SocketAddr,
    network: MemoryNetwork,
    container: ContainerId,
    owner: OwnerId,
    pool: Arc<Pool>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Start with one peer and default settings.
    pub async fn start() -> Self {
        Self::builder().start().await
    }

    pub fn builder() -> TestServerBuilder {
        TestServerBuilder {
            peers: vec![("memory://node1".to_string(), 1.0)],
            settings: HandlerSettings::default(),
            options: RouterOptions::default(),
            container_aliases: Vec::new(),
        }
    }

    /// Get the HTTP endpoint URL
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Owner ID derived from the gateway key.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Gateway binary spawned as a child process
pub struct GatewayProcess {
    process: Child,
    port: u16,
}

impl GatewayProcess {
    /// Spawn the gateway with `args` appended to a listen address and key.
    pub async fn spawn(args: &[&str]) -> Self {
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let listen = format!("127.0.0.1:{}", port);

        let process = Command::new(env!("CARGO_BIN_EXE_neofs_http_gw"))
            .args(["--listen", &listen, "--key", "generated"])
            .args(args)
            .env("RUST_LOG", "neofs_http_gw=warn")
            .env("HTTP_GW_RESOLVE_ORDER", "")
            .spawn()
            .expect("Failed to start gateway");

        let mut gateway = Self { process, port };
        gateway.wait_ready().await;
        gateway
    }

    async fn wait_ready(&mut self) {
        let addr = format!("127.0.0.1:{}", self.port);
        for _ in 0..150 {
            if std::net::TcpStream::connect(&addr).is_ok() {
                return;
            }

            if let Ok(Some(status)) = self.process.try_wait() {
                panic!("Gateway exited before becoming ready: {}", status);
            }

            sleep(Duration::from_millis(100)).await;
        }

        let _ = self.process.kill();
        panic!("Timed out waiting for gateway on {}", addr);
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl Drop for GatewayProcess {
    fn drop(&mut self) {
        let _ = self.process.kill();
    }
}

// === Shared HTTP helpers (reqwest) ===

/// Multipart form with a single file part named `file`.
pub fn file_form(file_name: &str, content: impl Into<Vec<u8>>) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(content.into()).file_name(file_name.to_string());
    reqwest::multipart::Form::new().part("file", part)
}

/// Upload a file and return the object ID from the JSON response.
pub async fn upload_file(
    client: &reqwest::Client,
    endpoint: &str,
    container: &str,
    file_name: &str,
    content: impl Into<Vec<u8>>,
) -> String {
    let url = format!("{}/upload/{}", endpoint, container);
    let resp = client
        .post(&url)
        .multipart(file_form(file_name, content))
        .send()
        .await
        .expect("upload failed");
    assert_eq!(resp.status(), 200, "upload of {} failed", file_name);
    let body: serde_json::Value = resp.json().await.expect("upload response is not JSON");
    body["object_id"]
        .as_str()
        .expect("object_id missing")
        .to_string()
}

/// GET a URL and return status, headers and body.
pub async fn get(
    client: &reqwest::Client,
    url: &str,
) -> (reqwest::StatusCode, reqwest::header::HeaderMap, Vec<u8>) {
    let resp = client.get(url).send().await.expect("GET failed");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.bytes().await.expect("body read failed").to_vec();
    (status, headers, body)
}

/// Bearer token issued by a fresh random account.
pub fn bearer_token() -> BearerToken {
    BearerToken {
        issuer: PrivateKey::generate().owner_id(),
        container: None,
        operations: Vec::new(),
        expiration_epoch: 100,
        signature: String::new(),
    }
}

/// Client that does not follow redirects.
pub fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("Failed to build client")
}
