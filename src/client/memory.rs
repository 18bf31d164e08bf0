//! In-process storage network.
//!
//! Every peer of a [`MemoryNetwork`] shares one object store, the way a real
//! network replicates objects between its nodes. Peers can be made
//! unavailable or slow to exercise the pool's health tracking. Addresses use
//! the `memory://<name>` scheme.

use super::{
    CallOptions, ClientError, DialOptions, Dialer, NodeClient, ObjectReader, PayloadStream,
    RpcStatus,
};
use crate::tokens::SessionToken;
use crate::types::{
    Address, Attribute, ContainerId, NetworkInfo, NodeInfo, ObjectHeader, ObjectId, ObjectInfo,
    OwnerId, SearchFilter,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// URL scheme served by [`MemoryDialer`].
pub const SCHEME: &str = "memory";

/// Payload chunk size used when streaming objects back.
const CHUNK_SIZE: usize = 64 * 1024;

struct StoredObject {
    info: ObjectInfo,
    payload: Bytes,
}

#[derive(Default)]
struct NodeState {
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    calls: AtomicU64,
    closes: AtomicU64,
}

struct NetworkState {
    containers: RwLock<HashSet<ContainerId>>,
    objects: RwLock<Vec<StoredObject>>,
    nodes: RwLock<HashMap<String, Arc<NodeState>>>,
    network_info: RwLock<NetworkInfo>,
    sequence: AtomicU64,
}

/// Shared state of an in-process storage network.
#[derive(Clone)]
pub struct MemoryNetwork {
    state: Arc<NetworkState>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            state: Arc::new(NetworkState {
                containers: RwLock::new(HashSet::new()),
                objects: RwLock::new(Vec::new()),
                nodes: RwLock::new(HashMap::new()),
                network_info: RwLock::new(NetworkInfo {
                    current_epoch: 1,
                    ms_per_block: 1000,
                    blocks_per_epoch: 240,
                }),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Register a peer under `address` (`memory://<name>`).
    pub fn add_node(&self, address: &str) {
        self.state
            .nodes
            .write()
            .entry(address.to_string())
            .or_default();
    }

    /// Create a new empty container.
    pub fn create_container(&self, name: &str) -> ContainerId {
        let seq = self.state.sequence.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(seq.to_le_bytes());
        let id = ContainerId::from_bytes(hasher.finalize().into());
        self.state.containers.write().insert(id);
        id
    }

    /// Mark a peer as reachable or not.
    pub fn set_available(&self, address: &str, available: bool) {
        if let Some(node) = self.node(address) {
            node.unavailable.store(!available, Ordering::SeqCst);
        }
    }

    /// Add artificial latency to every call served by a peer.
    pub fn set_latency(&self, address: &str, latency: Duration) {
        if let Some(node) = self.node(address) {
            node.latency_ms
                .store(latency.as_millis() as u64, Ordering::SeqCst);
        }
    }

    pub fn set_network_info(&self, info: NetworkInfo) {
        *self.state.network_info.write() = info;
    }

    /// Number of calls a peer has served (liveness checks included).
    pub fn calls(&self, address: &str) -> u64 {
        self.node(address)
            .map(|n| n.calls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of times clients of a peer were closed.
    pub fn closes(&self, address: &str) -> u64 {
        self.node(address)
            .map(|n| n.closes.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Store an object directly, bypassing any client.
    pub fn seed_object(
        &self,
        container: ContainerId,
        owner: OwnerId,
        attributes: Vec<Attribute>,
        payload: impl Into<Bytes>,
    ) -> ObjectId {
        self.store(
            ObjectHeader {
                container,
                owner,
                attributes,
            },
            payload.into(),
        )
    }

    fn node(&self, address: &str) -> Option<Arc<NodeState>> {
        self.state.nodes.read().get(address).cloned()
    }

    fn store(&self, header: ObjectHeader, payload: Bytes) -> ObjectId {
        let seq = self.state.sequence.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(header.container.as_bytes());
        hasher.update(header.owner.as_bytes());
        for attr in &header.attributes {
            hasher.update(attr.key.as_bytes());
            hasher.update([0]);
            hasher.update(attr.value.as_bytes());
            hasher.update([0]);
        }
        hasher.update(Sha256::digest(&payload));
        hasher.update(seq.to_le_bytes());
        let id = ObjectId::from_bytes(hasher.finalize().into());

        self.state.objects.write().push(StoredObject {
            info: ObjectInfo {
                id,
                container: header.container,
                owner: header.owner,
                payload_size: payload.len() as u64,
                attributes: header.attributes,
            },
            payload,
        });
        id
    }
}

/// Dials peers of one [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryDialer {
    network: MemoryNetwork,
}

impl MemoryDialer {
    pub fn new(network: MemoryNetwork) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(
        &self,
        address: &str,
        options: &DialOptions,
    ) -> Result<Arc<dyn NodeClient>, ClientError> {
        let node = self
            .network
            .node(address)
            .ok_or_else(|| ClientError::Transport(format!("connection refused: {}", address)))?;
        if node.unavailable.load(Ordering::SeqCst) {
            return Err(ClientError::Transport(format!(
                "connection refused: {}",
                address
            )));
        }
        debug!("memory transport connected to {}", address);
        Ok(Arc::new(MemoryClient {
            address: address.to_string(),
            network: self.network.clone(),
            node,
            owner: options.key.owner_id(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryClient {
    address: String,
    network: MemoryNetwork,
    node: Arc<NodeState>,
    owner: OwnerId,
    closed: AtomicBool,
}

impl MemoryClient {
    /// Common preamble of every call: closed check, latency, availability.
    async fn enter(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        self.node.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.node.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.node.unavailable.load(Ordering::SeqCst) {
            return Err(ClientError::Transport(format!(
                "{} is unavailable",
                self.address
            )));
        }
        Ok(())
    }

    fn check_container(&self, container: &ContainerId) -> Result<(), ClientError> {
        if self.network.state.containers.read().contains(container) {
            Ok(())
        } else {
            Err(RpcStatus::not_found("container not found").into())
        }
    }
}

#[async_trait]
impl NodeClient for MemoryClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn endpoint_info(&self) -> Result<NodeInfo, ClientError> {
        self.enter().await?;
        Ok(NodeInfo {
            address: self.address.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    async fn network_info(&self) -> Result<NetworkInfo, ClientError> {
        self.enter().await?;
        Ok(*self.network.state.network_info.read())
    }

    async fn create_session(
        &self,
        owner: OwnerId,
        expiration_epoch: u64,
    ) -> Result<SessionToken, ClientError> {
        self.enter().await?;
        let seq = self.network.state.sequence.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(self.address.as_bytes());
        hasher.update(owner.as_bytes());
        hasher.update(seq.to_le_bytes());
        Ok(SessionToken {
            id: hex::encode(&hasher.finalize()[..16]),
            owner,
            expiration_epoch,
        })
    }

    async fn put_object(
        &self,
        header: ObjectHeader,
        mut payload: PayloadStream,
        options: &CallOptions,
    ) -> Result<ObjectId, ClientError> {
        self.enter().await?;
        self.check_container(&header.container)?;
        if options.session.is_none() && options.bearer.is_none() {
            debug!("anonymous put from {}", self.owner);
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = payload.next().await {
            buffer.extend_from_slice(&chunk.map_err(ClientError::Payload)?);
        }
        Ok(self.network.store(header, buffer.freeze()))
    }

    async fn get_object(
        &self,
        address: Address,
        _options: &CallOptions,
    ) -> Result<ObjectReader, ClientError> {
        self.enter().await?;
        self.check_container(&address.container)?;
        let objects = self.network.state.objects.read();
        let stored = objects
            .iter()
            .find(|o| o.info.container == address.container && o.info.id == address.object)
            .ok_or_else(|| RpcStatus::not_found("object not found"))?;

        let payload = stored.payload.clone();
        let chunks: Vec<Result<Bytes, std::io::Error>> = (0..payload.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(payload.slice(start..(start + CHUNK_SIZE).min(payload.len()))))
            .collect();

        Ok(ObjectReader {
            info: stored.info.clone(),
            payload: futures::stream::iter(chunks).boxed(),
        })
    }

    async fn search_objects(
        &self,
        container: ContainerId,
        filters: &[SearchFilter],
        _options: &CallOptions,
    ) -> Result<Vec<ObjectId>, ClientError> {
        self.enter().await?;
        self.check_container(&container)?;
        let objects = self.network.state.objects.read();
        Ok(objects
            .iter()
            .filter(|o| o.info.container == container)
            .filter(|o| {
                filters.iter().all(|f| match f {
                    SearchFilter::Root => true,
                    SearchFilter::AttributeEquals { key, value } => {
                        o.info.attribute(key) == Some(value.as_str())
                    }
                })
            })
            .map(|o| o.info.id)
            .collect())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.node.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::PrivateKey;

    fn options() -> DialOptions {
        DialOptions {
            key: Arc::new(PrivateKey::generate()),
            request_timeout: Duration::from_secs(1),
        }
    }

    async fn collect(mut payload: PayloadStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = payload.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let network = MemoryNetwork::new();
        network.add_node("memory://a");
        let cid = network.create_container("test");
        let client = MemoryDialer::new(network.clone())
            .dial("memory://a", &options())
            .await
            .unwrap();

        let owner = OwnerId::from_script_hash([1; 20]);
        let payload: PayloadStream =
            futures::stream::iter(vec![Ok(Bytes::from("hello ")), Ok(Bytes::from("world"))])
                .boxed();
        let header = ObjectHeader {
            container: cid,
            owner,
            attributes: vec![Attribute::new("FileName", "hello.txt")],
        };
        let oid = client
            .put_object(header, payload, &CallOptions::default())
            .await
            .unwrap();

        let reader = client
            .get_object(Address::new(cid, oid), &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(reader.info.payload_size, 11);
        assert_eq!(reader.info.owner, owner);
        assert_eq!(reader.info.attribute("FileName"), Some("hello.txt"));
        assert_eq!(collect(reader.payload).await, b"hello world");
    }

    #[tokio::test]
    async fn test_large_payload_is_chunked() {
        let network = MemoryNetwork::new();
        network.add_node("memory://a");
        let cid = network.create_container("test");
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        let oid = network.seed_object(cid, OwnerId::from_script_hash([0; 20]), vec![], data.clone());
        let client = MemoryDialer::new(network)
            .dial("memory://a", &options())
            .await
            .unwrap();
        let reader = client
            .get_object(Address::new(cid, oid), &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(collect(reader.payload).await, data);
    }

    #[tokio::test]
    async fn test_not_found_statuses() {
        let network = MemoryNetwork::new();
        network.add_node("memory://a");
        let client = MemoryDialer::new(network.clone())
            .dial("memory://a", &options())
            .await
            .unwrap();

        let missing = Address::new(ContainerId::digest(b"x"), ObjectId::digest(b"y"));
        let err = client
            .get_object(missing, &CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status().unwrap().message, "container not found");

        let cid = network.create_container("c");
        let err = client
            .get_object(Address::new(cid, ObjectId::digest(b"y")), &CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status().unwrap().message, "object not found");
    }

    #[tokio::test]
    async fn test_search_by_attribute_keeps_insertion_order() {
        let network = MemoryNetwork::new();
        network.add_node("memory://a");
        let cid = network.create_container("c");
        let owner = OwnerId::from_script_hash([0; 20]);
        let first = network.seed_object(cid, owner, vec![Attribute::new("K", "v")], "1");
        network.seed_object(cid, owner, vec![Attribute::new("K", "other")], "2");
        let third = network.seed_object(cid, owner, vec![Attribute::new("K", "v")], "3");

        let client = MemoryDialer::new(network)
            .dial("memory://a", &options())
            .await
            .unwrap();
        let filters = [
            SearchFilter::Root,
            SearchFilter::AttributeEquals {
                key: "K".to_string(),
                value: "v".to_string(),
            },
        ];
        let ids = client
            .search_objects(cid, &filters, &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(ids, vec![first, third]);
    }

    #[tokio::test]
    async fn test_unavailable_node() {
        let network = MemoryNetwork::new();
        network.add_node("memory://a");
        let dialer = MemoryDialer::new(network.clone());
        let client = dialer.dial("memory://a", &options()).await.unwrap();

        network.set_available("memory://a", false);
        assert!(matches!(
            client.endpoint_info().await,
            Err(ClientError::Transport(_))
        ));
        assert!(dialer.dial("memory://a", &options()).await.is_err());
        assert!(dialer.dial("memory://unknown", &options()).await.is_err());

        network.set_available("memory://a", true);
        assert!(client.endpoint_info().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let network = MemoryNetwork::new();
        network.add_node("memory://a");
        let client = MemoryDialer::new(network.clone())
            .dial("memory://a", &options())
            .await
            .unwrap();
        client.close().await;
        client.close().await;
        assert_eq!(network.closes("memory://a"), 1);
        assert!(matches!(client.endpoint_info().await, Err(ClientError::Closed)));
    }
}
