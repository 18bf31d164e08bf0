//! Typed RPC client abstraction for storage peers.
//!
//! The pool and the handlers only talk to peers through [`NodeClient`];
//! connections are established by a [`Dialer`]. Transports register
//! themselves with a [`DialerRegistry`] under a URL scheme.

pub mod memory;

use crate::credentials::PrivateKey;
use crate::tokens::{BearerToken, SessionToken};
use crate::types::{
    Address, ContainerId, NetworkInfo, NodeInfo, ObjectHeader, ObjectId, ObjectInfo, OwnerId,
    SearchFilter,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use memory::{MemoryDialer, MemoryNetwork};

/// Object payload as a stream of chunks.
pub type PayloadStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Status codes carried by peer responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RpcCode::Cancelled => "Canceled",
            RpcCode::Unknown => "Unknown",
            RpcCode::InvalidArgument => "InvalidArgument",
            RpcCode::DeadlineExceeded => "DeadlineExceeded",
            RpcCode::NotFound => "NotFound",
            RpcCode::AlreadyExists => "AlreadyExists",
            RpcCode::PermissionDenied => "PermissionDenied",
            RpcCode::ResourceExhausted => "ResourceExhausted",
            RpcCode::FailedPrecondition => "FailedPrecondition",
            RpcCode::Aborted => "Aborted",
            RpcCode::OutOfRange => "OutOfRange",
            RpcCode::Unimplemented => "Unimplemented",
            RpcCode::Internal => "Internal",
            RpcCode::Unavailable => "Unavailable",
            RpcCode::DataLoss => "DataLoss",
            RpcCode::Unauthenticated => "Unauthenticated",
        };
        f.write_str(name)
    }
}

/// Status returned by a peer for a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rpc error: code = {code} desc = {message}")]
pub struct RpcStatus {
    pub code: RpcCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcCode::NotFound, message)
    }
}

/// Errors returned by [`NodeClient`] calls.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("peer responded with status")]
    Status(#[from] RpcStatus),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("deadline exceeded after {0:?}")]
    Timeout(Duration),

    #[error("payload stream failed")]
    Payload(#[source] std::io::Error),

    #[error("unsupported peer address: {0}")]
    UnsupportedAddress(String),

    #[error("client is closed")]
    Closed,
}

impl ClientError {
    /// Status carried by this error, if the peer returned one.
    pub fn status(&self) -> Option<&RpcStatus> {
        match self {
            ClientError::Status(status) => Some(status),
            _ => None,
        }
    }
}

/// Per-call credentials.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Gateway session with the peer.
    pub session: Option<SessionToken>,
    /// Client-supplied bearer token forwarded with the call.
    pub bearer: Option<BearerToken>,
}

/// Object header plus a stream over its payload.
pub struct ObjectReader {
    pub info: ObjectInfo,
    pub payload: PayloadStream,
}

impl fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// RPC surface of a single storage peer.
///
/// This trait is object-safe and is used as `Arc<dyn NodeClient>`.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Address this client is connected to.
    fn address(&self) -> &str;

    /// Lightweight liveness call.
    async fn endpoint_info(&self) -> Result<NodeInfo, ClientError>;

    /// Current epoch and epoch timing parameters.
    async fn network_info(&self) -> Result<NetworkInfo, ClientError>;

    /// Open a session for `owner` valid until `expiration_epoch`.
    async fn create_session(
        &self,
        owner: OwnerId,
        expiration_epoch: u64,
    ) -> Result<SessionToken, ClientError>;

    /// Store an object, streaming its payload.
    async fn put_object(
        &self,
        header: ObjectHeader,
        payload: PayloadStream,
        options: &CallOptions,
    ) -> Result<ObjectId, ClientError>;

    /// Fetch an object header and a stream over its payload.
    async fn get_object(
        &self,
        address: Address,
        options: &CallOptions,
    ) -> Result<ObjectReader, ClientError>;

    /// Search a container; IDs are returned in the peer's order.
    async fn search_objects(
        &self,
        container: ContainerId,
        filters: &[SearchFilter],
        options: &CallOptions,
    ) -> Result<Vec<ObjectId>, ClientError>;

    /// Release the connection. Further calls fail with [`ClientError::Closed`].
    async fn close(&self);
}

/// Connection parameters handed to a [`Dialer`].
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Key the client signs requests with.
    pub key: Arc<PrivateKey>,
    /// Deadline applied by the client to each call.
    pub request_timeout: Duration,
}

/// Establishes connections to peers.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        address: &str,
        options: &DialOptions,
    ) -> Result<Arc<dyn NodeClient>, ClientError>;
}

/// Routes dials to transports by the scheme of the peer address.
#[derive(Default)]
pub struct DialerRegistry {
    transports: HashMap<String, Arc<dyn Dialer>>,
}

impl DialerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport for `scheme` (without `://`).
    pub fn register(&mut self, scheme: &str, dialer: Arc<dyn Dialer>) {
        self.transports.insert(scheme.to_ascii_lowercase(), dialer);
    }

    pub fn with(mut self, scheme: &str, dialer: Arc<dyn Dialer>) -> Self {
        self.register(scheme, dialer);
        self
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.transports.keys().map(String::as_str)
    }
}

/// Scheme of a peer address, if it has one.
pub fn address_scheme(address: &str) -> Option<&str> {
    address.split_once("://").map(|(scheme, _)| scheme)
}

#[async_trait]
impl Dialer for DialerRegistry {
    async fn dial(
        &self,
        address: &str,
        options: &DialOptions,
    ) -> Result<Arc<dyn NodeClient>, ClientError> {
        let scheme = address_scheme(address)
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| ClientError::UnsupportedAddress(address.to_string()))?;
        let transport = self
            .transports
            .get(&scheme)
            .ok_or_else(|| ClientError::UnsupportedAddress(address.to_string()))?;
        transport.dial(address, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let status = RpcStatus::not_found("object not found");
        assert_eq!(
            status.to_string(),
            "rpc error: code = NotFound desc = object not found"
        );
    }

    #[test]
    fn test_status_is_error_source() {
        let err = ClientError::from(RpcStatus::not_found("gone"));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.downcast_ref::<RpcStatus>().is_some());
        assert_eq!(err.status().unwrap().code, RpcCode::NotFound);
    }

    #[test]
    fn test_address_scheme() {
        assert_eq!(address_scheme("memory://node1"), Some("memory"));
        assert_eq!(address_scheme("grpcs://st1.example:8082"), Some("grpcs"));
        assert_eq!(address_scheme("localhost:8080"), None);
    }

    #[tokio::test]
    async fn test_registry_rejects_unknown_scheme() {
        let registry = DialerRegistry::new();
        let options = DialOptions {
            key: Arc::new(PrivateKey::generate()),
            request_timeout: Duration::from_secs(1),
        };
        let err = registry.dial("grpc://peer:8080", &options).await.err().unwrap();
        assert!(matches!(err, ClientError::UnsupportedAddress(_)));
        let err = registry.dial("peer:8080", &options).await.err().unwrap();
        assert!(matches!(err, ClientError::UnsupportedAddress(_)));
    }
}
