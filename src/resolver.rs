//! Container name resolution.
//!
//! Human-readable container names are turned into container IDs by an
//! ordered chain of backends. The first backend that succeeds wins; when all
//! of them fail, their errors are reported together in traversal order.

use crate::types::ContainerId;
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DNS_RESOLVER: &str = "dns";
pub const NNS_RESOLVER: &str = "nns";
pub const STATIC_RESOLVER: &str = "static";

/// Default NNS zone container names live in.
pub const DEFAULT_NNS_ZONE: &str = "container";

/// TXT record type code passed to the NNS `resolve` method.
const NNS_TXT_RECORD: i64 = 16;

/// Errors raised by a single resolver backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("lookup failed: {0}")]
    Lookup(String),

    #[error("no container id records for {0}")]
    NoRecord(String),

    #[error("rpc request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Errors raised by the resolver chain.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no resolvers configured")]
    NoResolvers,

    #[error("unknown resolver: {0}")]
    UnknownBackend(String),

    #[error("couldn't initialize {name} resolver: {reason}")]
    Init { name: String, reason: String },

    /// Every backend failed; one `name: error` entry per backend.
    #[error("{}", .0.join("; "))]
    Exhausted(Vec<String>),
}

/// One name-resolution backend.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Short backend name used in error messages and configuration.
    fn name(&self) -> &str;

    async fn resolve(&self, name: &str) -> Result<ContainerId, BackendError>;
}

/// Backend construction parameters.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// NNS JSON-RPC endpoint; the `nns` backend is skipped without it.
    pub rpc_endpoint: Option<String>,
    /// NNS contract hash; looked up from the chain when absent.
    pub nns_contract_hash: Option<String>,
    pub nns_zone: String,
    pub request_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            rpc_endpoint: None,
            nns_contract_hash: None,
            nns_zone: DEFAULT_NNS_ZONE.to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Ordered fallback chain of resolvers.
#[derive(Clone, Default)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl ResolverChain {
    /// Chain over the given backends; the first one is tried first.
    pub fn new(resolvers: Vec<Arc<dyn Resolver>>) -> Self {
        Self { resolvers }
    }

    /// Build the chain for a configured backend order.
    pub fn from_order(order: &[String], settings: &ResolverSettings) -> Result<Self, ResolveError> {
        let mut resolvers: Vec<Arc<dyn Resolver>> = Vec::with_capacity(order.len());
        for name in order {
            match name.as_str() {
                DNS_RESOLVER => resolvers.push(Arc::new(DnsResolver::from_system_config()?)),
                NNS_RESOLVER => match &settings.rpc_endpoint {
                    Some(endpoint) => resolvers.push(Arc::new(NnsResolver::new(
                        endpoint.clone(),
                        settings.nns_contract_hash.clone(),
                        settings.nns_zone.clone(),
                        settings.request_timeout,
                    )?)),
                    None => warn!("resolver nns won't be used since rpc_endpoint isn't provided"),
                },
                other => return Err(ResolveError::UnknownBackend(other.to_string())),
            }
        }
        Ok(Self::new(resolvers))
    }

    /// Put `resolver` in front of the configured backends.
    pub fn prepend(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolvers.insert(0, resolver);
    }

    pub fn names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Resolve `name`, falling through the chain on error.
    pub async fn resolve(&self, name: &str) -> Result<ContainerId, ResolveError> {
        if self.resolvers.is_empty() {
            return Err(ResolveError::NoResolvers);
        }
        let mut errors = Vec::new();
        for resolver in &self.resolvers {
            match resolver.resolve(name).await {
                Ok(cid) => {
                    debug!("resolved container {} via {}: {}", name, resolver.name(), cid);
                    return Ok(cid);
                }
                Err(err) => errors.push(format!("{}: {}", resolver.name(), err)),
            }
        }
        Err(ResolveError::Exhausted(errors))
    }
}

/// Fixed name table, filled with the containers the gateway creates itself.
pub struct StaticResolver {
    names: HashMap<String, ContainerId>,
}

impl StaticResolver {
    pub fn new(names: impl IntoIterator<Item = (String, ContainerId)>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    fn name(&self) -> &str {
        STATIC_RESOLVER
    }

    async fn resolve(&self, name: &str) -> Result<ContainerId, BackendError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| BackendError::NoRecord(name.to_string()))
    }
}

/// Resolves names through DNS TXT records.
pub struct DnsResolver {
    dns: hickory_resolver::TokioResolver,
}

impl DnsResolver {
    /// Resolver using the system DNS configuration.
    pub fn from_system_config() -> Result<Self, ResolveError> {
        let dns = hickory_resolver::Resolver::builder_tokio()
            .map_err(|e| ResolveError::Init {
                name: DNS_RESOLVER.to_string(),
                reason: e.to_string(),
            })?
            .build();
        Ok(Self { dns })
    }
}

#[async_trait]
impl Resolver for DnsResolver {
    fn name(&self) -> &str {
        DNS_RESOLVER
    }

    async fn resolve(&self, name: &str) -> Result<ContainerId, BackendError> {
        let lookup = self
            .dns
            .txt_lookup(name)
            .await
            .map_err(|e| BackendError::Lookup(e.to_string()))?;
        lookup
            .iter()
            .flat_map(|txt| txt.txt_data().iter())
            .filter_map(|data| std::str::from_utf8(data).ok())
            .find_map(|record| record.trim().parse::<ContainerId>().ok())
            .ok_or_else(|| BackendError::NoRecord(name.to_string()))
    }
}

/// Resolves names through the NNS contract over JSON-RPC.
pub struct NnsResolver {
    http: reqwest::Client,
    endpoint: String,
    contract_hash: tokio::sync::OnceCell<String>,
    zone: String,
}

impl NnsResolver {
    pub fn new(
        endpoint: String,
        contract_hash: Option<String>,
        zone: String,
        request_timeout: Duration,
    ) -> Result<Self, ResolveError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ResolveError::Init {
                name: NNS_RESOLVER.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            endpoint,
            contract_hash: tokio::sync::OnceCell::new_with(contract_hash),
            zone,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, BackendError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let mut response: Value = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(BackendError::Rpc(message.to_string()));
        }
        Ok(response["result"].take())
    }

    /// NNS is the first native-deployed contract, ID 1.
    async fn contract_hash(&self) -> Result<&str, BackendError> {
        let hash = self
            .contract_hash
            .get_or_try_init(|| async {
                let state = self.call("getcontractstate", json!([1])).await?;
                state["hash"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| BackendError::Rpc("contract state has no hash".to_string()))
            })
            .await?;
        Ok(hash.as_str())
    }
}

#[async_trait]
impl Resolver for NnsResolver {
    fn name(&self) -> &str {
        NNS_RESOLVER
    }

    async fn resolve(&self, name: &str) -> Result<ContainerId, BackendError> {
        let hash = self.contract_hash().await?;
        let domain = format!("{}.{}", name, self.zone);
        let result = self
            .call(
                "invokefunction",
                json!([
                    hash,
                    "resolve",
                    [
                        {"type": "String", "value": domain},
                        {"type": "Integer", "value": NNS_TXT_RECORD.to_string()},
                    ],
                ]),
            )
            .await?;
        parse_invoke_result(&result)?
            .iter()
            .find_map(|record| record.parse::<ContainerId>().ok())
            .ok_or(BackendError::NoRecord(domain))
    }
}

/// Extract string records from an `invokefunction` result stack.
fn parse_invoke_result(result: &Value) -> Result<Vec<String>, BackendError> {
    let state = result["state"].as_str().unwrap_or_default();
    if state != "HALT" {
        let reason = result["exception"].as_str().unwrap_or(state);
        return Err(BackendError::Rpc(format!("invocation faulted: {}", reason)));
    }
    let mut records = Vec::new();
    for item in result["stack"].as_array().into_iter().flatten() {
        collect_strings(item, &mut records);
    }
    Ok(records)
}

fn collect_strings(item: &Value, out: &mut Vec<String>) {
    match item["type"].as_str() {
        Some("Array") | Some("Struct") => {
            for inner in item["value"].as_array().into_iter().flatten() {
                collect_strings(inner, out);
            }
        }
        Some("ByteString") | Some("Buffer") => {
            let decoded = item["value"]
                .as_str()
                .and_then(|v| base64::engine::general_purpose::STANDARD.decode(v).ok())
                .and_then(|raw| String::from_utf8(raw).ok());
            if let Some(value) = decoded {
                out.push(value);
            }
        }
        _ => {}
    }
}
