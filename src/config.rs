//! Configuration for the HTTP gateway
//!
//! Values come from an optional TOML file, then `HTTP_GW_*` environment
//! variables (the key path upper-cased with dots replaced by underscores),
//! then command-line flags.

use crate::api::handlers::HandlerSettings;
use crate::api::RouterOptions;
use crate::pool::{Peer, PoolConfig};
use crate::resolver::{ResolverSettings, DEFAULT_NNS_ZONE, DNS_RESOLVER, NNS_RESOLVER};
use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "HTTP_GW_";

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to listen on
    pub listen_address: SocketAddr,

    /// Gateway private key: hex, WIF or `generated`
    pub key: Option<String>,

    /// Storage peers
    pub peers: Vec<PeerConfig>,

    /// Bound on dialing a peer
    #[serde(deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,

    /// Bound on each health check and gateway-issued call
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,

    /// Period of the pool rebalancer
    #[serde(deserialize_with = "deserialize_duration")]
    pub rebalance_timer: Duration,

    /// Expiration epoch of the per-peer session tokens
    pub session_expiration_epoch: u64,

    pub web: WebConfig,
    pub upload_header: UploadHeaderConfig,
    pub logger: LoggerConfig,

    /// Container name resolvers, tried in order
    pub resolve_order: Vec<String>,

    /// NNS JSON-RPC endpoint
    pub rpc_endpoint: Option<String>,
    pub nns: NnsConfig,

    /// Serve `/metrics/`
    pub metrics: bool,
    pub tls: TlsConfig,
    pub memory: MemoryConfig,
}

/// One storage peer
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PeerConfig {
    pub address: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// HTTP server tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub read_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub write_timeout: Duration,
    /// Stream upload bodies instead of buffering them
    pub stream_request_body: bool,
    pub max_request_body_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UploadHeaderConfig {
    /// Add a `Timestamp` attribute to uploads that lack one
    pub use_default_timestamp: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Console,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(LogFormat::Console),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum level; `RUST_LOG` overrides it
    pub level: String,
    pub format: LogFormat,
    /// Events at or above this level carry their source location
    pub trace_level: String,
    pub sampling: SamplingConfig,
}

/// Per-callsite log sampling; `initial = 0` disables it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub initial: u64,
    pub thereafter: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NnsConfig {
    pub contract_hash: Option<String>,
    pub zone: String,
}

/// TLS termination; enabled when both paths are set
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub certificate: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// In-memory storage backend used by `memory://` peers
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Containers created at startup, resolvable by these names
    pub containers: Vec<String>,
}

impl TlsConfig {
    pub fn enabled(&self) -> bool {
        self.certificate.is_some() && self.key.is_some()
    }
}

fn default_weight() -> f64 {
    1.0
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 8082)),
            key: None,
            peers: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            rebalance_timer: Duration::from_secs(15),
            session_expiration_epoch: u64::MAX,
            web: WebConfig::default(),
            upload_header: UploadHeaderConfig::default(),
            logger: LoggerConfig::default(),
            resolve_order: vec![NNS_RESOLVER.to_string(), DNS_RESOLVER.to_string()],
            rpc_endpoint: None,
            nns: NnsConfig::default(),
            metrics: false,
            tls: TlsConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 4096,
            write_buffer_size: 4096,
            read_timeout: Duration::from_secs(10 * 60),
            write_timeout: Duration::from_secs(5 * 60),
            stream_request_body: true,
            max_request_body_size: 4 * 1024 * 1024,
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Console,
            trace_level: "error".to_string(),
            sampling: SamplingConfig::default(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            initial: 1000,
            thereafter: 1000,
        }
    }
}

impl Default for NnsConfig {
    fn default() -> Self {
        Self {
            contract_hash: None,
            zone: DEFAULT_NNS_ZONE.to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" => Ok(true),
        "0" | "f" | "false" | "n" | "no" | "" => Ok(false),
        _ => Err(ConfigError::Env {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_env_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load the file named by `path` or `HTTP_GW_CONFIG` (defaults when
    /// neither is set), then apply environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(format!("{}CONFIG", ENV_PREFIX)).ok();
        let mut config = match path.or(env_path.as_deref()) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `HTTP_GW_*` overrides looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| {
            let key = format!("{}{}", ENV_PREFIX, suffix);
            var(&key).map(|value| (key, value))
        };

        if let Some((k, v)) = get("LISTEN_ADDRESS") {
            self.listen_address = parse_env(&k, &v)?;
        }
        if let Some((_, v)) = get("KEY") {
            self.key = Some(v);
        }
        if let Some((k, v)) = get("CONNECT_TIMEOUT") {
            self.connect_timeout = parse_env_duration(&k, &v)?;
        }
        if let Some((k, v)) = get("REQUEST_TIMEOUT") {
            self.request_timeout = parse_env_duration(&k, &v)?;
        }
        if let Some((k, v)) = get("REBALANCE_TIMER") {
            self.rebalance_timer = parse_env_duration(&k, &v)?;
        }
        if let Some((k, v)) = get("SESSION_EXPIRATION_EPOCH") {
            self.session_expiration_epoch = parse_env(&k, &v)?;
        }

        // Peers are scanned from index 0 until an address is missing.
        let mut peers = Vec::new();
        for i in 0.. {
            let Some((_, address)) = get(&format!("PEERS_{}_ADDRESS", i)) else {
                break;
            };
            let weight = match get(&format!("PEERS_{}_WEIGHT", i)) {
                Some((k, v)) => parse_env(&k, &v)?,
                None => default_weight(),
            };
            peers.push(PeerConfig { address, weight });
        }
        if !peers.is_empty() {
            self.peers = peers;
        }

        if let Some((k, v)) = get("WEB_READ_BUFFER_SIZE") {
            self.web.read_buffer_size = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = get("WEB_WRITE_BUFFER_SIZE") {
            self.web.write_buffer_size = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = get("WEB_READ_TIMEOUT") {
            self.web.read_timeout = parse_env_duration(&k, &v)?;
        }
        if let Some((k, v)) = get("WEB_WRITE_TIMEOUT") {
            self.web.write_timeout = parse_env_duration(&k, &v)?;
        }
        if let Some((k, v)) = get("WEB_STREAM_REQUEST_BODY") {
            self.web.stream_request_body = parse_env_bool(&k, &v)?;
        }
        if let Some((k, v)) = get("WEB_MAX_REQUEST_BODY_SIZE") {
            self.web.max_request_body_size = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = get("UPLOAD_HEADER_USE_DEFAULT_TIMESTAMP") {
            self.upload_header.use_default_timestamp = parse_env_bool(&k, &v)?;
        }

        if let Some((_, v)) = get("LOGGER_LEVEL") {
            self.logger.level = v;
        }
        if let Some((k, v)) = get("LOGGER_FORMAT") {
            self.logger.format = parse_env(&k, &v)?;
        }
        if let Some((_, v)) = get("LOGGER_TRACE_LEVEL") {
            self.logger.trace_level = v;
        }
        if let Some((k, v)) = get("LOGGER_SAMPLING_INITIAL") {
            self.logger.sampling.initial = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = get("LOGGER_SAMPLING_THEREAFTER") {
            self.logger.sampling.thereafter = parse_env(&k, &v)?;
        }

        if let Some((_, v)) = get("RESOLVE_ORDER") {
            self.resolve_order = split_list(&v);
        }
        if let Some((_, v)) = get("RPC_ENDPOINT") {
            self.rpc_endpoint = Some(v).filter(|v| !v.is_empty());
        }
        if let Some((_, v)) = get("NNS_CONTRACT_HASH") {
            self.nns.contract_hash = Some(v).filter(|v| !v.is_empty());
        }
        if let Some((_, v)) = get("NNS_ZONE") {
            self.nns.zone = v;
        }
        if let Some((k, v)) = get("METRICS") {
            self.metrics = parse_env_bool(&k, &v)?;
        }
        if let Some((_, v)) = get("TLS_CERTIFICATE") {
            self.tls.certificate = Some(PathBuf::from(v));
        }
        if let Some((_, v)) = get("TLS_KEY") {
            self.tls.key = Some(PathBuf::from(v));
        }
        if let Some((_, v)) = get("MEMORY_CONTAINERS") {
            self.memory.containers = split_list(&v);
        }

        Ok(())
    }

    /// Reject configurations the gateway cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peers.is_empty() {
            return Err(ConfigError::Invalid("no peers configured".to_string()));
        }
        let mut sum = 0.0;
        for peer in &self.peers {
            if peer.address.is_empty() {
                return Err(ConfigError::Invalid("peer with empty address".to_string()));
            }
            if !peer.weight.is_finite() || peer.weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "invalid weight {} of peer {}",
                    peer.weight, peer.address
                )));
            }
            sum += peer.weight;
        }
        if sum <= 0.0 {
            return Err(ConfigError::Invalid(
                "peer weights must have a positive sum".to_string(),
            ));
        }
        if self.rebalance_timer.is_zero() {
            return Err(ConfigError::Invalid(
                "rebalance_timer must be positive".to_string(),
            ));
        }
        if self.tls.certificate.is_some() != self.tls.key.is_some() {
            return Err(ConfigError::Invalid(
                "tls.certificate and tls.key must be set together".to_string(),
            ));
        }
        for (i, name) in self.memory.containers.iter().enumerate() {
            if name.is_empty() || self.memory.containers[..i].contains(name) {
                return Err(ConfigError::Invalid(format!(
                    "invalid memory container name {:?}",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            peers: self
                .peers
                .iter()
                .map(|p| Peer::new(p.address.clone(), p.weight))
                .collect(),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            rebalance_interval: self.rebalance_timer,
            session_expiration_epoch: self.session_expiration_epoch,
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            rpc_endpoint: self.rpc_endpoint.clone(),
            nns_contract_hash: self.nns.contract_hash.clone(),
            nns_zone: self.nns.zone.clone(),
            request_timeout: self.request_timeout,
        }
    }

    pub fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings {
            use_default_timestamp: self.upload_header.use_default_timestamp,
            stream_request_body: self.web.stream_request_body,
            max_request_body_size: self.web.max_request_body_size,
            write_buffer_size: self.web.write_buffer_size,
        }
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            metrics: self.metrics,
            read_timeout: self.web.read_timeout,
            write_timeout: self.web.write_timeout,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("invalid value {value:?} for {key}")]
    Env { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_address.port(), 8082);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.web.max_request_body_size, 4 * 1024 * 1024);
        assert!(config.web.stream_request_body);
        assert_eq!(config.resolve_order, vec!["nns", "dns"]);
        assert_eq!(config.logger.sampling.initial, 1000);
        assert_eq!(config.session_expiration_epoch, u64::MAX);
    }

    #[test]
    fn test_config_parse_toml() {
        let toml = r#"
            listen_address = "127.0.0.1:8080"
            key = "generated"
            rebalance_timer = "30s"
            metrics = true

            [[peers]]
            address = "memory://node1"
            weight = 2

            [[peers]]
            address = "memory://node2"

            [web]
            read_timeout = "1m"
            stream_request_body = false

            [upload_header]
            use_default_timestamp = true

            [logger]
            format = "json"

            [logger.sampling]
            initial = 0

            [memory]
            containers = ["photos", "videos"]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.listen_address.port(), 8080);
        assert_eq!(config.rebalance_timer, Duration::from_secs(30));
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.peers[0].weight, 2.0);
        assert_eq!(config.peers[1].weight, 1.0);
        assert_eq!(config.web.read_timeout, Duration::from_secs(60));
        assert_eq!(config.web.write_timeout, Duration::from_secs(300));
        assert!(!config.web.stream_request_body);
        assert!(config.upload_header.use_default_timestamp);
        assert_eq!(config.logger.format, LogFormat::Json);
        assert_eq!(config.logger.sampling.initial, 0);
        assert_eq!(config.logger.sampling.thereafter, 1000);
        assert!(config.metrics);
        assert_eq!(config.memory.containers, vec!["photos", "videos"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("HTTP_GW_LISTEN_ADDRESS", "127.0.0.1:9999"),
                ("HTTP_GW_PEERS_0_ADDRESS", "memory://a"),
                ("HTTP_GW_PEERS_0_WEIGHT", "3"),
                ("HTTP_GW_PEERS_1_ADDRESS", "memory://b"),
                ("HTTP_GW_PEERS_3_ADDRESS", "memory://skipped"),
                ("HTTP_GW_REQUEST_TIMEOUT", "2s"),
                ("HTTP_GW_WEB_STREAM_REQUEST_BODY", "false"),
                ("HTTP_GW_UPLOAD_HEADER_USE_DEFAULT_TIMESTAMP", "true"),
                ("HTTP_GW_LOGGER_LEVEL", "info"),
                ("HTTP_GW_RESOLVE_ORDER", "dns, nns"),
                ("HTTP_GW_MEMORY_CONTAINERS", "photos,videos"),
            ]))
            .unwrap();

        assert_eq!(config.listen_address.port(), 9999);
        assert_eq!(
            config.peers,
            vec![
                PeerConfig {
                    address: "memory://a".to_string(),
                    weight: 3.0
                },
                PeerConfig {
                    address: "memory://b".to_string(),
                    weight: 1.0
                },
            ]
        );
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert!(!config.web.stream_request_body);
        assert!(config.upload_header.use_default_timestamp);
        assert_eq!(config.logger.level, "info");
        assert_eq!(config.resolve_order, vec!["dns", "nns"]);
        assert_eq!(config.memory.containers, vec!["photos", "videos"]);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("HTTP_GW_CONNECT_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key, .. } if key == "HTTP_GW_CONNECT_TIMEOUT"));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.peers = vec![PeerConfig {
            address: "memory://a".to_string(),
            weight: 0.0,
        }];
        assert!(config.validate().is_err());

        config.peers[0].weight = f64::NAN;
        assert!(config.validate().is_err());

        config.peers[0].weight = 1.0;
        config.validate().unwrap();

        config.memory.containers = vec!["photos".to_string(), "photos".to_string()];
        assert!(config.validate().is_err());
        config.memory.containers.pop();
        config.validate().unwrap();

        config.tls.certificate = Some(PathBuf::from("cert.pem"));
        assert!(config.validate().is_err());
    }
}
