//! Core types shared by the gateway, the pool and the storage clients.

use base58::{FromBase58, ToBase58};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Prefix of every system attribute key.
pub const SYSTEM_ATTRIBUTE_PREFIX: &str = "__NEOFS__";

/// Well-known object attribute keys.
pub mod attribute_keys {
    pub const FILE_NAME: &str = "FileName";
    pub const FILE_PATH: &str = "FilePath";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const EXPIRATION_EPOCH: &str = "__NEOFS__EXPIRATION_EPOCH";
    pub const EXPIRATION_DURATION: &str = "__NEOFS__EXPIRATION_DURATION";
    pub const EXPIRATION_TIMESTAMP: &str = "__NEOFS__EXPIRATION_TIMESTAMP";
    pub const EXPIRATION_RFC3339: &str = "__NEOFS__EXPIRATION_RFC3339";
}

/// Identifier parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("invalid base58 encoding")]
    Encoding,

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("checksum mismatch")]
    Checksum,

    #[error("invalid address: expected <container>/<object>")]
    Address,
}

macro_rules! sha256_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const LEN: usize = 32;

            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Identifier derived from the SHA-256 of arbitrary content.
            pub fn digest(data: &[u8]) -> Self {
                Self(Sha256::digest(data).into())
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.from_base58().map_err(|_| IdError::Encoding)?;
                let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| IdError::Length {
                    expected: Self::LEN,
                    actual: raw.len(),
                })?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0.to_base58())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

sha256_id!(
    /// Container identifier: base58 of a 32-byte digest.
    ContainerId
);

sha256_id!(
    /// Object identifier: base58 of a 32-byte digest.
    ObjectId
);

/// Account identifier of an object owner or token issuer.
///
/// Layout: version byte, 20-byte script hash, 4-byte checksum.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId([u8; 25]);

impl OwnerId {
    pub const LEN: usize = 25;
    pub const VERSION: u8 = 0x35;

    /// Build an owner ID from a 20-byte script hash, appending the checksum.
    pub fn from_script_hash(hash: [u8; 20]) -> Self {
        let mut bytes = [0u8; 25];
        bytes[0] = Self::VERSION;
        bytes[1..21].copy_from_slice(&hash);
        let checksum = double_sha256(&bytes[..21]);
        bytes[21..].copy_from_slice(&checksum[..4]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 25] {
        &self.0
    }
}

pub(crate) fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

impl FromStr for OwnerId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.from_base58().map_err(|_| IdError::Encoding)?;
        let bytes: [u8; 25] = raw.as_slice().try_into().map_err(|_| IdError::Length {
            expected: Self::LEN,
            actual: raw.len(),
        })?;
        if bytes[0] != Self::VERSION || double_sha256(&bytes[..21])[..4] != bytes[21..] {
            return Err(IdError::Checksum);
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_base58())
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self)
    }
}

impl Serialize for OwnerId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OwnerId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Object address: container plus object, rendered as `container/object`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub container: ContainerId,
    pub object: ObjectId,
}

impl Address {
    pub fn new(container: ContainerId, object: ObjectId) -> Self {
        Self { container, object }
    }
}

impl FromStr for Address {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cid, oid) = s.split_once('/').ok_or(IdError::Address)?;
        Ok(Self {
            container: cid.parse()?,
            object: oid.parse()?,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.object)
    }
}

/// Single key/value object attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Header assembled by the gateway for a new object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    pub container: ContainerId,
    pub owner: OwnerId,
    pub attributes: Vec<Attribute>,
}

/// Header of a stored object as returned by the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub container: ContainerId,
    pub owner: OwnerId,
    pub payload_size: u64,
    pub attributes: Vec<Attribute>,
}

impl ObjectInfo {
    /// Value of the first attribute with the given key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// Network parameters needed to translate wall-clock time into epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    pub current_epoch: u64,
    pub ms_per_block: i64,
    pub blocks_per_epoch: u64,
}

impl NetworkInfo {
    /// Epoch duration in milliseconds.
    pub fn epoch_duration_ms(&self) -> i64 {
        self.ms_per_block.saturating_mul(self.blocks_per_epoch as i64)
    }
}

/// Liveness answer of a storage peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub address: String,
    pub version: String,
}

/// Object search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    /// Only root (user-visible, non-split) objects.
    Root,
    /// Attribute equals the given value.
    AttributeEquals { key: String, value: String },
}
