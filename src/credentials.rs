//! Gateway identity: private key loading and owner-ID derivation.
//!
//! Signing itself is performed by the transport client; the gateway only
//! needs the key to hand to the dialer and the owner ID it derives.

use crate::types::{double_sha256, OwnerId};
use base58::FromBase58;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Special key value that asks for a fresh random key.
pub const GENERATED_KEY: &str = "generated";

/// Errors raised while loading the gateway key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("no private key configured")]
    Missing,

    #[error("invalid hex private key: {0}")]
    Hex(String),

    #[error("invalid WIF private key: {0}")]
    Wif(&'static str),

    #[error("private key must be 32 bytes, got {0}")]
    Length(usize),
}

/// Gateway private key. The secret is wiped from memory on drop.
#[derive(Clone)]
pub struct PrivateKey {
    secret: Zeroizing<[u8; 32]>,
}

impl PrivateKey {
    const WIF_VERSION: u8 = 0x80;
    const WIF_COMPRESSED: u8 = 0x01;

    /// Parse a key given as `generated`, 64 hex characters or WIF.
    pub fn parse(input: &str) -> Result<Self, CredentialsError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CredentialsError::Missing);
        }
        if input == GENERATED_KEY {
            return Ok(Self::generate());
        }
        if input.len() == 64 && input.bytes().all(|b| b.is_ascii_hexdigit()) {
            let raw = Zeroizing::new(
                hex::decode(input).map_err(|e| CredentialsError::Hex(e.to_string()))?,
            );
            return Self::from_slice(&raw);
        }
        Self::from_wif(input)
    }

    /// Fresh random key.
    pub fn generate() -> Self {
        let mut secret = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut secret[..]);
        Self { secret }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CredentialsError> {
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CredentialsError::Length(bytes.len()))?;
        Ok(Self {
            secret: Zeroizing::new(secret),
        })
    }

    /// Decode a compressed-key WIF string (version, key, flag, checksum).
    fn from_wif(input: &str) -> Result<Self, CredentialsError> {
        let raw = Zeroizing::new(
            input
                .from_base58()
                .map_err(|_| CredentialsError::Wif("not base58"))?,
        );
        if raw.len() != 38 {
            return Err(CredentialsError::Wif("unexpected length"));
        }
        if raw[0] != Self::WIF_VERSION || raw[33] != Self::WIF_COMPRESSED {
            return Err(CredentialsError::Wif("unexpected version"));
        }
        if double_sha256(&raw[..34])[..4] != raw[34..] {
            return Err(CredentialsError::Wif("checksum mismatch"));
        }
        Self::from_slice(&raw[1..33])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    /// Owner ID controlled by this key.
    pub fn owner_id(&self) -> OwnerId {
        let digest = Sha256::digest(Sha256::digest(&self.secret[..]));
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest[..20]);
        OwnerId::from_script_hash(hash)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("owner", &self.owner_id())
            .finish_non_exhaustive()
    }
}
