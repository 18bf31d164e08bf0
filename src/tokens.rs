//! Bearer and session tokens.
//!
//! A bearer token travels with each request as standard base64 of a
//! self-describing JSON document. Signature verification is the storage
//! network's business; the gateway only decodes the token, reads the
//! issuer and forwards it with every RPC.

use crate::types::{ContainerId, OwnerId};
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while decoding a bearer token.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("can't base64-decode bearer token: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("can't unmarshal bearer token: {0}")]
    Unmarshal(#[from] serde_json::Error),

    #[error("bearer token is empty")]
    Empty,
}

/// Operation a bearer token may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    Head,
    Put,
    Delete,
    Search,
    Range,
}

/// Signed authorisation blob issued by a container owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerToken {
    /// Account that issued (and signed) the token.
    pub issuer: OwnerId,

    /// Container the token is scoped to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerId>,

    /// Operations granted; empty means "as the container ACL allows".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,

    /// Last epoch the token is valid for.
    pub expiration_epoch: u64,

    /// Issuer signature over the token body, hex encoded.
    #[serde(default)]
    pub signature: String,
}

impl BearerToken {
    /// Decode from the base64 wire form carried in headers and cookies.
    pub fn from_base64(encoded: &str) -> Result<Self, TokenError> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(TokenError::Empty);
        }
        let raw = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Encode into the base64 wire form.
    pub fn to_base64(&self) -> String {
        let raw = serde_json::to_vec(self).unwrap_or_default();
        base64::engine::general_purpose::STANDARD.encode(raw)
    }
}

/// Per-peer credential used by the gateway to act under its own identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Opaque session identifier issued by the peer.
    pub id: String,
    /// Account the session belongs to.
    pub owner: OwnerId,
    /// Last epoch the session is valid for.
    pub expiration_epoch: u64,
}
