//! Gateway request handlers
//!
//! Split into submodules by domain:
//! - `upload` - multipart upload into a container
//! - `download` - fetch by address and by attribute search
//! - `status` - readiness and liveness checks

mod download;
mod status;
mod upload;

use crate::client::CallOptions;
use crate::metrics::Metrics;
use crate::pool::{ConnectionArtifacts, Pool};
use crate::resolver::ResolverChain;
use std::sync::Arc;

pub use download::{download_by_address, download_by_attribute, DownloadQuery};
pub use status::{healthy, ready};
pub use upload::{upload, UploadResponse};

/// Request handling settings taken from the configuration.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Add a `Timestamp` attribute to uploads that don't set one.
    pub use_default_timestamp: bool,
    /// Stream upload bodies instead of buffering them first.
    pub stream_request_body: bool,
    pub max_request_body_size: usize,
    /// Chunk size used when writing download bodies.
    pub write_buffer_size: usize,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            use_default_timestamp: false,
            stream_request_body: true,
            max_request_body_size: 4 * 1024 * 1024,
            write_buffer_size: 4096,
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub pool: Arc<Pool>,
    pub resolver: ResolverChain,
    pub settings: HandlerSettings,
    pub metrics: Option<Arc<Metrics>>,
}

/// Per-call credentials for a pooled connection plus the request's bearer token.
fn call_options(
    conn: &ConnectionArtifacts,
    bearer: Option<&crate::tokens::BearerToken>,
) -> CallOptions {
    CallOptions {
        session: Some(conn.session.clone()),
        bearer: bearer.cloned(),
    }
}
