//! TLS termination for the gateway listener.
//!
//! Only user-provided PEM files are supported: TLS is enabled when both
//! `tls.certificate` and `tls.key` are configured.

use crate::config::TlsConfig;
use axum_server::tls_rustls::RustlsConfig;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("tls.certificate and tls.key must both be set")]
    Incomplete,

    #[error("could not load TLS certificate {certificate:?} / key {key:?}: {source}")]
    Load {
        certificate: PathBuf,
        key: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Build a [`RustlsConfig`] from the configured PEM certificate chain and key.
pub async fn build_rustls_config(tls: &TlsConfig) -> Result<RustlsConfig, TlsError> {
    let (Some(certificate), Some(key)) = (&tls.certificate, &tls.key) else {
        return Err(TlsError::Incomplete);
    };
    RustlsConfig::from_pem_file(certificate, key)
        .await
        .map_err(|source| TlsError::Load {
            certificate: certificate.clone(),
            key: key.clone(),
            source,
        })
}
