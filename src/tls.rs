use std::fs;
use std::io::BufReader;
use std::sync::Arc;

use rustls::ServerConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("no valid certificates found in '{0}'")]
    NoCerts(String),
    #[error("no valid private key found in '{0}'")]
    NoKey(String),
    #[error("failed to build TLS config: {0}")]
    RustlsConfig(#[from] rustls::Error),
}

/// Builds the server-side TLS config from the PEM files mounted into the pod
/// by the deployment. Certificate issuance and rotation happen outside this
/// process; a rotated cert requires a restart.
pub fn load_tls_config(cert_path: &str, key_path: &str) -> Result<Arc<ServerConfig>, TlsError> {
    let cert_data = read_file(cert_path)?;
    let key_data = read_file(key_path)?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(cert_data.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::FileRead {
            path: cert_path.to_string(),
            source: e,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCerts(cert_path.to_string()));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_data.as_slice()))
        .map_err(|e| TlsError::FileRead {
            path: key_path.to_string(),
            source: e,
        })?
        .ok_or_else(|| TlsError::NoKey(key_path.to_string()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

fn read_file(path: &str) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::FileRead {
        path: path.to_string(),
        source,
    })
}
