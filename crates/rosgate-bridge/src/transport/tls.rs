//! TLS material loading (rustls).

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::Connector;

use rosgate_core::{BridgeError, Result};

use crate::config::CertFormat;

fn read_certs(path: &Path, format: CertFormat) -> Result<Vec<CertificateDer<'static>>> {
    match format {
        CertFormat::Pem => {
            let file = fs::File::open(path).map_err(|e| {
                BridgeError::Config(format!(
                    "failed to load certificate file '{}': {e}",
                    path.display()
                ))
            })?;
            let mut reader = BufReader::new(file);
            let certs: std::result::Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
            let certs = certs.map_err(|e| {
                BridgeError::Config(format!(
                    "failed to parse certificate file '{}': {e}",
                    path.display()
                ))
            })?;
            if certs.is_empty() {
                return Err(BridgeError::Config(format!(
                    "no certificates found in '{}'",
                    path.display()
                )));
            }
            Ok(certs)
        }
        CertFormat::Asn1 => {
            let der = fs::read(path).map_err(|e| {
                BridgeError::Config(format!(
                    "failed to load certificate file '{}': {e}",
                    path.display()
                ))
            })?;
            Ok(vec![CertificateDer::from(der)])
        }
    }
}

fn read_private_key(path: &Path, format: CertFormat) -> Result<PrivateKeyDer<'static>> {
    match format {
        CertFormat::Pem => {
            let file = fs::File::open(path).map_err(|e| {
                BridgeError::Config(format!(
                    "failed to load private key file '{}': {e}",
                    path.display()
                ))
            })?;
            let mut reader = BufReader::new(file);
            rustls_pemfile::private_key(&mut reader)
                .map_err(|e| {
                    BridgeError::Config(format!(
                        "failed to parse private key file '{}': {e}",
                        path.display()
                    ))
                })?
                .ok_or_else(|| {
                    BridgeError::Config(format!(
                        "no private key found in '{}'",
                        path.display()
                    ))
                })
        }
        CertFormat::Asn1 => {
            let der = fs::read(path).map_err(|e| {
                BridgeError::Config(format!(
                    "failed to load private key file '{}': {e}",
                    path.display()
                ))
            })?;
            Ok(PrivateKeyDer::from(PrivatePkcs8KeyDer::from(der)))
        }
    }
}

/// Build the TLS acceptor for the server role from the configured
/// certificate and private key files.
pub fn make_acceptor(cert: &Path, key: &Path, format: CertFormat) -> Result<TlsAcceptor> {
    let certs = read_certs(cert, format)?;
    let key = read_private_key(key, format)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| BridgeError::Config(format!("failed to build TLS config: {e}")))?;

    tracing::debug!("Loaded certificate file '{}'", cert.display());
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the TLS connector for the client role. When a certificate file is
/// configured it is trusted as a root (self-signed deployments); otherwise
/// the webpki roots bundled with the websocket stack apply.
pub fn make_connector(cert: Option<&Path>, format: CertFormat) -> Result<Option<Connector>> {
    let Some(cert) = cert else {
        return Ok(None);
    };

    let mut roots = rustls::RootCertStore::empty();
    for der in read_certs(cert, format)? {
        roots.add(der).map_err(|e| {
            BridgeError::Config(format!(
                "failed to trust certificate '{}': {e}",
                cert.display()
            ))
        })?;
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Some(Connector::Rustls(Arc::new(config))))
}
