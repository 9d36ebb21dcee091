//! TLS for listeners and outgoing connections (feature `tls`).

use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection};

use gink_core::{Error, Result};

use crate::transport::Transport;

fn tls_error(e: impl std::fmt::Display) -> Error {
    Error::ConfigError(format!("tls: {e}"))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs: std::result::Result<Vec<_>, std::io::Error> =
        rustls_pemfile::certs(&mut reader).collect();
    let certs = certs?;
    if certs.is_empty() {
        return Err(tls_error(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

fn load_secret_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(PrivateKeyDer::Sec1(key)),
            None => break,
            _ => {}
        }
    }
    Err(tls_error(format!(
        "no keys found in {} (encrypted keys not supported)",
        path.display()
    )))
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Server configuration from PEM certificate chain and key files.
pub fn server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(cert_path)?;
    let key = load_secret_key(key_path)?;
    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(tls_error)?;
    Ok(Arc::new(config))
}

/// Client configuration trusting the certificates in `ca_path`.
pub fn client_config(ca_path: &Path) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        roots.add(cert).map_err(tls_error)?;
    }
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Wrap an accepted socket; the handshake completes as data flows.
pub(crate) fn accept(config: &Arc<ServerConfig>, stream: TcpStream) -> Result<Transport> {
    let conn = ServerConnection::new(config.clone()).map_err(tls_error)?;
    Ok(Transport::TlsServer(Box::new(rustls::StreamOwned::new(
        conn, stream,
    ))))
}

/// Wrap an outgoing socket connected to `host`.
pub(crate) fn connect(
    config: &Arc<ClientConfig>,
    host: &str,
    stream: TcpStream,
) -> Result<Transport> {
    let name = ServerName::try_from(host.to_string()).map_err(tls_error)?;
    let conn = ClientConnection::new(config.clone(), name).map_err(tls_error)?;
    Ok(Transport::TlsClient(Box::new(rustls::StreamOwned::new(
        conn, stream,
    ))))
}
