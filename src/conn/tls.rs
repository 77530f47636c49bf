//! TLS termination via `rustls`. One [`TlsAdaptor`] is built from a
//! listener's TLS config and shared across every connection it accepts.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;
use crate::error::CoreError;

/// Holds the `rustls` acceptor built from a listener's certificate/key pair.
#[derive(Clone)]
pub struct TlsAdaptor {
    acceptor: TlsAcceptor,
}

impl TlsAdaptor {
    pub fn from_config(config: &TlsConfig) -> Result<Self, CoreError> {
        let cert_path = config
            .cert_file
            .as_ref()
            .ok_or_else(|| CoreError::ConfigFailure("tls listener requires cert_file".into()))?;
        let key_path = config
            .key_file
            .as_ref()
            .ok_or_else(|| CoreError::ConfigFailure("tls listener requires key_file".into()))?;

        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;

        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| CoreError::ConfigFailure(format!("building tls server config: {e}")))?;

        Ok(Self { acceptor: TlsAcceptor::from(Arc::new(server_config)) })
    }

    /// Perform the TLS handshake over an already-accepted plaintext stream.
    pub async fn accept(&self, stream: TcpStream) -> std::io::Result<tokio_rustls::server::TlsStream<TcpStream>> {
        self.acceptor.accept(stream).await
    }
}

fn load_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>, CoreError> {
    let file = File::open(path)
        .map_err(|e| CoreError::ConfigFailure(format!("opening cert file {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CoreError::ConfigFailure(format!("parsing cert file {}: {e}", path.display())))
}

fn load_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>, CoreError> {
    let file = File::open(path)
        .map_err(|e| CoreError::ConfigFailure(format!("opening key file {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| CoreError::ConfigFailure(format!("parsing key file {}: {e}", path.display())))?
        .ok_or_else(|| CoreError::ConfigFailure(format!("no private key found in {}", path.display())))
}
