//! TLS identity loading and handshakes.
//!
//! The identity (certificate chain, private key, CA bundle) is read and
//! parsed once at startup. Any missing or unparsable file is a startup
//! error; nothing is retried later.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::TlsConfig;

/// Problems with the configured TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("TLS identity incomplete: missing {}", .0.join(", "))]
    Incomplete(Vec<&'static str>),

    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PEM in {path:?}: {source}")]
    Pem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("certificate and key rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// A failed TLS negotiation on one connection.
#[derive(Debug, Error)]
#[error("TLS handshake with {peer} failed: {source}")]
pub struct HandshakeError {
    pub peer: SocketAddr,
    #[source]
    pub source: std::io::Error,
}

impl HandshakeError {
    /// True if the handshake was abandoned because it took too long.
    pub fn is_timeout(&self) -> bool {
        self.source.kind() == std::io::ErrorKind::TimedOut
    }
}

/// Server certificate chain, private key and trusted CA bundle.
#[derive(Debug)]
pub struct TlsIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    ca_bundle: Vec<CertificateDer<'static>>,
}

impl TlsIdentity {
    /// Read and parse all three identity files.
    pub fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let (cert_path, key_path, ca_path) =
            match (&config.cert_path, &config.key_path, &config.ca_path) {
                (Some(cert), Some(key), Some(ca)) => (cert, key, ca),
                _ => return Err(TlsError::Incomplete(config.missing())),
            };

        let chain = read_certs(cert_path)?;
        let key = read_key(key_path)?;
        let ca_bundle = read_certs(ca_path)?;

        tracing::info!(
            cert = ?cert_path,
            chain_len = chain.len(),
            ca_certs = ca_bundle.len(),
            "TLS identity loaded"
        );

        Ok(Self {
            chain,
            key,
            ca_bundle,
        })
    }

    /// Number of certificates in the server chain.
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Number of certificates in the CA bundle.
    pub fn ca_len(&self) -> usize {
        self.ca_bundle.len()
    }

    /// Build the rustls server configuration.
    ///
    /// The presented chain is the server chain followed by any CA bundle
    /// certificates it does not already contain. ALPN offers h2 and http/1.1.
    pub fn server_config(&self) -> Result<ServerConfig, TlsError> {
        let mut chain = self.chain.clone();
        for ca in &self.ca_bundle {
            if !chain.contains(ca) {
                chain.push(ca.clone());
            }
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(chain, self.key.clone_key())?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }

    /// Build a handshake acceptor for this identity.
    pub fn acceptor(&self, handshake_timeout: Duration) -> Result<TlsAcceptor, TlsError> {
        let config = RustlsConfig::from_config(Arc::new(self.server_config()?));
        Ok(TlsAcceptor {
            inner: RustlsAcceptor::new(config).handshake_timeout(handshake_timeout),
        })
    }
}

/// Performs server-side TLS handshakes on accepted TCP streams.
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: RustlsAcceptor,
}

/// A decrypted client stream.
pub type TlsStream = <RustlsAcceptor as Accept<TcpStream, ()>>::Stream;

impl TlsAcceptor {
    /// Run the handshake, bounded by the configured handshake timeout.
    pub async fn handshake(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<TlsStream, HandshakeError> {
        self.inner
            .accept(stream, ())
            .await
            .map(|(stream, ())| stream)
            .map_err(|source| HandshakeError { peer, source })
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}
